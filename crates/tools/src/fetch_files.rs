//! Fetch whole files as source blocks.

use std::sync::Arc;

use async_trait::async_trait;
use ctxloom_core::error::ToolError;
use ctxloom_core::message::Message;
use ctxloom_core::search::{SearchBackend, SearchFilters};
use ctxloom_core::source::{SourceRecord, render_source_block};
use ctxloom_core::tool::{ToolContext, ToolHandler, ToolOutcome};
use serde::Deserialize;
use tracing::debug;

/// Refuse to inline more than this many files in one response.
const MAX_FILES: usize = 5;

pub struct FetchFilesTool {
    search: Arc<dyn SearchBackend>,
}

impl FetchFilesTool {
    pub fn new(search: Arc<dyn SearchBackend>) -> Self {
        Self { search }
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchFilesArgs {
    #[serde(default)]
    pub file_ids: Vec<String>,
    /// Case-insensitive substring of the file name
    #[serde(default)]
    pub name_contains: Option<String>,
}

#[async_trait]
impl ToolHandler for FetchFilesTool {
    type Args = FetchFilesArgs;

    fn name(&self) -> &str {
        "fetch_files"
    }

    fn description(&self) -> &str {
        "Fetch the full content of files by id or name. Content comes back as numbered \
         <sourceN> blocks; cite them as [sourceN]."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "file_ids": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "name_contains": {
                    "type": "string",
                    "description": "Match files whose name contains this text"
                }
            }
        })
    }

    async fn run(
        &self,
        args: &FetchFilesArgs,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError> {
        let failed = |e: ctxloom_core::error::SearchError| ToolError::ExecutionFailed {
            tool_name: "fetch_files".to_string(),
            reason: e.to_string(),
        };

        if args.file_ids.is_empty() && args.name_contains.is_none() {
            return Err(ToolError::InvalidArguments {
                tool_name: self.name().to_string(),
                reason: "give file_ids or name_contains".into(),
            });
        }

        let filters = SearchFilters {
            file_ids: args.file_ids.clone(),
            key_contains: args.name_contains.clone(),
        };
        let files = self.search.list_files(&filters).await.map_err(failed)?;
        if files.is_empty() {
            return Ok(ToolOutcome::text("No matching files."));
        }
        if files.len() > MAX_FILES {
            return Ok(ToolOutcome::text(format!(
                "{} files match; narrow the request to at most {MAX_FILES}.",
                files.len()
            )));
        }

        let mut blocks = Vec::new();
        let mut sources = Vec::new();
        for file in &files {
            for chunk in self.search.file_chunks(&file.id).await.map_err(failed)? {
                blocks.push(render_source_block(blocks.len(), &chunk));
                sources.push(SourceRecord::from_chunk(&chunk));
            }
        }
        debug!(call_id = ctx.call_id, files = files.len(), blocks = blocks.len(), "Files fetched");

        Ok(ToolOutcome::message(
            Message::assistant(blocks.join("\n")).with_sources(sources),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxloom_core::search::{ChunkRecord, FileRecord};
    use ctxloom_core::source::source_blocks;
    use ctxloom_core::tool::{Tool, ToolPayload};
    use ctxloom_memory::InMemorySearch;

    fn chunk(id: &str, order: u32, content: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            file_id: String::new(),
            key: String::new(),
            content: content.into(),
            order: Some(order),
            start_page: None,
            end_page: None,
            url: None,
        }
    }

    fn file(id: &str, key: &str) -> FileRecord {
        FileRecord {
            id: id.into(),
            key: key.into(),
            url: None,
            mime_type: None,
        }
    }

    async fn tool() -> FetchFilesTool {
        let search = InMemorySearch::new();
        search
            .add_file(file("f1", "intro.md"), vec![chunk("b", 1, "second"), chunk("a", 0, "first")])
            .await;
        search.add_file(file("f2", "notes.txt"), vec![chunk("c", 0, "notes")]).await;
        FetchFilesTool::new(Arc::new(search))
    }

    async fn invoke(tool: &FetchFilesTool, args: serde_json::Value) -> ToolPayload {
        let extras = serde_json::Map::new();
        let mut ctx = ToolContext {
            call_id: "tc1",
            tool_name: "fetch_files",
            call_index: 0,
            iteration: 1,
            extras: &extras,
            out: None,
        };
        tool.invoke(&args, &mut ctx).await.payload().clone()
    }

    #[tokio::test]
    async fn fetches_chunks_in_order_with_sources() {
        let tool = tool().await;
        let ToolPayload::Message(message) = invoke(&tool, serde_json::json!({"file_ids": ["f1"]})).await
        else {
            panic!("expected a message payload");
        };
        let blocks = source_blocks(message.text());
        let bodies: Vec<&str> = blocks.iter().map(|b| b.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert_eq!(message.sources.len(), 2);
        assert_eq!(message.sources[0].chunk_id, "a");
        assert_eq!(message.sources[0].url, "content://f1");
    }

    #[tokio::test]
    async fn matches_by_name() {
        let tool = tool().await;
        let ToolPayload::Message(message) =
            invoke(&tool, serde_json::json!({"name_contains": "NOTES"})).await
        else {
            panic!("expected a message payload");
        };
        assert_eq!(message.sources.len(), 1);
        assert_eq!(message.sources[0].key, "notes.txt");
    }

    #[tokio::test]
    async fn no_selector_is_an_error_response() {
        let tool = tool().await;
        let payload = invoke(&tool, serde_json::json!({})).await;
        let ToolPayload::Text(text) = payload else {
            panic!("expected a text payload");
        };
        assert!(text.starts_with("Error: Invalid tool arguments for fetch_files"));
    }

    #[tokio::test]
    async fn nothing_matches() {
        let tool = tool().await;
        assert_eq!(
            invoke(&tool, serde_json::json!({"file_ids": ["zzz"]})).await,
            ToolPayload::Text("No matching files.".into())
        );
    }
}
