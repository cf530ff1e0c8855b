//! Knowledge search tool: retrieves chunks and hands them to the model as
//! citable source blocks.
//!
//! The response is a message whose content is the rendered
//! `<sourceN …>` blocks and whose sources are the matching
//! [`SourceRecord`]s, one per block and in block order, so the reconciler
//! counts them as known references on the next call.

use std::sync::Arc;

use async_trait::async_trait;
use ctxloom_core::error::ToolError;
use ctxloom_core::message::Message;
use ctxloom_core::search::{SearchBackend, SearchFilters, SearchPaging};
use ctxloom_core::source::{SourceRecord, render_source_block};
use ctxloom_core::tool::{ToolContext, ToolHandler, ToolOutcome};
use serde::Deserialize;
use tracing::debug;

/// Largest page a single call may ask for.
const MAX_LIMIT: usize = 20;

pub struct SearchKnowledgeTool {
    search: Arc<dyn SearchBackend>,
    default_limit: usize,
}

impl SearchKnowledgeTool {
    pub fn new(search: Arc<dyn SearchBackend>) -> Self {
        Self {
            search,
            default_limit: SearchPaging::default().limit,
        }
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit.clamp(1, MAX_LIMIT);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchKnowledgeArgs {
    pub query: String,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[async_trait]
impl ToolHandler for SearchKnowledgeTool {
    type Args = SearchKnowledgeArgs;

    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "Search the knowledge base. Results come back as numbered <sourceN> blocks; \
         cite them in your answer as [sourceN]."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "file_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Restrict the search to these files"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of chunks to return (default 10, max 20)"
                }
            },
            "required": ["query"]
        })
    }

    async fn run(
        &self,
        args: &SearchKnowledgeArgs,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError> {
        let filters = SearchFilters {
            file_ids: args.file_ids.clone(),
            key_contains: None,
        };
        let paging = SearchPaging {
            limit: args.limit.unwrap_or(self.default_limit).clamp(1, MAX_LIMIT),
            offset: 0,
        };

        let chunks = self
            .search
            .search_chunks(&args.query, &filters, paging)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: self.name().to_string(),
                reason: e.to_string(),
            })?;

        debug!(call_id = ctx.call_id, query = %args.query, hits = chunks.len(), "Knowledge searched");

        if chunks.is_empty() {
            return Ok(ToolOutcome::text(format!("No results found for '{}'.", args.query)));
        }

        let blocks: Vec<String> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| render_source_block(i, chunk))
            .collect();
        let sources: Vec<SourceRecord> = chunks.iter().map(SourceRecord::from_chunk).collect();

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

    async fn corpus() -> Arc<InMemorySearch> {
        let search = InMemorySearch::new();
        search
            .add_file(
                FileRecord {
                    id: "f1".into(),
                    key: "ownership.md".into(),
                    url: Some("https://docs.example/ownership".into()),
                    mime_type: None,
                },
                vec![
                    ChunkRecord {
                        id: "c1".into(),
                        file_id: String::new(),
                        key: String::new(),
                        content: "Each value in Rust has an owner.".into(),
                        order: Some(0),
                        start_page: Some(1),
                        end_page: Some(1),
                        url: None,
                    },
                    ChunkRecord {
                        id: "c2".into(),
                        file_id: String::new(),
                        key: String::new(),
                        content: "When the owner goes out of scope, the value is dropped.".into(),
                        order: Some(1),
                        start_page: Some(1),
                        end_page: Some(2),
                        url: None,
                    },
                ],
            )
            .await;
        Arc::new(search)
    }

    async fn run(tool: &SearchKnowledgeTool, args: serde_json::Value) -> ToolOutcome {
        let extras = serde_json::Map::new();
        let mut ctx = ToolContext {
            call_id: "tc1",
            tool_name: "search_knowledge",
            call_index: 0,
            iteration: 1,
            extras: &extras,
            out: None,
        };
        let args: SearchKnowledgeArgs = serde_json::from_value(args).unwrap();
        tool.run(&args, &mut ctx).await.unwrap()
    }

    #[tokio::test]
    async fn results_are_rendered_as_source_blocks() {
        let tool = SearchKnowledgeTool::new(corpus().await);
        let outcome = run(&tool, serde_json::json!({"query": "owner"})).await;

        let ToolPayload::Message(message) = outcome.payload else {
            panic!("expected a message payload");
        };
        let blocks = source_blocks(message.text());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag_index, 0);
        assert_eq!(blocks[0].attributes["label"], "ownership.md");
        assert_eq!(message.sources.len(), 2);
        assert_eq!(message.sources[0].id, "f1");
        assert_eq!(message.sources[0].url, "https://docs.example/ownership");
        assert!(outcome.proceed);
    }

    #[tokio::test]
    async fn no_hits_is_plain_text() {
        let tool = SearchKnowledgeTool::new(corpus().await);
        let outcome = run(&tool, serde_json::json!({"query": "borrowck"})).await;
        assert_eq!(
            outcome.payload,
            ToolPayload::Text("No results found for 'borrowck'.".into())
        );
    }

    #[tokio::test]
    async fn limit_is_respected() {
        let tool = SearchKnowledgeTool::new(corpus().await);
        let outcome = run(&tool, serde_json::json!({"query": "owner value", "limit": 1})).await;
        let ToolPayload::Message(message) = outcome.payload else {
            panic!("expected a message payload");
        };
        assert_eq!(message.sources.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_becomes_an_error_response() {
        let tool = SearchKnowledgeTool::new(corpus().await);
        let extras = serde_json::Map::new();
        let mut ctx = ToolContext {
            call_id: "tc1",
            tool_name: "search_knowledge",
            call_index: 0,
            iteration: 1,
            extras: &extras,
            out: None,
        };
        let invocation = tool.invoke(&serde_json::json!({"query": "  "}), &mut ctx).await;
        assert!(invocation.is_called());
        let ToolPayload::Text(text) = invocation.payload() else {
            panic!("expected a text payload");
        };
        assert!(text.starts_with("Error: Tool execution failed: search_knowledge"));
    }

    #[test]
    fn schema_requires_query() {
        let tool = SearchKnowledgeTool::new(Arc::new(InMemorySearch::new()));
        let schema = tool.schema();
        assert_eq!(schema.name, "search_knowledge");
        assert_eq!(schema.parameters["required"][0], "query");
    }
}
