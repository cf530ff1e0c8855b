//! Provider trait: the abstraction over model backends.
//!
//! A Provider turns a formatted message list and tool schemas into one
//! assistant message, either in one shot or as a stream of chunks that is
//! folded into a caller-owned output message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRecord};
use crate::source::SourceRecord;
use crate::tool::ToolSchema;

/// Context size and output reserve of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelLimits {
    pub context_window: usize,
    pub max_output_tokens: usize,
}

impl ModelLimits {
    pub const fn new(context_window: usize, max_output_tokens: usize) -> Self {
        Self {
            context_window,
            max_output_tokens,
        }
    }
}

/// How the model may pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    /// Force one named function
    Function(String),
}

impl ToolChoice {
    pub fn to_wire(&self) -> serde_json::Value {
        match self {
            ToolChoice::Auto => "auto".into(),
            ToolChoice::None => "none".into(),
            ToolChoice::Required => "required".into(),
            ToolChoice::Function(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }
}

/// Everything a provider needs for one completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,

    /// Built, reconciled context
    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,

    /// JSON Schema the answer must follow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,

    #[serde(default)]
    pub temperature: f32,

    /// Reserved output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Citation context: existing references then new ones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRecord>,
}

impl CompletionRequest {
    /// Messages in the chat wire shape. Tool calls and call ids are carried
    /// through; text is the raw-marker variant.
    pub fn wire_messages(&self) -> Vec<serde_json::Value> {
        self.messages
            .iter()
            .map(|m| {
                let mut wire = serde_json::Map::new();
                wire.insert("role".into(), m.role.as_str().into());
                wire.insert("content".into(), m.model_text().into());
                if !m.tool_calls.is_empty() {
                    wire.insert(
                        "tool_calls".into(),
                        m.tool_calls.iter().map(ToolCallRecord::to_wire).collect(),
                    );
                }
                if let Some(id) = &m.tool_call_id {
                    wire.insert("tool_call_id".into(), id.clone().into());
                }
                serde_json::Value::Object(wire)
            })
            .collect()
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Completed tool calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

/// The core Provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete assistant message.
    async fn complete(&self, request: CompletionRequest) -> Result<Message, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>, ProviderError>
    {
        let message = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: message.content,
                tool_calls: message.tool_calls,
                done: true,
            }))
            .await;
        Ok(rx)
    }
}

/// Complete `request`, streaming into `out` when one is supplied.
///
/// With `out`, its content and tool calls are replaced by this completion:
/// they are cleared first, then deltas are appended as they arrive. The
/// returned message is a copy of the final state.
pub async fn complete_into(
    provider: &dyn Provider,
    request: CompletionRequest,
    out: Option<&mut Message>,
) -> Result<Message, ProviderError> {
    let Some(out) = out else {
        return provider.complete(request).await;
    };

    out.content = None;
    out.tool_calls.clear();
    let mut rx = provider.stream(request).await?;
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.content {
            out.content.get_or_insert_with(String::new).push_str(&delta);
        }
        out.tool_calls.extend(chunk.tool_calls);
        if chunk.done {
            break;
        }
    }
    Ok(out.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<Message, ProviderError> {
            Ok(Message::assistant("streamed text"))
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o".into(),
            messages: vec![
                Message::user("hi"),
                Message::tool_result("tc1", Some("out".into())),
            ],
            tools: vec![],
            tool_choice: Some(ToolChoice::Auto),
            response_schema: None,
            temperature: 0.0,
            max_tokens: Some(4096),
            sources: vec![],
        }
    }

    #[test]
    fn wire_messages_carry_tool_call_ids() {
        let wire = request().wire_messages();
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["tool_call_id"], "tc1");
    }

    #[test]
    fn tool_choice_wire_shape() {
        assert_eq!(ToolChoice::Required.to_wire(), "required");
        let forced = ToolChoice::Function("final_answer".into()).to_wire();
        assert_eq!(forced["function"]["name"], "final_answer");
    }

    #[tokio::test]
    async fn complete_into_replaces_earlier_out_content() {
        let mut out = Message::assistant("Let me search.");
        let result = complete_into(&FixedProvider, request(), Some(&mut out))
            .await
            .unwrap();
        assert_eq!(out.text(), "streamed text");
        assert_eq!(result.text(), out.text());
    }

    #[tokio::test]
    async fn complete_into_without_out_is_one_shot() {
        let result = complete_into(&FixedProvider, request(), None).await.unwrap();
        assert_eq!(result.text(), "streamed text");
    }
}
