//! Message domain types.
//!
//! A [`Message`] is one turn of a conversation. It is either rehydrated from
//! the remote store (and then carries a [`RemoteLink`]) or synthesized in
//! memory (model output, tool responses) and disappears with the session.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MessageFormatError, StoreError};
use crate::source::SourceRecord;
use crate::store::{MessageStore, StoredMessage};

/// Debug key holding the rendered-marker map of a persisted message.
pub const CITATIONS_KEY: &str = "_citations";

/// Debug key holding the sources a persisted message was produced with.
pub const SOURCES_KEY: &str = "_sources";

/// Marker text (e.g. `[source5]`) to the ordinal it was rendered as.
pub type CitationMap = BTreeMap<String, usize>;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = MessageFormatError;

    /// Case-insensitive: the store reports roles upper-cased.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            _ => Err(MessageFormatError::InvalidRole(s.to_string())),
        }
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Decoded argument mapping
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCallRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// The function-call wire shape models exchange.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            }
        })
    }

    /// Parse the function-call wire shape. Arguments may arrive either as an
    /// object or as a JSON-encoded string.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        let id = value.get("id")?.as_str()?.to_string();
        let function = value.get("function")?;
        let name = function.get("name")?.as_str()?.to_string();
        let arguments = match function.get("arguments") {
            Some(serde_json::Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or(serde_json::Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        Some(Self { id, name, arguments })
    }
}

/// Link to the persisted counterpart of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLink {
    /// Identifier in the remote store
    pub id: String,

    /// Free-form debug payload stored alongside the message
    #[serde(default)]
    pub debug: serde_json::Map<String, serde_json::Value>,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// Rendered text (citation markers may already be substituted)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Text before substitution, carrying raw `[sourceN]` markers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Sources attached when the message was produced
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceRecord>,

    /// This message's own citation order at render time
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub citations: CitationMap,

    /// Present once the message is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteLink>,
}

impl Message {
    fn bare(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            original_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            sources: Vec::new(),
            citations: CitationMap::new(),
            remote: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::bare(Role::User, non_empty(content.into()))
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::bare(Role::System, non_empty(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::bare(Role::Assistant, non_empty(content.into()))
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
    ) -> Self {
        let mut message = Self::bare(Role::Assistant, content.and_then(non_empty));
        message.tool_calls = tool_calls;
        message
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: Option<String>) -> Self {
        let mut message = Self::bare(Role::Tool, content.and_then(non_empty));
        message.tool_call_id = Some(tool_call_id.into());
        message
    }

    /// Build a message from loose parts, enforcing the role invariants.
    pub fn from_parts(
        role: Role,
        content: Option<String>,
        tool_calls: Vec<ToolCallRecord>,
        tool_call_id: Option<String>,
    ) -> Result<Self, MessageFormatError> {
        let mut message = Self::bare(role, content.and_then(non_empty));
        message.tool_calls = tool_calls;
        message.tool_call_id = tool_call_id;
        message.validate()?;
        Ok(message)
    }

    /// Rehydrate a persisted message.
    ///
    /// `original_content` is rebuilt by substituting each `<sup>N</sup>` back
    /// into the marker recorded under `_citations`; that same map becomes the
    /// citation map, and `_sources` becomes the attached sources.
    pub fn from_stored(stored: StoredMessage) -> Result<Self, MessageFormatError> {
        let role: Role = stored.role.parse()?;

        let citations: CitationMap = stored
            .debug
            .get(CITATIONS_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let original_content = match (&stored.text, citations.is_empty()) {
            (Some(text), false) if !text.is_empty() => {
                let mut restored = text.clone();
                for (marker, sup) in &citations {
                    restored = restored.replace(&format!("<sup>{sup}</sup>"), marker);
                }
                Some(restored)
            }
            _ => None,
        };

        let sources: Vec<SourceRecord> = match stored.debug.get(SOURCES_KEY) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(message_id = %stored.id, error = %e, "Ignoring malformed _sources");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut message = Self::bare(role, stored.text.and_then(non_empty));
        message.original_content = original_content;
        message.citations = citations;
        message.sources = sources;
        message.remote = Some(RemoteLink {
            id: stored.id,
            debug: stored.debug,
        });
        message.validate()?;
        Ok(message)
    }

    /// Check the role invariants.
    pub fn validate(&self) -> Result<(), MessageFormatError> {
        if self.role == Role::Tool && self.tool_call_id.is_none() {
            return Err(MessageFormatError::ToolMessageWithoutToolCallId);
        }
        if self.role != Role::Assistant && !self.tool_calls.is_empty() {
            return Err(MessageFormatError::NonAssistantMessageWithToolCalls {
                role: self.role.to_string(),
            });
        }
        Ok(())
    }

    pub fn with_sources(mut self, sources: Vec<SourceRecord>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_citations(mut self, citations: CitationMap) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_original_content(mut self, original: impl Into<String>) -> Self {
        self.original_content = Some(original.into());
        self
    }

    pub fn with_remote(mut self, remote: RemoteLink) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Rendered content, or the empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    /// The text the model should see: raw markers win over rendered ones.
    pub fn model_text(&self) -> &str {
        self.original_content
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or("")
    }

    /// Remote identifier, if persisted.
    pub fn id(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.id.as_str())
    }

    pub fn is_persisted(&self) -> bool {
        self.remote.is_some()
    }

    /// Debug payload of the persisted counterpart.
    pub fn debug(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.remote.as_ref().map(|r| &r.debug)
    }

    /// Neither content nor tool calls.
    pub fn is_empty_turn(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }

    /// Whether the text is a slash or bang command.
    pub fn is_command(&self) -> bool {
        let text = self.text();
        text.starts_with('!') || text.starts_with('/')
    }

    /// Parse the content as JSON, tolerating a ```json fence and
    /// thousands separators between digits.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        let flattened = self.text().replace('\n', "");
        let mut body = flattened.trim_matches('`');
        if let Some(rest) = body.strip_prefix("json") {
            body = rest;
        }
        serde_json::from_str(&strip_digit_grouping(body))
    }

    /// Deep, independent copy.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Replace the content and merge `debug` into the stored debug payload,
    /// pushing both to the store when the message is persisted.
    pub async fn update(
        &mut self,
        store: &dyn MessageStore,
        content: Option<String>,
        debug: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), StoreError> {
        self.content = content.and_then(non_empty);
        let Some(remote) = self.remote.as_mut() else {
            return Ok(());
        };
        remote.debug.extend(debug);
        let updated = store
            .update(&remote.id, self.content.as_deref(), Some(&remote.debug))
            .await?;
        remote.debug = updated.debug;
        Ok(())
    }

    /// Append text, separated by a blank line when `new_line` is set.
    pub async fn append(
        &mut self,
        store: &dyn MessageStore,
        text: &str,
        new_line: bool,
    ) -> Result<(), StoreError> {
        let mut content = self.text().to_string();
        if new_line {
            content.push_str("\n\n");
        }
        content.push_str(text);
        self.update(store, Some(content), serde_json::Map::new()).await
    }

    /// Prepend text, separated by a blank line when `new_line` is set.
    pub async fn prepend(
        &mut self,
        store: &dyn MessageStore,
        text: &str,
        new_line: bool,
    ) -> Result<(), StoreError> {
        let mut content = text.to_string();
        if new_line {
            content.push_str("\n\n");
        }
        content.push_str(self.text());
        self.update(store, Some(content), serde_json::Map::new()).await
    }

    /// Delete the persisted counterpart.
    pub async fn delete(&self, store: &dyn MessageStore) -> Result<(), StoreError> {
        let remote = self.remote.as_ref().ok_or(StoreError::NoRemote)?;
        store.delete(&remote.id).await
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let content = self.text().trim_matches('\n');
        let preview: String = content.chars().take(30).collect();
        write!(f, "{}: {}", self.role.as_str().to_ascii_uppercase(), preview)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Drop commas sitting between two digits (`1,000` → `1000`).
fn strip_digit_grouping(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    for (i, c) in chars.iter().enumerate() {
        let between_digits = *c == ','
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if !between_digits {
            out.push(*c);
        }
    }
    out
}
