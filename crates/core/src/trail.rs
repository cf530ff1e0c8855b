//! The persisted tool-call trail.
//!
//! Only top-level user and assistant turns live in the remote store. The
//! assistant-with-tool-calls messages and tool responses of a turn are
//! serialized into the debug payload of the user message that started it,
//! under [`TRAIL_KEY`], and versioned by [`TRAIL_VERSION_KEY`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MessageFormatError;
use crate::message::{CitationMap, Message, Role, ToolCallRecord};
use crate::source::SourceRecord;

pub const TRAIL_KEY: &str = "_tool_calls";
pub const TRAIL_VERSION_KEY: &str = "_tool_calls_version";
pub const TRAIL_VERSION: u64 = 1;

/// Key written by older deployments: a JSON-encoded string of camelCase
/// records with JSON-string arguments.
pub const LEGACY_TRAIL_KEY: &str = "state_manager_tool_calls";

type Debug = serde_json::Map<String, serde_json::Value>;

/// One intermediate message of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailRecord {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub original_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub citations: CitationMap,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
}

impl TrailRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            original_content: message.original_content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            citations: message.citations.clone(),
            sources: message.sources.clone(),
        }
    }

    /// Rebuild the in-memory message. Never carries a remote link.
    pub fn into_message(self) -> Result<Message, MessageFormatError> {
        let mut message =
            Message::from_parts(self.role, self.content, self.tool_calls, self.tool_call_id)?;
        message.original_content = self.original_content;
        message.citations = self.citations;
        message.sources = self.sources;
        Ok(message)
    }
}

/// Reads and writes trails inside a debug payload.
pub struct ToolTrail;

impl ToolTrail {
    /// Records under the current key. Missing version means version 1;
    /// newer versions are skipped.
    pub fn read(debug: &Debug) -> Vec<TrailRecord> {
        let Some(raw) = debug.get(TRAIL_KEY) else {
            return Vec::new();
        };
        let version = Self::version(debug);
        if version != TRAIL_VERSION {
            warn!(version, supported = TRAIL_VERSION, "Skipping tool-call trail of unknown version");
            return Vec::new();
        }
        match serde_json::from_value(raw.clone()) {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Skipping malformed tool-call trail");
                Vec::new()
            }
        }
    }

    /// Records under the legacy key.
    pub fn read_legacy(debug: &Debug) -> Vec<TrailRecord> {
        let Some(raw) = debug.get(LEGACY_TRAIL_KEY) else {
            return Vec::new();
        };
        let parsed: Result<Vec<LegacyRecord>, _> = match raw {
            serde_json::Value::String(encoded) => serde_json::from_str(encoded),
            other => serde_json::from_value(other.clone()),
        };
        match parsed {
            Ok(records) => records.into_iter().map(LegacyRecord::upgrade).collect(),
            Err(e) => {
                warn!(error = %e, "Skipping malformed legacy tool-call trail");
                Vec::new()
            }
        }
    }

    /// Whether `message` carries a trail under either key, readable or not.
    pub fn is_carried_by(message: &Message) -> bool {
        message
            .debug()
            .is_some_and(|d| d.contains_key(TRAIL_KEY) || d.contains_key(LEGACY_TRAIL_KEY))
    }

    fn version(debug: &Debug) -> u64 {
        debug
            .get(TRAIL_VERSION_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(TRAIL_VERSION)
    }

    /// Debug fields that append `records` to whatever trail `existing`
    /// already holds.
    ///
    /// `None` when `existing` holds a trail of another version: writing
    /// would replace records this build cannot read.
    pub fn appended(existing: &Debug, records: &[TrailRecord]) -> Option<Debug> {
        if existing.contains_key(TRAIL_KEY) && Self::version(existing) != TRAIL_VERSION {
            return None;
        }
        let mut all = Self::read(existing);
        all.extend(records.iter().cloned());
        let mut patch = Debug::new();
        patch.insert(
            TRAIL_KEY.to_string(),
            serde_json::to_value(all).unwrap_or(serde_json::Value::Array(Vec::new())),
        );
        patch.insert(TRAIL_VERSION_KEY.to_string(), TRAIL_VERSION.into());
        Some(patch)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<serde_json::Value>,
    #[serde(default)]
    tool_call_id: Option<String>,
}

impl LegacyRecord {
    fn upgrade(self) -> TrailRecord {
        TrailRecord {
            role: self.role,
            content: self.content,
            original_content: None,
            tool_calls: self
                .tool_calls
                .iter()
                .filter_map(ToolCallRecord::from_wire)
                .collect(),
            tool_call_id: self.tool_call_id,
            citations: CitationMap::new(),
            sources: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> Vec<TrailRecord> {
        let call = ToolCallRecord::new("tc1", "search", serde_json::json!({"query": "rust"}));
        vec![
            TrailRecord::from_message(&Message::assistant_with_tool_calls(None, vec![call])),
            TrailRecord::from_message(&Message::tool_result("tc1", Some("found".into()))),
        ]
    }

    #[test]
    fn appended_trail_reads_back() {
        let patch = ToolTrail::appended(&Debug::new(), &round()).unwrap();
        assert_eq!(patch[TRAIL_VERSION_KEY], 1);
        let records = ToolTrail::read(&patch);
        assert_eq!(records, round());
    }

    #[test]
    fn appending_accumulates_rounds() {
        let first = ToolTrail::appended(&Debug::new(), &round()).unwrap();
        let second = ToolTrail::appended(&first, &round()).unwrap();
        assert_eq!(ToolTrail::read(&second).len(), 4);
    }

    #[test]
    fn unknown_version_is_skipped() {
        let mut patch = ToolTrail::appended(&Debug::new(), &round()).unwrap();
        patch.insert(TRAIL_VERSION_KEY.into(), 7.into());
        assert!(ToolTrail::read(&patch).is_empty());
    }

    #[test]
    fn carried_by_checks_both_keys() {
        use crate::message::RemoteLink;

        let with = |key: &str| {
            let mut debug = Debug::new();
            debug.insert(key.into(), serde_json::json!([]));
            Message::user("").with_remote(RemoteLink { id: "u1".into(), debug })
        };
        assert!(ToolTrail::is_carried_by(&with(TRAIL_KEY)));
        assert!(ToolTrail::is_carried_by(&with(LEGACY_TRAIL_KEY)));
        assert!(!ToolTrail::is_carried_by(&with("_debug")));
        assert!(!ToolTrail::is_carried_by(&Message::user("local")));
    }

    #[test]
    fn unknown_version_is_never_appended_to() {
        let mut newer = Debug::new();
        newer.insert(TRAIL_KEY.into(), serde_json::json!([{"kind": "v7-record"}]));
        newer.insert(TRAIL_VERSION_KEY.into(), 7.into());
        assert!(ToolTrail::appended(&newer, &round()).is_none());

        // a version key alone, with no trail, does not block the first round
        let mut bare = Debug::new();
        bare.insert(TRAIL_VERSION_KEY.into(), 7.into());
        assert!(ToolTrail::appended(&bare, &round()).is_some());
    }

    #[test]
    fn legacy_trail_parses_string_arguments() {
        let encoded = serde_json::json!([
            {
                "role": "assistant",
                "content": null,
                "toolCalls": [
                    { "id": "tc9", "type": "function",
                      "function": { "name": "search", "arguments": "{\"query\":\"old\"}" } }
                ]
            },
            { "role": "tool", "content": "legacy result", "toolCallId": "tc9" }
        ])
        .to_string();
        let mut debug = Debug::new();
        debug.insert(LEGACY_TRAIL_KEY.into(), encoded.into());

        let records = ToolTrail::read_legacy(&debug);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool_calls[0].arguments["query"], "old");
        assert_eq!(records[1].tool_call_id.as_deref(), Some("tc9"));
    }

    #[test]
    fn record_rebuilds_message() {
        let message = round().remove(1).into_message().unwrap();
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("tc1"));
        assert!(message.remote.is_none());
    }

    #[test]
    fn invalid_record_is_rejected() {
        let record = TrailRecord {
            role: Role::Tool,
            content: Some("x".into()),
            original_content: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
            citations: CitationMap::new(),
            sources: Vec::new(),
        };
        assert!(record.into_message().is_err());
    }
}
