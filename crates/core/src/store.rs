//! Message persistence contract.
//!
//! The store owns the durable copy of a conversation. The engine reads it
//! once per session and writes back only debug payloads and failure text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A message as the store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,

    /// Role name; the store may upper-case it
    pub role: String,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub debug: serde_json::Map<String, serde_json::Value>,
}

/// Durable message storage for one conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// All messages, oldest first.
    async fn list(&self) -> Result<Vec<StoredMessage>, StoreError>;

    /// Persist a new message and return it with its assigned id.
    async fn create(
        &self,
        role: &str,
        text: Option<&str>,
        debug: serde_json::Map<String, serde_json::Value>,
    ) -> Result<StoredMessage, StoreError>;

    /// Replace text and/or debug of an existing message.
    async fn update(
        &self,
        id: &str,
        text: Option<&str>,
        debug: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<StoredMessage, StoreError>;

    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Remove every message of the conversation.
    async fn clear(&self) -> Result<(), StoreError>;
}
