//! In-memory message store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use ctxloom_core::error::StoreError;
use ctxloom_core::store::{MessageStore, StoredMessage};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A message store that keeps one conversation in a Vec.
#[derive(Clone)]
pub struct InMemoryStore {
    messages: Arc<RwLock<Vec<StoredMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Start from an existing transcript. Empty ids are assigned.
    pub fn with_messages(messages: Vec<StoredMessage>) -> Self {
        let messages = messages
            .into_iter()
            .map(|mut m| {
                if m.id.is_empty() {
                    m.id = Uuid::new_v4().to_string();
                }
                m
            })
            .collect();
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    /// Current contents, oldest first.
    pub async fn snapshot(&self) -> Vec<StoredMessage> {
        self.messages.read().await.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn list(&self) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.messages.read().await.clone())
    }

    async fn create(
        &self,
        role: &str,
        text: Option<&str>,
        debug: serde_json::Map<String, serde_json::Value>,
    ) -> Result<StoredMessage, StoreError> {
        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            text: text.map(str::to_string),
            debug,
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn update(
        &self,
        id: &str,
        text: Option<&str>,
        debug: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<StoredMessage, StoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if let Some(text) = text {
            message.text = Some(text.to_string());
        }
        if let Some(debug) = debug {
            message.debug = debug.clone();
        }
        Ok(message.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let len_before = messages.len();
        messages.retain(|m| m.id != id);
        if messages.len() == len_before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.messages.write().await.clear();
        Ok(())
    }
}
