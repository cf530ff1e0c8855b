//! File-based message store: one conversation as a JSON-lines transcript.
//!
//! Each line is a JSON-encoded [`StoredMessage`]. Messages are loaded on
//! creation and the whole file is rewritten on every mutation.

use async_trait::async_trait;
use ctxloom_core::error::StoreError;
use ctxloom_core::store::{MessageStore, StoredMessage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A transcript-backed message store.
pub struct JsonlStore {
    path: PathBuf,
    messages: Arc<RwLock<Vec<StoredMessage>>>,
}

impl JsonlStore {
    /// Open the transcript at `path`. A missing file starts empty and is
    /// created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let messages = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = messages.len(), "Transcript loaded");
        Self {
            path,
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<StoredMessage> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<StoredMessage>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted transcript line");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let messages = self.messages.read().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("Failed to create transcript directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for message in messages.iter() {
            let line = serde_json::to_string(message).map_err(|e| {
                StoreError::Backend(format!("Failed to serialize message: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        std::fs::write(&self.path, &content)
            .map_err(|e| StoreError::Backend(format!("Failed to write transcript: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for JsonlStore {
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
        self.flush().await?;
        Ok(message)
    }

    async fn update(
        &self,
        id: &str,
        text: Option<&str>,
        debug: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<StoredMessage, StoreError> {
        let updated = {
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
            message.clone()
        };
        self.flush().await?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let len_before = messages.len();
        messages.retain(|m| m.id != id);
        let deleted = messages.len() < len_before;
        drop(messages);
        if !deleted {
            return Err(StoreError::NotFound(id.to_string()));
        }
        self.flush().await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.messages.write().await.clear();
        self.flush().await
    }
}
