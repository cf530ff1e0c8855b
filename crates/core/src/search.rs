//! Content search contract.
//!
//! Tools that ground answers in documents go through a [`SearchBackend`].
//! The engine itself never searches; it only sees the sources tools attach.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// A retrieved chunk of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk identifier
    pub id: String,
    pub file_id: String,
    /// Label of the owning file
    pub key: String,
    pub content: String,
    #[serde(default)]
    pub order: Option<u32>,
    #[serde(default)]
    pub start_page: Option<u32>,
    #[serde(default)]
    pub end_page: Option<u32>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A whole file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Narrow a search to a subset of the corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to these files (empty = all)
    #[serde(default)]
    pub file_ids: Vec<String>,

    /// Case-insensitive substring the file label must contain
    #[serde(default)]
    pub key_contains: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPaging {
    pub limit: usize,
    pub offset: usize,
}

impl Default for SearchPaging {
    fn default() -> Self {
        Self { limit: 10, offset: 0 }
    }
}

/// Search over the content corpus.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Chunks relevant to `query`, best first.
    async fn search_chunks(
        &self,
        query: &str,
        filters: &SearchFilters,
        paging: SearchPaging,
    ) -> Result<Vec<ChunkRecord>, SearchError>;

    /// Files matching `filters`.
    async fn list_files(&self, filters: &SearchFilters) -> Result<Vec<FileRecord>, SearchError>;

    /// Every chunk of one file, in order.
    async fn file_chunks(&self, file_id: &str) -> Result<Vec<ChunkRecord>, SearchError>;
}
