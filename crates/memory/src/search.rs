//! Keyword search over an in-memory corpus.

use async_trait::async_trait;
use ctxloom_core::error::SearchError;
use ctxloom_core::search::{ChunkRecord, FileRecord, SearchBackend, SearchFilters, SearchPaging};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Corpus {
    files: Vec<FileRecord>,
    chunks: Vec<ChunkRecord>,
}

/// Files and their chunks, searched by term frequency.
#[derive(Clone, Default)]
pub struct InMemorySearch {
    corpus: Arc<RwLock<Corpus>>,
}

impl InMemorySearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file and its chunks. Chunk `file_id`/`key` are taken from the file.
    pub async fn add_file(&self, file: FileRecord, chunks: Vec<ChunkRecord>) {
        let mut corpus = self.corpus.write().await;
        corpus.chunks.extend(chunks.into_iter().map(|mut c| {
            c.file_id = file.id.clone();
            c.key = file.key.clone();
            if c.url.is_none() {
                c.url = file.url.clone();
            }
            c
        }));
        corpus.files.push(file);
    }

    fn matches(filters: &SearchFilters, file_id: &str, key: &str) -> bool {
        let id_ok = filters.file_ids.is_empty() || filters.file_ids.iter().any(|f| f == file_id);
        let key_ok = filters
            .key_contains
            .as_ref()
            .is_none_or(|needle| key.to_lowercase().contains(&needle.to_lowercase()));
        id_ok && key_ok
    }
}

/// Keyword relevance: term occurrences, normalized by length.
fn score(content: &str, terms: &[String]) -> f32 {
    let lower = content.to_lowercase();
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    occurrences as f32 / (content.len() as f32 / 100.0).max(1.0)
}

#[async_trait]
impl SearchBackend for InMemorySearch {
    async fn search_chunks(
        &self,
        query: &str,
        filters: &SearchFilters,
        paging: SearchPaging,
    ) -> Result<Vec<ChunkRecord>, SearchError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return Err(SearchError::QueryFailed("empty query".into()));
        }

        let corpus = self.corpus.read().await;
        let mut scored: Vec<(f32, &ChunkRecord)> = corpus
            .chunks
            .iter()
            .filter(|c| Self::matches(filters, &c.file_id, &c.key))
            .map(|c| (score(&c.content, &terms), c))
            .filter(|(s, _)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(scored
            .into_iter()
            .skip(paging.offset)
            .take(paging.limit)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn list_files(&self, filters: &SearchFilters) -> Result<Vec<FileRecord>, SearchError> {
        let corpus = self.corpus.read().await;
        Ok(corpus
            .files
            .iter()
            .filter(|f| Self::matches(filters, &f.id, &f.key))
            .cloned()
            .collect())
    }

    async fn file_chunks(&self, file_id: &str) -> Result<Vec<ChunkRecord>, SearchError> {
        let corpus = self.corpus.read().await;
        let mut chunks: Vec<ChunkRecord> = corpus
            .chunks
            .iter()
            .filter(|c| c.file_id == file_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.order.unwrap_or(0));
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    async fn corpus() -> InMemorySearch {
        let search = InMemorySearch::new();
        search
            .add_file(
                file("f1", "rust-book.pdf"),
                vec![
                    chunk("c2", 1, "Ownership rules in Rust"),
                    chunk("c1", 0, "Rust is a systems language. Rust is fast."),
                ],
            )
            .await;
        search
            .add_file(file("f2", "python.md"), vec![chunk("c3", 0, "Python is great for scripting")])
            .await;
        search
    }

    #[tokio::test]
    async fn search_ranks_by_frequency() {
        let search = corpus().await;
        let results = search
            .search_chunks("rust", &SearchFilters::default(), SearchPaging::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[0].file_id, "f1");
        assert_eq!(results[0].key, "rust-book.pdf");
    }

    #[tokio::test]
    async fn filters_and_paging_apply() {
        let search = corpus().await;
        let filters = SearchFilters {
            file_ids: vec!["f2".into()],
            key_contains: None,
        };
        let results = search
            .search_chunks("rust python", &filters, SearchPaging::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c3");

        let paged = search
            .search_chunks("rust", &SearchFilters::default(), SearchPaging { limit: 1, offset: 1 })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].id, "c2");
    }

    #[tokio::test]
    async fn empty_query_fails() {
        let search = corpus().await;
        let err = search
            .search_chunks("   ", &SearchFilters::default(), SearchPaging::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn list_files_by_key() {
        let search = corpus().await;
        let filters = SearchFilters {
            file_ids: vec![],
            key_contains: Some("BOOK".into()),
        };
        let files = search.list_files(&filters).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "f1");
    }

    #[tokio::test]
    async fn file_chunks_in_order() {
        let search = corpus().await;
        let chunks = search.file_chunks("f1").await.unwrap();
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }
}
