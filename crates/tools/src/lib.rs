//! Built-in tool implementations for ctxloom.
//!
//! Retrieval tools answer with numbered `<sourceN>` blocks and the matching
//! source records, so citations survive across turns:
//!
//! - [`search_knowledge`]: keyword search over chunks
//! - [`fetch_files`]: whole files by id or name
//! - [`final_answer`]: ends the loop with an explicit answer

pub mod fetch_files;
pub mod final_answer;
pub mod search_knowledge;

use std::sync::Arc;

use ctxloom_core::error::ToolError;
use ctxloom_core::search::SearchBackend;
use ctxloom_core::tool::ToolRegistry;

pub use fetch_files::FetchFilesTool;
pub use final_answer::FinalAnswerTool;
pub use search_knowledge::SearchKnowledgeTool;

/// A registry with every built-in tool, backed by `search`.
pub fn default_registry(search: Arc<dyn SearchBackend>) -> Result<ToolRegistry, ToolError> {
    ToolRegistry::new()
        .with(SearchKnowledgeTool::new(search.clone()))?
        .with(FetchFilesTool::new(search))?
        .with(FinalAnswerTool)
}
