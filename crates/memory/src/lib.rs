//! Message store and search implementations for ctxloom.

pub mod file_backend;
pub mod in_memory;
pub mod search;

pub use file_backend::JsonlStore;
pub use in_memory::InMemoryStore;
pub use search::InMemorySearch;
