//! Error types for the ctxloom domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ctxloom operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context budget ---
    #[error("Context budget exceeded: {0}")]
    Budget(#[from] BudgetExceeded),

    // --- Message shape ---
    #[error("Malformed message: {0}")]
    MessageFormat(#[from] MessageFormatError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Collaborator errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    // --- Loop control ---
    #[error("Completion loop reached its maximum of {max_iterations} iterations")]
    MaxIterationsReached { max_iterations: usize },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// No room is left for any history once system content and the model's
/// output reserve are accounted for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "no room for history: window {window} - output reserve {output_reserve} - system {system_tokens} = {remaining}"
)]
pub struct BudgetExceeded {
    pub window: usize,
    pub output_reserve: usize,
    pub system_tokens: usize,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageFormatError {
    #[error("tool message without a tool_call_id")]
    ToolMessageWithoutToolCallId,

    #[error("{role} message carries tool calls; only assistant messages may")]
    NonAssistantMessageWithToolCalls { role: String },

    #[error("unknown role: {0}")]
    InvalidRole(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("Tool not registered: {0}")]
    NotRegistered(String),

    #[error("Invalid tool arguments for {tool_name}: {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool name exceeds 64 characters: {0}")]
    NameTooLong(String),

    #[error("Tool description exceeds 1024 characters: {0}")]
    DescriptionTooLong(String),

    #[error("Too many tools registered: {count} (max 128)")]
    TooManyTools { count: usize },
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed completion: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Message has no remote counterpart")]
    NoRemote,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid search filters: {0}")]
    InvalidFilters(String),
}
