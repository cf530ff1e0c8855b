//! # ctxloom Core
//!
//! Domain types, collaborator traits, and error definitions for the ctxloom
//! conversation engine. Everything the engine needs from the outside world
//! (model invocation, message persistence, content search) is a trait here;
//! implementations live elsewhere.
//!
//! ## Layout
//!
//! - [`message`]: the [`Message`] value object and its tool calls
//! - [`source`]: [`SourceRecord`] and inline citation block rendering
//! - [`sequence`]: [`MessageSequence`], the token-aware history container
//! - [`trail`] / [`expand`]: the persisted tool-call trail and its expansion
//! - [`tool`]: the tool contract, hook signals, and [`ToolRegistry`]
//! - [`provider`], [`store`], [`search`]: collaborator contracts

pub mod error;
pub mod event;
pub mod expand;
pub mod message;
pub mod provider;
pub mod search;
pub mod sequence;
pub mod source;
pub mod store;
pub mod tokenizer;
pub mod tool;
pub mod trail;

// Re-export key types at crate root for ergonomics
pub use error::{BudgetExceeded, Error, Result};
pub use event::{DomainEvent, EventBus, StopReason};
pub use message::{CitationMap, Message, RemoteLink, Role, ToolCallRecord};
pub use provider::{CompletionRequest, ModelLimits, Provider, StreamChunk, ToolChoice, complete_into};
pub use search::{ChunkRecord, FileRecord, SearchBackend, SearchFilters, SearchPaging};
pub use sequence::MessageSequence;
pub use source::SourceRecord;
pub use store::{MessageStore, StoredMessage};
pub use tokenizer::{CharTokenizer, HeuristicTokenizer, Tokenizer};
pub use tool::{
    HookSignal, Tool, ToolContext, ToolHandler, ToolInvocation, ToolOutcome, ToolPayload,
    ToolRegistry, ToolSchema,
};
pub use trail::{TrailRecord, ToolTrail};
