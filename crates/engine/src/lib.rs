//! The ctxloom engine: the part that turns a persisted conversation into
//! model calls.
//!
//! Each model call follows the same **Build → Complete → Invoke** cycle:
//!
//! 1. **Build** the context: merge system messages, truncate history to the
//!    model window without orphaning tool responses
//! 2. **Reconcile** citations: renumber inline source blocks and re-base the
//!    markers of earlier answers onto one global count
//! 3. **Complete** via the configured provider
//! 4. **Invoke** the requested tools, append one response per call, and
//!    record the round on the user message that started it
//!
//! The loop continues until the model answers without tool calls, a tool
//! asks to stop, or the iteration cap is reached.

pub mod context;
pub mod invoker;
pub mod loop_runner;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use context::{BuiltContext, ContextBuilder, Reconciled, reconcile};
pub use invoker::{InvocationEntry, InvocationReport, ToolInvoker, record_trail};
pub use loop_runner::{CompletionLoop, LoopOutcome, LoopState, Round};
pub use session::{ContextMode, Session, tokenizer_for};
