//! Per-call context assembly.
//!
//! System instructions are deduplicated and merged into one leading
//! message; the rest of the history is truncated to whatever the model
//! window leaves once the system text and the output reserve are paid for.

use ctxloom_core::error::BudgetExceeded;
use ctxloom_core::message::{Message, Role};
use ctxloom_core::provider::ModelLimits;
use ctxloom_core::sequence::MessageSequence;
use tracing::{debug, warn};

/// The assembled context plus what truncation did to it.
#[derive(Debug, Clone)]
pub struct BuiltContext {
    pub sequence: MessageSequence,
    /// Tokens left for non-system history
    pub history_budget: usize,
    /// Non-system messages dropped by truncation
    pub removed: usize,
}

/// Builds the message list for one model call.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    limits: ModelLimits,
    window_override: Option<usize>,
}

impl ContextBuilder {
    pub fn new(limits: ModelLimits) -> Self {
        Self {
            limits,
            window_override: None,
        }
    }

    /// Tighten the model window. An override above the model window is
    /// ignored.
    pub fn with_window_override(mut self, limit: Option<usize>) -> Self {
        self.window_override = limit;
        self
    }

    /// The window actually used.
    pub fn effective_window(&self) -> usize {
        match self.window_override {
            Some(limit) if limit <= self.limits.context_window => limit,
            Some(limit) => {
                warn!(
                    limit,
                    model_window = self.limits.context_window,
                    "Context limit override exceeds the model window; ignoring it"
                );
                self.limits.context_window
            }
            None => self.limits.context_window,
        }
    }

    pub fn build(&self, sequence: &MessageSequence) -> Result<BuiltContext, BudgetExceeded> {
        let mut system_parts: Vec<&str> = Vec::new();
        for message in sequence.iter().filter(|m| m.role == Role::System) {
            let text = message.text();
            if text.is_empty() || system_parts.contains(&text) {
                continue;
            }
            system_parts.push(text);
        }
        let merged = (!system_parts.is_empty()).then(|| Message::system(system_parts.join("\n")));
        let system_tokens = merged.as_ref().map_or(0, |m| sequence.message_tokens(m));

        let window = self.effective_window();
        let remaining = window as i64 - self.limits.max_output_tokens as i64 - system_tokens as i64;
        if remaining <= 0 {
            return Err(BudgetExceeded {
                window,
                output_reserve: self.limits.max_output_tokens,
                system_tokens,
                remaining,
            });
        }
        let history_budget = remaining as usize;

        let mut history = sequence.filter(|m| m.role != Role::System);
        let removed = history.truncate_in_place(history_budget);
        if let Some(system) = merged {
            history.insert(0, system);
        }

        debug!(
            window,
            system_tokens,
            history_budget,
            removed,
            messages = history.len(),
            "Context built"
        );

        Ok(BuiltContext {
            sequence: history,
            history_budget,
            removed,
        })
    }
}
