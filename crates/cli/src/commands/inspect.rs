//! `ctxloom inspect`: replay a persisted transcript through the context
//! pipeline without calling a model.
//!
//! The transcript is rehydrated and expanded exactly as a session would load
//! it, then built against the model's limits and reconciled. The report shows
//! what the next model call would receive.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use ctxloom_core::expand::expand;
use ctxloom_core::message::{Message, Role};
use ctxloom_core::sequence::MessageSequence;
use ctxloom_core::source::SourceRecord;
use ctxloom_core::store::MessageStore;
use ctxloom_core::trail::ToolTrail;
use ctxloom_engine::{ContextBuilder, reconcile, tokenizer_for};
use ctxloom_memory::JsonlStore;
use tracing::debug;

use super::load_config;

/// Longest message preview printed per line.
const PREVIEW_CHARS: usize = 72;

#[derive(Debug, Clone, Default)]
pub struct InspectOptions {
    pub model: Option<String>,
    pub budget: Option<usize>,
    pub show_messages: bool,
}

/// What the next model call would receive.
#[derive(Debug)]
pub struct InspectReport {
    pub model: String,
    /// Messages in the transcript file
    pub stored: usize,
    /// Messages after dropping empty turns and splicing trails back in
    pub expanded: usize,
    pub window: usize,
    pub history_budget: usize,
    pub removed: usize,
    pub context_tokens: usize,
    pub existing: Vec<SourceRecord>,
    pub new: Vec<SourceRecord>,
    pub context: Vec<Message>,
}

pub async fn run(
    config_path: Option<&Path>,
    transcript: &Path,
    options: &InspectOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if !transcript.exists() {
        return Err(format!("Transcript not found: {}", transcript.display()).into());
    }
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let store = JsonlStore::open(transcript);

    let report = report(&config, &store, options).await?;
    debug!(
        transcript = %transcript.display(),
        model = %report.model,
        removed = report.removed,
        "Transcript inspected"
    );
    print!("{report}");
    if options.show_messages {
        println!();
        for (index, message) in report.context.iter().enumerate() {
            println!("{}", describe(index, message));
        }
    }
    Ok(())
}

/// Run the load, build, and reconcile pipeline over `store`.
pub async fn report(
    config: &ctxloom_config::EngineConfig,
    store: &dyn MessageStore,
    options: &InspectOptions,
) -> ctxloom_core::Result<InspectReport> {
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.default_model.clone());

    let stored = store.list().await?;
    let stored_count = stored.len();
    let mut messages = Vec::with_capacity(stored_count);
    for message in stored {
        messages.push(Message::from_stored(message)?);
    }

    let tokenizer = tokenizer_for(config);
    let mut history = MessageSequence::from_messages(messages, Arc::clone(&tokenizer));
    history.retain(|m| !m.is_empty_turn() || ToolTrail::is_carried_by(m));
    expand(&mut history);
    let expanded = history.len();
    history.retain(|m| !(m.role == Role::Assistant && m.is_empty_turn()));

    let window_override = options.budget.or(config.context_window_token_limit);
    let builder =
        ContextBuilder::new(config.model_limits(&model)).with_window_override(window_override);
    let built = builder.build(&history)?;
    let reconciled = reconcile(&built.sequence);

    Ok(InspectReport {
        model,
        stored: stored_count,
        expanded,
        window: builder.effective_window(),
        history_budget: built.history_budget,
        removed: built.removed,
        context_tokens: reconciled.sequence.token_count(),
        existing: reconciled.existing,
        new: reconciled.new,
        context: reconciled.sequence.into_vec(),
    })
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model:           {}", self.model)?;
        writeln!(f, "Stored messages: {}", self.stored)?;
        writeln!(f, "Expanded:        {}", self.expanded)?;
        writeln!(f, "Window:          {} tokens", self.window)?;
        writeln!(f, "History budget:  {} tokens", self.history_budget)?;
        writeln!(f, "Dropped:         {} messages", self.removed)?;
        writeln!(
            f,
            "Context:         {} messages, {} tokens",
            self.context.len(),
            self.context_tokens
        )?;
        writeln!(
            f,
            "Sources:         {} existing, {} new",
            self.existing.len(),
            self.new.len()
        )?;
        let all = self.existing.iter().chain(self.new.iter());
        for (index, source) in all.enumerate() {
            writeln!(f, "  [source{index}] {} ({})", source.key, source.chunk_id)?;
        }
        Ok(())
    }
}

fn describe(index: usize, message: &Message) -> String {
    let mut line = format!("{index:>3} {:<9}", message.role.as_str());
    if !message.tool_calls.is_empty() {
        let names: Vec<&str> = message.tool_calls.iter().map(|c| c.name.as_str()).collect();
        line.push_str(&format!(" calls {}", names.join(", ")));
    }
    if let Some(id) = &message.tool_call_id {
        line.push_str(&format!(" <- {id}"));
    }
    let text = message.model_text().replace('\n', " ");
    if !text.is_empty() {
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        let ellipsis = if text.chars().count() > PREVIEW_CHARS { "..." } else { "" };
        line.push_str(&format!(" {preview}{ellipsis}"));
    }
    line
}
