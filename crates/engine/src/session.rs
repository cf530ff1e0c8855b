//! Per-conversation state: the rehydrated history plus everything needed to
//! continue it.

use std::sync::Arc;

use ctxloom_config::{EngineConfig, TokenizerKind};
use ctxloom_core::event::EventBus;
use ctxloom_core::expand::expand;
use ctxloom_core::message::{Message, RemoteLink, Role, SOURCES_KEY};
use ctxloom_core::provider::Provider;
use ctxloom_core::sequence::MessageSequence;
use ctxloom_core::store::MessageStore;
use ctxloom_core::tokenizer::{CharTokenizer, HeuristicTokenizer, Tokenizer};
use ctxloom_core::tool::ToolRegistry;
use ctxloom_core::trail::ToolTrail;
use tracing::{debug, info, warn};

use crate::loop_runner::{CompletionLoop, LoopOutcome};

/// Debug key holding failure details on the user message.
pub const FAILURE_DEBUG_KEY: &str = "_debug";

/// How [`Session::set_context`] combines new messages with the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    Append,
    Prepend,
    Replace,
}

/// The tokenizer selected by `config`.
pub fn tokenizer_for(config: &EngineConfig) -> Arc<dyn Tokenizer> {
    match config.tokenizer {
        TokenizerKind::Heuristic => Arc::new(HeuristicTokenizer),
        TokenizerKind::Char => Arc::new(CharTokenizer),
        TokenizerKind::Bpe => bpe_tokenizer(&config.default_model),
    }
}

#[cfg(feature = "tiktoken")]
fn bpe_tokenizer(model: &str) -> Arc<dyn Tokenizer> {
    match ctxloom_core::tokenizer::BpeTokenizer::for_model(model) {
        Ok(tokenizer) => Arc::new(tokenizer),
        Err(e) => {
            warn!(model, error = %e, "BPE tokenizer unavailable, using the heuristic");
            Arc::new(HeuristicTokenizer)
        }
    }
}

#[cfg(not(feature = "tiktoken"))]
fn bpe_tokenizer(model: &str) -> Arc<dyn Tokenizer> {
    warn!(model, "Built without the tiktoken feature, using the heuristic tokenizer");
    Arc::new(HeuristicTokenizer)
}

/// One conversation, loaded from its store.
pub struct Session {
    config: EngineConfig,
    runner: CompletionLoop,
    store: Arc<dyn MessageStore>,
    context: MessageSequence,
    extras: serde_json::Map<String, serde_json::Value>,
}

impl Session {
    /// Load the persisted conversation: rehydrate, drop empty turns, and
    /// splice the recorded tool trails back in.
    pub async fn load(
        config: EngineConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn MessageStore>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> ctxloom_core::Result<Self> {
        let stored = store.list().await?;
        let mut messages = Vec::with_capacity(stored.len());
        for message in stored {
            messages.push(Message::from_stored(message)?);
        }

        let mut context = MessageSequence::from_messages(messages, tokenizer_for(&config));
        context.retain(|m| !m.is_empty_turn() || ToolTrail::is_carried_by(m));
        expand(&mut context);

        info!(
            messages = context.len(),
            model = %config.default_model,
            "Session loaded"
        );

        let runner = CompletionLoop::from_config(&config, provider, store.clone(), tools, event_bus);
        Ok(Self {
            config,
            runner,
            store,
            context,
            extras: serde_json::Map::new(),
        })
    }

    pub fn context(&self) -> &MessageSequence {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Values handed to every tool hook.
    pub fn extras(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.extras
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extras.insert(key.into(), value);
    }

    /// Put `messages` into the in-memory history. Nothing is persisted.
    pub fn set_context(&mut self, messages: Vec<Message>, mode: ContextMode) {
        match mode {
            ContextMode::Append => self.context.extend(messages),
            ContextMode::Prepend => self.context.prepend(messages),
            ContextMode::Replace => {
                self.context.clear();
                self.context.extend(messages);
            }
        }
    }

    /// One completion without tools. `message`, when given, is persisted
    /// and appended first; so is the answer.
    pub async fn complete(&mut self, message: Option<Message>) -> ctxloom_core::Result<Message> {
        if let Some(message) = message {
            self.push_persisted(message).await?;
        }
        let mut answer = self.runner.complete_once(&mut self.context, None).await?;
        self.persist(&mut answer).await?;
        self.context.push(answer.clone());
        Ok(answer)
    }

    /// Persist and append `message`, then run the completion loop.
    pub async fn call(&mut self, message: Message) -> ctxloom_core::Result<LoopOutcome> {
        self.push_persisted(message).await?;
        self.run_loop(None).await
    }

    /// Run the completion loop over the current history. A final text
    /// answer is persisted.
    pub async fn run_loop(&mut self, out: Option<&mut Message>) -> ctxloom_core::Result<LoopOutcome> {
        let outcome = self.runner.run(&mut self.context, &self.extras, out).await?;

        let answered = self
            .context
            .last(|_| true)
            .is_some_and(|m| m.role == Role::Assistant && m.tool_calls.is_empty());
        if answered {
            let store = self.store.clone();
            if let Some(answer) = self.context.last_mut(|_| true) {
                persist_with(store.as_ref(), answer).await?;
            }
        }
        Ok(outcome)
    }

    /// Stream one completion into the trailing empty assistant message, or
    /// a fresh one.
    pub async fn stream(&mut self, message: Option<Message>) -> ctxloom_core::Result<Message> {
        if let Some(message) = message {
            self.push_persisted(message).await?;
        }

        let trailing_empty = self
            .context
            .last(|_| true)
            .is_some_and(|m| m.role == Role::Assistant && m.is_empty_turn());
        let mut out = if trailing_empty {
            self.context.pop().unwrap_or_else(|| Message::assistant(""))
        } else {
            Message::assistant("")
        };

        self.runner.complete_once(&mut self.context, Some(&mut out)).await?;

        if out.is_persisted() {
            let content = out.content.clone();
            out.update(self.store.as_ref(), content, serde_json::Map::new())
                .await?;
        } else {
            self.persist(&mut out).await?;
        }
        self.context.push(out.clone());
        Ok(out)
    }

    /// Delete every persisted message and empty the history.
    pub async fn clear(&mut self) -> ctxloom_core::Result<()> {
        let mut deleted = 0;
        for message in self.context.iter().filter(|m| m.is_persisted()) {
            message.delete(self.store.as_ref()).await?;
            deleted += 1;
        }
        self.context.clear();
        info!(deleted, "Session cleared");
        Ok(())
    }

    /// Record `error` on the last user message and replace the answer to it
    /// with the configured failure message.
    pub async fn handle_failure(
        &mut self,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> ctxloom_core::Result<()> {
        let error_text = error.to_string();
        warn!(error = %error_text, "Completion failed, writing failure message");
        let store = self.store.clone();

        let user_index = self.context.rposition(|m| m.role == Role::User);
        if let Some(user) = user_index.and_then(|i| self.context.get_mut(i)) {
            let mut patch = serde_json::Map::new();
            patch.insert(
                FAILURE_DEBUG_KEY.to_string(),
                serde_json::json!({ "error": error_text }),
            );
            let content = user.content.clone();
            user.update(store.as_ref(), content, patch).await?;
        }

        let mut text = self.config.failure.message().to_string();
        if self.config.failure.display_error {
            text.push_str(&format!("\n\n```\n{error_text}\n```"));
        }

        let answer_index = self
            .context
            .rposition(|m| m.role == Role::Assistant)
            .filter(|&i| user_index.is_none_or(|u| i > u));
        if let Some(answer) = answer_index.and_then(|i| self.context.get_mut(i)) {
            answer.update(store.as_ref(), Some(text), serde_json::Map::new()).await?;
            return Ok(());
        }
        let mut answer = Message::assistant(text);
        self.persist(&mut answer).await?;
        self.context.push(answer);
        Ok(())
    }

    async fn push_persisted(&mut self, mut message: Message) -> ctxloom_core::Result<()> {
        self.persist(&mut message).await?;
        self.context.push(message);
        Ok(())
    }

    async fn persist(&self, message: &mut Message) -> ctxloom_core::Result<()> {
        persist_with(self.store.as_ref(), message).await
    }
}

/// Create `message` in `store` unless it already has a remote link.
async fn persist_with(store: &dyn MessageStore, message: &mut Message) -> ctxloom_core::Result<()> {
    if message.is_persisted() {
        return Ok(());
    }
    let mut debug = serde_json::Map::new();
    if !message.sources.is_empty() {
        debug.insert(SOURCES_KEY.to_string(), serde_json::to_value(&message.sources)?);
    }
    let stored = store
        .create(message.role.as_str(), message.content.as_deref(), debug)
        .await?;
    debug!(id = %stored.id, role = %message.role, "Message persisted");
    message.remote = Some(RemoteLink {
        id: stored.id,
        debug: stored.debug,
    });
    Ok(())
}
