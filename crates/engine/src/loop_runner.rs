//! The tool-calling completion loop.

use std::sync::Arc;

use chrono::Utc;
use ctxloom_config::EngineConfig;
use ctxloom_core::event::{DomainEvent, EventBus, StopReason};
use ctxloom_core::message::{Message, Role};
use ctxloom_core::provider::{CompletionRequest, ModelLimits, Provider, ToolChoice, complete_into};
use ctxloom_core::sequence::MessageSequence;
use ctxloom_core::store::MessageStore;
use ctxloom_core::tool::ToolRegistry;
use tracing::{debug, info, warn};

use crate::context::{ContextBuilder, Reconciled, reconcile};
use crate::invoker::{InvocationEntry, ToolInvoker, record_trail};

/// Where the loop is. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Building,
    Completing,
    Invoking,
    Stopped,
}

/// One iteration: the model's answer and what its tool calls did.
#[derive(Debug, Clone)]
pub struct Round {
    pub assistant: Message,
    pub called: Vec<InvocationEntry>,
    pub not_called: Vec<InvocationEntry>,
}

/// What a finished loop hands back.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub rounds: Vec<Round>,
    pub reason: StopReason,
}

impl LoopOutcome {
    /// The last assistant message, if any round ran.
    pub fn answer(&self) -> Option<&Message> {
        self.rounds.last().map(|r| &r.assistant)
    }
}

/// Drives build → complete → invoke until the model stops calling tools, a
/// tool asks to stop, or the iteration cap is hit.
pub struct CompletionLoop {
    /// The model provider
    provider: Arc<dyn Provider>,

    /// Where the tool trail is persisted
    store: Arc<dyn MessageStore>,

    tools: Arc<ToolRegistry>,

    event_bus: Arc<EventBus>,

    model: String,

    temperature: f32,

    limits: ModelLimits,

    /// Caller cap on the model window
    window_override: Option<usize>,

    max_iterations: usize,

    raise_on_max_iterations: bool,

    raise_on_missing_tool: bool,

    tool_choice: Option<ToolChoice>,

    response_schema: Option<serde_json::Value>,
}

impl CompletionLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn MessageStore>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
        model: impl Into<String>,
        limits: ModelLimits,
    ) -> Self {
        Self {
            provider,
            store,
            tools,
            event_bus,
            model: model.into(),
            temperature: 0.0,
            limits,
            window_override: None,
            max_iterations: 5,
            raise_on_max_iterations: false,
            raise_on_missing_tool: false,
            tool_choice: None,
            response_schema: None,
        }
    }

    /// A loop for the configured default model.
    pub fn from_config(
        config: &EngineConfig,
        provider: Arc<dyn Provider>,
        store: Arc<dyn MessageStore>,
        tools: Arc<ToolRegistry>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let limits = config.model_limits(&config.default_model);
        Self::new(provider, store, tools, event_bus, config.default_model.clone(), limits)
            .with_temperature(config.temperature)
            .with_window_override(config.context_window_token_limit)
            .with_max_iterations(config.function_call_max_iterations)
            .with_raise_on_max_iterations(config.raise_on_max_iterations)
            .with_raise_on_missing_tool(config.raise_on_missing_tool)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_window_override(mut self, limit: Option<usize>) -> Self {
        self.window_override = limit;
        self
    }

    /// Set the maximum number of model calls per loop.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_raise_on_max_iterations(mut self, raise: bool) -> Self {
        self.raise_on_max_iterations = raise;
        self
    }

    pub fn with_raise_on_missing_tool(mut self, raise: bool) -> Self {
        self.raise_on_missing_tool = raise;
        self
    }

    pub fn with_tool_choice(mut self, choice: Option<ToolChoice>) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_response_schema(mut self, schema: Option<serde_json::Value>) -> Self {
        self.response_schema = schema;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Drop empty assistant turns, build, and reconcile `history` for one
    /// model call.
    fn prepare(&self, history: &mut MessageSequence) -> ctxloom_core::Result<Reconciled> {
        history.retain(|m| !(m.role == Role::Assistant && m.is_empty_turn()));

        let built = ContextBuilder::new(self.limits)
            .with_window_override(self.window_override)
            .build(history)?;
        if built.removed > 0 {
            self.event_bus.publish(DomainEvent::ContextTruncated {
                removed: built.removed,
                budget: built.history_budget,
                timestamp: Utc::now(),
            });
        }
        Ok(reconcile(&built.sequence))
    }

    /// The request for one model call. `with_tools` is false for a plain
    /// completion.
    fn request(&self, reconciled: &Reconciled, with_tools: bool) -> CompletionRequest {
        let tools = if with_tools {
            self.tools.schemas()
        } else {
            Vec::new()
        };
        let tool_choice = if tools.is_empty() {
            None
        } else {
            self.tool_choice.clone()
        };
        CompletionRequest {
            model: self.model.clone(),
            messages: reconciled.sequence.as_slice().to_vec(),
            tools,
            tool_choice,
            response_schema: self.response_schema.clone(),
            temperature: self.temperature,
            max_tokens: (self.limits.max_output_tokens > 0).then_some(self.limits.max_output_tokens),
            sources: reconciled.citation_context(),
        }
    }

    /// One model call without tools. The answer is returned, not appended.
    pub async fn complete_once(
        &self,
        history: &mut MessageSequence,
        out: Option<&mut Message>,
    ) -> ctxloom_core::Result<Message> {
        let reconciled = self.prepare(history)?;
        let request = self.request(&reconciled, false);
        self.event_bus.publish(DomainEvent::CompletionRequested {
            model: self.model.clone(),
            iteration: 1,
            messages: request.messages.len(),
            context_tokens: reconciled.sequence.token_count(),
            timestamp: Utc::now(),
        });
        Ok(complete_into(self.provider.as_ref(), request, out).await?)
    }

    /// Run the loop over `history`, appending every assistant turn and tool
    /// response to it.
    ///
    /// With `out`, completions stream into it. Tool calls streamed into it
    /// are moved onto the round's assistant message once dispatched.
    pub async fn run(
        &self,
        history: &mut MessageSequence,
        extras: &serde_json::Map<String, serde_json::Value>,
        mut out: Option<&mut Message>,
    ) -> ctxloom_core::Result<LoopOutcome> {
        let invoker = ToolInvoker::new(self.tools.clone(), self.event_bus.clone())
            .with_raise_on_missing_tool(self.raise_on_missing_tool);
        let mut rounds = Vec::new();
        let mut iteration = 0;

        let reason = loop {
            if iteration >= self.max_iterations {
                warn!(
                    max_iterations = self.max_iterations,
                    "Completion loop reached its iteration cap"
                );
                self.stopped(iteration, StopReason::MaxIterations);
                if self.raise_on_max_iterations {
                    return Err(ctxloom_core::Error::MaxIterationsReached {
                        max_iterations: self.max_iterations,
                    });
                }
                break StopReason::MaxIterations;
            }
            iteration += 1;

            let mut state = LoopState::Building;
            debug!(iteration, ?state, "Completion loop iteration");
            let reconciled = self.prepare(history)?;
            let request = self.request(&reconciled, true);

            state = LoopState::Completing;
            debug!(iteration, ?state, messages = request.messages.len(), "Requesting completion");
            self.event_bus.publish(DomainEvent::CompletionRequested {
                model: self.model.clone(),
                iteration,
                messages: request.messages.len(),
                context_tokens: reconciled.sequence.token_count(),
                timestamp: Utc::now(),
            });
            let assistant =
                complete_into(self.provider.as_ref(), request, out.as_deref_mut()).await?;

            if assistant.tool_calls.is_empty() {
                history.push(assistant.clone());
                rounds.push(Round {
                    assistant,
                    called: Vec::new(),
                    not_called: Vec::new(),
                });
                break StopReason::NoToolCalls;
            }

            state = LoopState::Invoking;
            debug!(iteration, ?state, calls = assistant.tool_calls.len(), "Dispatching tools");
            if let Some(out) = out.as_deref_mut() {
                out.tool_calls.clear();
            }
            let report = invoker
                .invoke(&assistant, iteration, extras, out.as_deref_mut())
                .await?;

            history.push(assistant.clone());
            history.extend(report.tool_messages.iter().cloned());
            let mut round_messages = Vec::with_capacity(report.tool_messages.len() + 1);
            round_messages.push(assistant.clone());
            round_messages.extend(report.tool_messages.iter().cloned());
            record_trail(history, self.store.as_ref(), &round_messages).await?;

            let proceed = report.complete();
            let dispatched = report.dispatched_any();
            rounds.push(Round {
                assistant,
                called: report.called,
                not_called: report.not_called,
            });

            if !proceed {
                let reason = if dispatched {
                    StopReason::ToolRequestedStop
                } else {
                    StopReason::NothingDispatched
                };
                break reason;
            }
        };

        if reason != StopReason::MaxIterations {
            self.stopped(iteration, reason);
        }
        Ok(LoopOutcome { rounds, reason })
    }

    fn stopped(&self, iterations: usize, reason: StopReason) {
        info!(iterations, ?reason, state = ?LoopState::Stopped, "Completion loop stopped");
        self.event_bus.publish(DomainEvent::LoopStopped {
            iterations,
            reason,
            timestamp: Utc::now(),
        });
    }
}
