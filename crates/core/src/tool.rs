//! Tool contracts: what the model can ask the engine to do.
//!
//! A tool type implements [`ToolHandler`]: typed arguments, a `run`, and
//! optional lifecycle hooks. The blanket [`Tool`] impl turns any handler into
//! an object-safe dispatch target that parses raw arguments, drives the hooks,
//! and reports a [`ToolInvocation`]. Handlers are registered once, by name, in
//! a [`ToolRegistry`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::message::Message;

pub const MAX_TOOL_NAME_LEN: usize = 64;
pub const MAX_TOOL_DESCRIPTION_LEN: usize = 1024;
pub const MAX_TOOLS: usize = 128;
/// Registries at or above this size draw a warning; models choose worse.
pub const TOOL_COUNT_WARNING: usize = 10;

/// Name, description, and argument shape sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    /// The function-tool wire shape.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Result of a `pre_run` or `post_run` hook.
///
/// `Stop` from `pre_run` skips `run`; from `post_run` it ends the loop after
/// the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookSignal {
    #[default]
    Continue,
    Stop,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ToolPayload {
    /// A full message; its content and sources become the tool response
    Message(Message),
    Text(String),
    Mapping(serde_json::Map<String, serde_json::Value>),
    #[default]
    None,
}

impl ToolPayload {
    /// Text of the tool response message built from this payload.
    pub fn response_text(&self) -> Option<String> {
        match self {
            ToolPayload::Message(m) => m.content.clone(),
            ToolPayload::Text(s) => Some(s.clone()),
            ToolPayload::Mapping(map) => Some(serde_json::Value::Object(map.clone()).to_string()),
            ToolPayload::None => None,
        }
    }
}

/// A payload plus the explicit continue/stop signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub payload: ToolPayload,
    pub proceed: bool,
}

impl Default for ToolOutcome {
    fn default() -> Self {
        Self::none()
    }
}

impl ToolOutcome {
    pub fn none() -> Self {
        Self {
            payload: ToolPayload::None,
            proceed: true,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: ToolPayload::Text(text.into()),
            proceed: true,
        }
    }

    pub fn message(message: Message) -> Self {
        Self {
            payload: ToolPayload::Message(message),
            proceed: true,
        }
    }

    pub fn mapping(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            payload: ToolPayload::Mapping(map),
            proceed: true,
        }
    }

    /// Same payload, but end the loop after this round.
    pub fn halt(mut self) -> Self {
        self.proceed = false;
        self
    }
}

/// Per-call state handed to every hook.
pub struct ToolContext<'a> {
    pub call_id: &'a str,
    pub tool_name: &'a str,
    /// Position among the calls dispatched so far this round
    pub call_index: usize,
    /// Loop iteration the round belongs to
    pub iteration: usize,
    /// Caller-supplied values shared by every tool in the session
    pub extras: &'a serde_json::Map<String, serde_json::Value>,
    /// Message being streamed into, when the caller supplied one
    pub out: Option<&'a mut Message>,
}

/// The typed side of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    type Args: DeserializeOwned + Send + Sync;

    /// Unique name (≤ 64 chars).
    fn name(&self) -> &str;

    /// Description sent to the model (≤ 1024 chars).
    fn description(&self) -> &str;

    /// JSON Schema describing [`Self::Args`].
    fn parameters_schema(&self) -> serde_json::Value;

    async fn pre_run(&self, _args: &Self::Args, _ctx: &mut ToolContext<'_>) -> HookSignal {
        HookSignal::Continue
    }

    async fn run(
        &self,
        args: &Self::Args,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError>;

    async fn post_run(&self, _args: &Self::Args, _ctx: &mut ToolContext<'_>) -> HookSignal {
        HookSignal::Continue
    }

    /// Called instead of `run` when the arguments do not parse.
    async fn on_validation_error(
        &self,
        _raw_args: &serde_json::Value,
        _error: &ToolError,
        _ctx: &mut ToolContext<'_>,
    ) -> ToolOutcome {
        ToolOutcome::none()
    }
}

static NO_PAYLOAD: ToolPayload = ToolPayload::None;

/// What happened to one requested call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Called {
        pre: HookSignal,
        /// `None` when `pre_run` stopped it
        run: Option<ToolOutcome>,
        post: HookSignal,
    },
    NotCalled {
        handled: ToolOutcome,
        error: ToolError,
    },
}

impl ToolInvocation {
    pub fn is_called(&self) -> bool {
        matches!(self, ToolInvocation::Called { .. })
    }

    /// Whether this call lets the loop go on.
    pub fn proceed(&self) -> bool {
        match self {
            ToolInvocation::Called { run, post, .. } => {
                run.as_ref().is_none_or(|o| o.proceed) && *post == HookSignal::Continue
            }
            ToolInvocation::NotCalled { handled, .. } => handled.proceed,
        }
    }

    /// Payload that becomes the tool response.
    pub fn payload(&self) -> &ToolPayload {
        match self {
            ToolInvocation::Called { run: Some(o), .. } => &o.payload,
            ToolInvocation::Called { run: None, .. } => &NO_PAYLOAD,
            ToolInvocation::NotCalled { handled, .. } => &handled.payload,
        }
    }
}

/// Object-safe dispatch target. Implemented for every [`ToolHandler`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn invoke(
        &self,
        raw_args: &serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> ToolInvocation;
}

#[async_trait]
impl<H: ToolHandler> Tool for H {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    async fn invoke(
        &self,
        raw_args: &serde_json::Value,
        ctx: &mut ToolContext<'_>,
    ) -> ToolInvocation {
        let args: H::Args = match serde_json::from_value(raw_args.clone()) {
            Ok(args) => args,
            Err(e) => {
                let error = ToolError::InvalidArguments {
                    tool_name: self.name().to_string(),
                    reason: e.to_string(),
                };
                warn!(tool = self.name(), call_id = ctx.call_id, error = %error, "Tool arguments failed validation");
                let handled = self.on_validation_error(raw_args, &error, ctx).await;
                return ToolInvocation::NotCalled { handled, error };
            }
        };

        let pre = self.pre_run(&args, ctx).await;
        let run = if pre == HookSignal::Continue {
            Some(match self.run(&args, ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(tool = self.name(), call_id = ctx.call_id, error = %e, "Tool run failed");
                    ToolOutcome::text(format!("Error: {e}"))
                }
            })
        } else {
            debug!(tool = self.name(), call_id = ctx.call_id, "pre_run skipped run");
            None
        };
        let post = self.post_run(&args, ctx).await;

        ToolInvocation::Called { pre, run, post }
    }
}

/// A registry of available tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool after checking the model-facing limits. A second
    /// tool with an existing name is ignored.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), ToolError> {
        let schema = tool.schema();
        if schema.name.chars().count() > MAX_TOOL_NAME_LEN {
            return Err(ToolError::NameTooLong(schema.name));
        }
        if schema.description.chars().count() > MAX_TOOL_DESCRIPTION_LEN {
            return Err(ToolError::DescriptionTooLong(schema.name));
        }
        if self.index.contains_key(&schema.name) {
            warn!(tool = %schema.name, "Tool already registered; keeping the first");
            return Ok(());
        }
        if self.tools.len() + 1 > MAX_TOOLS {
            return Err(ToolError::TooManyTools {
                count: self.tools.len() + 1,
            });
        }

        self.index.insert(schema.name.clone(), self.tools.len());
        self.tools.push(tool);
        if self.tools.len() >= TOOL_COUNT_WARNING {
            warn!(count = self.tools.len(), "Large tool registries degrade tool selection");
        }
        Ok(())
    }

    /// Builder-style [`Self::register`].
    pub fn with(mut self, tool: impl Tool + 'static) -> Result<Self, ToolError> {
        self.register(Box::new(tool))?;
        Ok(self)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&i| self.tools[i].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Schemas of every tool, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.schema()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.schema().name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
