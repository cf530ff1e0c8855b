//! Shared test helpers for engine tests.

use std::sync::Mutex;

use async_trait::async_trait;
use ctxloom_core::error::{ProviderError, ToolError};
use ctxloom_core::message::{Message, ToolCallRecord};
use ctxloom_core::provider::{CompletionRequest, Provider};
use ctxloom_core::tool::{HookSignal, ToolContext, ToolHandler, ToolOutcome};
use serde::Deserialize;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue and
/// records the request it was given. Panics if more calls are made than
/// responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Message>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers once, with text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Message::assistant(text)])
    }

    /// A provider that first requests `calls`, then answers.
    pub fn tool_then_answer(calls: Vec<ToolCallRecord>, answer: &str) -> Self {
        Self::new(vec![
            Message::assistant_with_tool_calls(None, calls),
            Message::assistant(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests seen so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Message, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let count = requests.len();

        if count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{count}, have {})",
                responses.len()
            );
        }

        requests.push(request);
        Ok(responses[count].clone())
    }
}

/// A tool call with a predictable id.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCallRecord {
    ToolCallRecord::new(format!("call_{name}"), name, args)
}

#[derive(Deserialize)]
pub struct EchoArgs {
    pub text: String,
}

/// Echoes its `text` argument. Setting `stop_after` makes `post_run` stop
/// the loop.
#[derive(Default)]
pub struct EchoTool {
    pub stop_after: bool,
}

#[async_trait]
impl ToolHandler for EchoTool {
    type Args = EchoArgs;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn run(
        &self,
        args: &EchoArgs,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError> {
        Ok(ToolOutcome::text(format!("{}#{}", args.text, ctx.call_index)))
    }

    async fn post_run(&self, _args: &EchoArgs, _ctx: &mut ToolContext<'_>) -> HookSignal {
        if self.stop_after {
            HookSignal::Stop
        } else {
            HookSignal::Continue
        }
    }

    async fn on_validation_error(
        &self,
        _raw_args: &serde_json::Value,
        error: &ToolError,
        _ctx: &mut ToolContext<'_>,
    ) -> ToolOutcome {
        ToolOutcome::text(format!("bad arguments: {error}"))
    }
}
