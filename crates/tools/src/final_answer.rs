//! Final answer tool: lets the model end the loop explicitly.

use async_trait::async_trait;
use ctxloom_core::error::ToolError;
use ctxloom_core::tool::{HookSignal, ToolContext, ToolHandler, ToolOutcome};
use serde::Deserialize;
use tracing::debug;

pub struct FinalAnswerTool;

#[derive(Debug, Deserialize)]
pub struct FinalAnswerArgs {
    pub answer: String,
}

#[async_trait]
impl ToolHandler for FinalAnswerTool {
    type Args = FinalAnswerArgs;

    fn name(&self) -> &str {
        "final_answer"
    }

    fn description(&self) -> &str {
        "Give the final answer to the user. No further tools run after this."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": { "type": "string" }
            },
            "required": ["answer"]
        })
    }

    async fn run(
        &self,
        args: &FinalAnswerArgs,
        ctx: &mut ToolContext<'_>,
    ) -> Result<ToolOutcome, ToolError> {
        if let Some(out) = ctx.out.as_deref_mut() {
            out.content = Some(args.answer.clone());
        }
        Ok(ToolOutcome::text(args.answer.clone()))
    }

    async fn post_run(&self, _args: &FinalAnswerArgs, ctx: &mut ToolContext<'_>) -> HookSignal {
        debug!(call_id = ctx.call_id, "Final answer given, stopping");
        HookSignal::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxloom_core::message::Message;
    use ctxloom_core::tool::{Tool, ToolPayload};

    #[tokio::test]
    async fn answer_stops_the_loop_and_fills_out() {
        let extras = serde_json::Map::new();
        let mut out = Message::assistant("");
        let mut ctx = ToolContext {
            call_id: "tc1",
            tool_name: "final_answer",
            call_index: 0,
            iteration: 2,
            extras: &extras,
            out: Some(&mut out),
        };
        let invocation = FinalAnswerTool
            .invoke(&serde_json::json!({"answer": "42"}), &mut ctx)
            .await;

        assert!(invocation.is_called());
        assert!(!invocation.proceed());
        assert_eq!(invocation.payload(), &ToolPayload::Text("42".into()));
        assert_eq!(out.text(), "42");
    }

    #[tokio::test]
    async fn missing_answer_is_not_called() {
        let extras = serde_json::Map::new();
        let mut ctx = ToolContext {
            call_id: "tc1",
            tool_name: "final_answer",
            call_index: 0,
            iteration: 1,
            extras: &extras,
            out: None,
        };
        let invocation = FinalAnswerTool.invoke(&serde_json::json!({}), &mut ctx).await;
        assert!(!invocation.is_called());
        assert!(invocation.proceed());
    }
}
