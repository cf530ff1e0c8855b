//! Tool dispatch for one assistant turn.

use std::sync::Arc;

use chrono::Utc;
use ctxloom_core::error::{StoreError, ToolError};
use ctxloom_core::event::{DomainEvent, EventBus};
use ctxloom_core::message::{Message, Role, ToolCallRecord};
use ctxloom_core::sequence::MessageSequence;
use ctxloom_core::store::MessageStore;
use ctxloom_core::tool::{ToolContext, ToolInvocation, ToolPayload, ToolRegistry};
use ctxloom_core::trail::{ToolTrail, TrailRecord};
use tracing::{debug, info, warn};

/// One requested call and what became of it.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationEntry {
    pub call: ToolCallRecord,
    pub invocation: ToolInvocation,
}

/// Everything one round of dispatch produced.
#[derive(Debug, Clone, Default)]
pub struct InvocationReport {
    /// Calls whose arguments parsed and whose hooks ran
    pub called: Vec<InvocationEntry>,
    /// Calls whose arguments failed validation
    pub not_called: Vec<InvocationEntry>,
    /// Calls naming a tool the registry does not know
    pub unregistered: Vec<ToolCallRecord>,
    /// One tool response per requested call, in request order
    pub tool_messages: Vec<Message>,
}

impl InvocationReport {
    /// Whether anything reached a tool.
    pub fn dispatched_any(&self) -> bool {
        !self.called.is_empty() || !self.not_called.is_empty()
    }

    /// Continuation signal: something was dispatched and nothing asked to
    /// stop.
    pub fn complete(&self) -> bool {
        self.dispatched_any()
            && self
                .called
                .iter()
                .chain(self.not_called.iter())
                .all(|e| e.invocation.proceed())
    }
}

/// Dispatches the tool calls of an assistant message against a registry.
pub struct ToolInvoker {
    tools: Arc<ToolRegistry>,
    event_bus: Arc<EventBus>,
    raise_on_missing_tool: bool,
}

impl ToolInvoker {
    pub fn new(tools: Arc<ToolRegistry>, event_bus: Arc<EventBus>) -> Self {
        Self {
            tools,
            event_bus,
            raise_on_missing_tool: false,
        }
    }

    /// Fail the round on a call to an unknown tool instead of answering it
    /// with an error message.
    pub fn with_raise_on_missing_tool(mut self, raise: bool) -> Self {
        self.raise_on_missing_tool = raise;
        self
    }

    /// Run every call of `assistant`, strictly in order.
    pub async fn invoke(
        &self,
        assistant: &Message,
        iteration: usize,
        extras: &serde_json::Map<String, serde_json::Value>,
        mut out: Option<&mut Message>,
    ) -> Result<InvocationReport, ToolError> {
        let mut report = InvocationReport::default();
        let mut call_index = 0;

        for call in &assistant.tool_calls {
            let Some(tool) = self.tools.get(&call.name) else {
                if self.raise_on_missing_tool {
                    return Err(ToolError::NotRegistered(call.name.clone()));
                }
                warn!(tool = %call.name, call_id = %call.id, "Model called an unregistered tool");
                self.publish(call, false, true);
                report.tool_messages.push(Message::tool_result(
                    call.id.clone(),
                    Some(format!("Error: tool '{}' is not registered", call.name)),
                ));
                report.unregistered.push(call.clone());
                continue;
            };

            let mut ctx = ToolContext {
                call_id: &call.id,
                tool_name: &call.name,
                call_index,
                iteration,
                extras,
                out: out.as_deref_mut(),
            };
            let invocation = tool.invoke(&call.arguments, &mut ctx).await;

            let proceed = invocation.proceed();
            if !proceed {
                info!(tool = %call.name, call_id = %call.id, "Tool asked to stop the loop");
            }
            debug!(
                tool = %call.name,
                call_id = %call.id,
                call_index,
                called = invocation.is_called(),
                "Tool dispatched"
            );
            self.publish(call, invocation.is_called(), proceed);

            report
                .tool_messages
                .push(response_message(&call.id, invocation.payload()));
            let entry = InvocationEntry {
                call: call.clone(),
                invocation,
            };
            if entry.invocation.is_called() {
                call_index += 1;
                report.called.push(entry);
            } else {
                report.not_called.push(entry);
            }
        }

        Ok(report)
    }

    fn publish(&self, call: &ToolCallRecord, called: bool, proceed: bool) {
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            called,
            proceed,
            timestamp: Utc::now(),
        });
    }
}

/// The tool message answering `call_id`. A message payload lends its
/// sources so the reconciler can count them as known.
fn response_message(call_id: &str, payload: &ToolPayload) -> Message {
    let mut message = Message::tool_result(call_id, payload.response_text());
    if let ToolPayload::Message(produced) = payload {
        message.original_content = produced.original_content.clone();
        message.sources = produced.sources.clone();
    }
    message
}

/// Append `round` to the trail of the most recent persisted user message.
///
/// Returns `false` when no such message exists, or when it already holds a
/// trail of another version; the round then lives only in memory.
pub async fn record_trail(
    history: &mut MessageSequence,
    store: &dyn MessageStore,
    round: &[Message],
) -> Result<bool, StoreError> {
    let Some(user) = history.last_mut(|m| m.role == Role::User && m.is_persisted()) else {
        debug!("No persisted user message; tool trail not recorded");
        return Ok(false);
    };

    let records: Vec<TrailRecord> = round.iter().map(TrailRecord::from_message).collect();
    let existing = user.debug().cloned().unwrap_or_default();
    let Some(patch) = ToolTrail::appended(&existing, &records) else {
        warn!(
            message_id = user.id().unwrap_or_default(),
            "User message holds a tool trail of another version; not recording this round"
        );
        return Ok(false);
    };
    let content = user.content.clone();
    user.update(store, content, patch).await?;

    debug!(records = records.len(), "Tool trail recorded");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{EchoTool, make_tool_call};
    use ctxloom_core::source::SourceRecord;
    use ctxloom_core::store::MessageStore;
    use ctxloom_core::tool::{ToolHandler, ToolOutcome};
    use ctxloom_core::trail::{TRAIL_KEY, TRAIL_VERSION_KEY};
    use ctxloom_memory::InMemoryStore;

    struct SourcedTool;

    #[async_trait::async_trait]
    impl ToolHandler for SourcedTool {
        type Args = serde_json::Value;

        fn name(&self) -> &str {
            "sourced"
        }
        fn description(&self) -> &str {
            "Returns a message with sources"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }

        async fn run(
            &self,
            _args: &serde_json::Value,
            _ctx: &mut ToolContext<'_>,
        ) -> Result<ToolOutcome, ToolError> {
            let source = SourceRecord::new("f1", "c1", "guide.pdf", "content://f1");
            Ok(ToolOutcome::message(
                Message::assistant("<source0 id=\"f1\">text</source0>").with_sources(vec![source]),
            ))
        }
    }

    fn invoker(registry: ToolRegistry) -> ToolInvoker {
        ToolInvoker::new(Arc::new(registry), Arc::new(EventBus::default()))
    }

    fn echo_registry(stop_after: bool) -> ToolRegistry {
        ToolRegistry::new().with(EchoTool { stop_after }).unwrap()
    }

    fn extras() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[tokio::test]
    async fn dispatches_in_order_with_one_response_per_call() {
        let calls = vec![
            ToolCallRecord::new("a", "echo", serde_json::json!({"text": "one"})),
            ToolCallRecord::new("b", "echo", serde_json::json!({"text": "two"})),
        ];
        let assistant = Message::assistant_with_tool_calls(None, calls);

        let report = invoker(echo_registry(false))
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap();

        assert_eq!(report.called.len(), 2);
        assert!(report.complete());
        let texts: Vec<&str> = report.tool_messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one#0", "two#1"]);
        let ids: Vec<&str> = report
            .tool_messages
            .iter()
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn validation_failure_goes_to_the_handler() {
        let calls = vec![
            ToolCallRecord::new("bad", "echo", serde_json::json!({"wrong": 1})),
            ToolCallRecord::new("good", "echo", serde_json::json!({"text": "ok"})),
        ];
        let assistant = Message::assistant_with_tool_calls(None, calls);

        let report = invoker(echo_registry(false))
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap();

        assert_eq!(report.not_called.len(), 1);
        assert_eq!(report.called.len(), 1);
        assert!(report.tool_messages[0].text().starts_with("bad arguments:"));
        // the failed call did not advance the index
        assert_eq!(report.tool_messages[1].text(), "ok#0");
        assert!(report.complete());
    }

    #[tokio::test]
    async fn post_run_stop_ends_the_loop() {
        let assistant = Message::assistant_with_tool_calls(
            None,
            vec![make_tool_call("echo", serde_json::json!({"text": "x"}))],
        );
        let report = invoker(echo_registry(true))
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap();
        assert_eq!(report.called.len(), 1);
        assert!(!report.complete());
    }

    #[tokio::test]
    async fn unregistered_tool_gets_a_synthetic_response() {
        let assistant = Message::assistant_with_tool_calls(
            None,
            vec![make_tool_call("ghost", serde_json::json!({}))],
        );
        let report = invoker(echo_registry(false))
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap();

        assert_eq!(report.unregistered.len(), 1);
        assert_eq!(report.tool_messages.len(), 1);
        assert_eq!(
            report.tool_messages[0].text(),
            "Error: tool 'ghost' is not registered"
        );
        assert_eq!(report.tool_messages[0].tool_call_id.as_deref(), Some("call_ghost"));
        assert!(!report.dispatched_any());
        assert!(!report.complete());
    }

    #[tokio::test]
    async fn unregistered_tool_can_raise() {
        let assistant = Message::assistant_with_tool_calls(
            None,
            vec![make_tool_call("ghost", serde_json::json!({}))],
        );
        let err = invoker(echo_registry(false))
            .with_raise_on_missing_tool(true)
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotRegistered("ghost".into()));
    }

    #[tokio::test]
    async fn no_calls_is_not_complete() {
        let report = invoker(echo_registry(false))
            .invoke(&Message::assistant("done"), 1, &extras(), None)
            .await
            .unwrap();
        assert!(report.tool_messages.is_empty());
        assert!(!report.complete());
    }

    #[tokio::test]
    async fn message_payload_lends_its_sources() {
        let registry = ToolRegistry::new().with(SourcedTool).unwrap();
        let assistant = Message::assistant_with_tool_calls(
            None,
            vec![make_tool_call("sourced", serde_json::json!({}))],
        );
        let report = invoker(registry)
            .invoke(&assistant, 1, &extras(), None)
            .await
            .unwrap();
        let response = &report.tool_messages[0];
        assert_eq!(response.role, Role::Tool);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(response.sources[0].key, "guide.pdf");
    }

    #[tokio::test]
    async fn events_are_published_per_call() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let invoker = ToolInvoker::new(Arc::new(echo_registry(false)), bus);
        let assistant = Message::assistant_with_tool_calls(
            None,
            vec![make_tool_call("echo", serde_json::json!({"text": "x"}))],
        );
        invoker.invoke(&assistant, 1, &extras(), None).await.unwrap();

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ToolExecuted { tool_name, called, .. } => {
                assert_eq!(tool_name, "echo");
                assert!(*called);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn trail_lands_on_the_last_persisted_user_message() {
        let store = InMemoryStore::new();
        let stored = store
            .create("user", Some("question"), serde_json::Map::new())
            .await
            .unwrap();
        let mut history = MessageSequence::default();
        history.push(Message::from_stored(stored.clone()).unwrap());
        history.push(Message::user("not persisted"));

        let call = make_tool_call("echo", serde_json::json!({"text": "x"}));
        let round = vec![
            Message::assistant_with_tool_calls(None, vec![call]),
            Message::tool_result("call_echo", Some("x#0".into())),
        ];
        assert!(record_trail(&mut history, &store, &round).await.unwrap());
        assert!(record_trail(&mut history, &store, &round).await.unwrap());

        let persisted = &store.list().await.unwrap()[0];
        assert_eq!(persisted.id, stored.id);
        let trail = ToolTrail::read(&persisted.debug);
        assert_eq!(trail.len(), 4);
        assert!(persisted.debug.contains_key(TRAIL_KEY));
        assert_eq!(persisted.text.as_deref(), Some("question"));
    }

    #[tokio::test]
    async fn newer_trail_version_is_left_intact() {
        let store = InMemoryStore::new();
        let mut debug = serde_json::Map::new();
        debug.insert(TRAIL_KEY.into(), serde_json::json!([{"kind": "v7-record"}]));
        debug.insert(TRAIL_VERSION_KEY.into(), 7.into());
        let stored = store.create("user", Some("question"), debug).await.unwrap();
        let mut history = MessageSequence::default();
        history.push(Message::from_stored(stored).unwrap());

        let call = make_tool_call("echo", serde_json::json!({"text": "x"}));
        let round = vec![
            Message::assistant_with_tool_calls(None, vec![call]),
            Message::tool_result("call_echo", Some("x#0".into())),
        ];
        assert!(!record_trail(&mut history, &store, &round).await.unwrap());

        let persisted = &store.list().await.unwrap()[0];
        assert_eq!(persisted.debug[TRAIL_VERSION_KEY], 7);
        assert_eq!(persisted.debug[TRAIL_KEY], serde_json::json!([{"kind": "v7-record"}]));
    }

    #[tokio::test]
    async fn trail_without_persisted_user_is_skipped() {
        let store = InMemoryStore::new();
        let mut history = MessageSequence::default();
        history.push(Message::user("local"));
        assert!(!record_trail(&mut history, &store, &[]).await.unwrap());
    }
}
