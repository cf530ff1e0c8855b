//! Token-aware ordered message history.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::message::{Message, Role};
use crate::source::SourceRecord;
use crate::tokenizer::{HeuristicTokenizer, Tokenizer};

/// An ordered list of messages plus the tokenizer that prices them.
///
/// `expanded` records whether persisted tool trails have already been
/// spliced in; see [`crate::expand`].
#[derive(Debug, Clone)]
pub struct MessageSequence {
    messages: Vec<Message>,
    expanded: bool,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Default for MessageSequence {
    fn default() -> Self {
        Self::new(Arc::new(HeuristicTokenizer))
    }
}

impl MessageSequence {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            messages: Vec::new(),
            expanded: false,
            tokenizer,
        }
    }

    pub fn from_messages(messages: Vec<Message>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            messages,
            expanded: false,
            tokenizer,
        }
    }

    /// Same messages, priced by another tokenizer.
    pub fn using(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn mark_expanded(&mut self) {
        self.expanded = true;
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Message> {
        self.messages.iter_mut()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn insert(&mut self, index: usize, message: Message) {
        self.messages.insert(index, message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Put `messages` in front, keeping their order.
    pub fn prepend(&mut self, messages: impl IntoIterator<Item = Message>) {
        let tail = std::mem::take(&mut self.messages);
        self.messages.extend(messages);
        self.messages.extend(tail);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Take every message out, leaving the sequence empty.
    pub fn drain(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }

    pub fn into_vec(self) -> Vec<Message> {
        self.messages
    }

    /// Tokens of one message: text, serialized tool calls, and call id.
    pub fn message_tokens(&self, message: &Message) -> usize {
        price(self.tokenizer.as_ref(), message)
    }

    pub fn token_count(&self) -> usize {
        self.messages.iter().map(|m| self.message_tokens(m)).sum()
    }

    /// Every attached source, flattened in message order.
    pub fn sources(&self) -> Vec<SourceRecord> {
        self.messages
            .iter()
            .flat_map(|m| m.sources.iter().cloned())
            .collect()
    }

    /// Deep, independent copy.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Copy holding only the messages `predicate` accepts.
    pub fn filter(&self, predicate: impl Fn(&Message) -> bool) -> Self {
        Self {
            messages: self.messages.iter().filter(|m| predicate(m)).cloned().collect(),
            expanded: self.expanded,
            tokenizer: Arc::clone(&self.tokenizer),
        }
    }

    pub fn retain(&mut self, predicate: impl FnMut(&Message) -> bool) {
        self.messages.retain(predicate);
    }

    pub fn first(&self, predicate: impl Fn(&Message) -> bool) -> Option<&Message> {
        self.messages.iter().find(|m| predicate(m))
    }

    pub fn last(&self, predicate: impl Fn(&Message) -> bool) -> Option<&Message> {
        self.messages.iter().rev().find(|m| predicate(m))
    }

    pub fn last_mut(&mut self, predicate: impl Fn(&Message) -> bool) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|m| predicate(m))
    }

    /// Index of the last message `predicate` accepts.
    pub fn rposition(&self, predicate: impl Fn(&Message) -> bool) -> Option<usize> {
        self.messages.iter().rposition(|m| predicate(m))
    }

    /// Truncated copy; see [`Self::truncate_in_place`].
    pub fn truncate(&self, budget: usize) -> Self {
        let mut copy = self.fork();
        copy.truncate_in_place(budget);
        copy
    }

    /// Drop the oldest non-system message until the total fits `budget`.
    ///
    /// Dropping an assistant turn with tool calls also drops every tool
    /// response answering one of those calls. Returns how many messages were
    /// removed.
    pub fn truncate_in_place(&mut self, budget: usize) -> usize {
        let mut total = self.token_count();
        let before = self.messages.len();

        while total > budget {
            let Some(index) = self.messages.iter().position(|m| m.role != Role::System) else {
                warn!(tokens = total, budget, "Only system messages left; cannot truncate further");
                break;
            };
            let removed = self.messages.remove(index);
            total -= self.message_tokens(&removed);

            if !removed.tool_calls.is_empty() {
                let ids: HashSet<&str> = removed.tool_calls.iter().map(|c| c.id.as_str()).collect();
                let tokenizer = Arc::clone(&self.tokenizer);
                let mut orphaned = 0;
                self.messages.retain(|m| {
                    let answers = m
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| ids.contains(id));
                    if answers {
                        orphaned += price(tokenizer.as_ref(), m);
                    }
                    !answers
                });
                total -= orphaned;
            }
        }

        let removed = before - self.messages.len();
        if removed > 0 {
            debug!(removed, remaining_tokens = total, budget, "Truncated history");
        }
        removed
    }
}

fn price(tokenizer: &dyn Tokenizer, message: &Message) -> usize {
    let mut total = tokenizer.count(message.model_text());
    if !message.tool_calls.is_empty() {
        let wire: Vec<serde_json::Value> = message.tool_calls.iter().map(|c| c.to_wire()).collect();
        total += tokenizer.count(&serde_json::Value::Array(wire).to_string());
    }
    if let Some(id) = &message.tool_call_id {
        total += tokenizer.count(id);
    }
    total
}

impl<'a> IntoIterator for &'a MessageSequence {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl IntoIterator for MessageSequence {
    type Item = Message;
    type IntoIter = std::vec::IntoIter<Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCallRecord;
    use crate::tokenizer::CharTokenizer;

    fn seq(messages: Vec<Message>) -> MessageSequence {
        MessageSequence::from_messages(messages, Arc::new(CharTokenizer))
    }

    fn paired() -> MessageSequence {
        let call = ToolCallRecord::new("tc1", "search", serde_json::json!({"q": "x"}));
        seq(vec![
            Message::user("A"),
            Message::assistant_with_tool_calls(Some("B".into()), vec![call]),
            Message::tool_result("tc1", Some("C".into())),
            Message::assistant("D"),
        ])
    }

    #[test]
    fn token_count_includes_tool_payload_and_call_id() {
        let s = paired();
        let tool = s.get(2).unwrap();
        assert_eq!(s.message_tokens(tool), 1 + "tc1".len());
        let assistant = s.get(1).unwrap();
        assert!(s.message_tokens(assistant) > 1);
        assert_eq!(
            s.token_count(),
            s.iter().map(|m| s.message_tokens(m)).sum::<usize>()
        );
    }

    #[test]
    fn truncation_drops_orphaned_tool_responses() {
        let s = paired();
        let c_plus_d = s.message_tokens(s.get(2).unwrap()) + s.message_tokens(s.get(3).unwrap());
        let out = s.truncate(c_plus_d);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).unwrap().text(), "D");
        // original untouched
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn truncate_to_zero_is_empty() {
        let out = paired().truncate(0);
        assert!(out.is_empty());
        assert_eq!(out.token_count(), 0);
    }

    #[test]
    fn truncate_to_total_is_noop() {
        let s = paired();
        let out = s.truncate(s.token_count());
        assert_eq!(out.len(), s.len());
    }

    #[test]
    fn truncation_is_monotonic_in_budget() {
        let s = paired();
        let total = s.token_count();
        let mut previous = 0;
        for budget in 0..=total + 2 {
            let tokens = s.truncate(budget).token_count();
            assert!(tokens <= budget);
            assert!(tokens >= previous);
            previous = tokens;
        }
    }

    #[test]
    fn truncation_never_drops_system_messages() {
        let s = seq(vec![Message::system("instructions"), Message::user("hello")]);
        let out = s.truncate(0);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(0).unwrap().role, Role::System);
    }

    #[test]
    fn sources_flatten_in_order() {
        let a = Message::assistant("a").with_sources(vec![SourceRecord::new("1", "1", "one", "")]);
        let b = Message::user("b").with_sources(vec![
            SourceRecord::new("2", "2", "two", ""),
            SourceRecord::new("3", "3", "three", ""),
        ]);
        let ids: Vec<String> = seq(vec![a, b]).sources().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn filter_and_lookup() {
        let s = seq(vec![
            Message::user("first"),
            Message::assistant(""),
            Message::user("second"),
        ]);
        let non_empty = s.filter(|m| !m.is_empty_turn());
        assert_eq!(non_empty.len(), 2);
        assert_eq!(s.last(|m| m.role == Role::User).unwrap().text(), "second");
        assert_eq!(s.first(|m| m.role == Role::User).unwrap().text(), "first");
        assert_eq!(s.rposition(|m| m.role == Role::Assistant), Some(1));
    }

    #[test]
    fn fork_is_independent() {
        let s = paired();
        let mut copy = s.fork();
        copy.push(Message::user("extra"));
        copy.mark_expanded();
        assert_eq!(s.len(), 4);
        assert!(!s.is_expanded());
    }

    #[test]
    fn prepend_keeps_order() {
        let mut s = seq(vec![Message::user("c")]);
        s.prepend(vec![Message::user("a"), Message::user("b")]);
        let texts: Vec<&str> = s.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }
}
