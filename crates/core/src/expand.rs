//! History expansion.
//!
//! Splices each persisted tool-call trail back in after the message that
//! carries it (the user turn that started the round). Expansion is
//! idempotent: a sequence is expanded at most once, because every re-entry
//! rebuilds its state from the same trail.

use tracing::{debug, warn};

use crate::message::Message;
use crate::sequence::MessageSequence;
use crate::trail::{ToolTrail, TrailRecord};

/// Expand `sequence` in place. No-op when already expanded.
pub fn expand(sequence: &mut MessageSequence) {
    if sequence.is_expanded() {
        return;
    }

    let mut spliced = 0usize;
    for message in sequence.drain() {
        let trail = trail_messages(&message);
        spliced += trail.len();
        sequence.push(message);
        sequence.extend(trail);
    }
    sequence.mark_expanded();

    if spliced > 0 {
        debug!(spliced, total = sequence.len(), "Expanded tool-call trails");
    }
}

/// Expanded copy of `sequence`.
pub fn expanded(sequence: &MessageSequence) -> MessageSequence {
    let mut copy = sequence.fork();
    expand(&mut copy);
    copy
}

/// Legacy records first, then the current trail, in stored order.
fn trail_messages(message: &Message) -> Vec<Message> {
    let Some(debug) = message.debug() else {
        return Vec::new();
    };
    ToolTrail::read_legacy(debug)
        .into_iter()
        .chain(ToolTrail::read(debug))
        .filter_map(|record: TrailRecord| match record.into_message() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(message_id = ?message.id(), error = %e, "Dropping malformed trail record");
                None
            }
        })
        .collect()
}
