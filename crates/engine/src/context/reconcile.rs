//! Cross-turn citation reconciliation.
//!
//! Tool outputs embed `<sourceN …>` blocks numbered by whoever produced
//! them. Before a model call every block in the context is renumbered into
//! one running sequence starting at zero, and the raw markers of already
//! rendered answers are re-based onto the same count.
//!
//! Blocks are split in two: the first `K` (where `K` is the number of
//! sources already attached to non-user messages) are existing references
//! and map onto those attached sources in order; every block past `K` is a
//! new reference built from the block's own attributes.

use std::sync::LazyLock;

use ctxloom_core::message::{CitationMap, Message, Role};
use ctxloom_core::sequence::MessageSequence;
use ctxloom_core::source::{self, SourceRecord};
use regex_lite::Regex;
use tracing::debug;

static MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[source(\d+)\]").expect("valid marker regex"));

/// Output of [`reconcile`].
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub sequence: MessageSequence,
    /// Sources known before the pass, in block order
    pub existing: Vec<SourceRecord>,
    /// Sources first discovered in this pass
    pub new: Vec<SourceRecord>,
}

impl Reconciled {
    /// Existing then new: the full citation context for the model call.
    pub fn citation_context(&self) -> Vec<SourceRecord> {
        self.existing.iter().chain(self.new.iter()).cloned().collect()
    }
}

/// Renumber blocks and re-base markers on a copy of `sequence`.
pub fn reconcile(sequence: &MessageSequence) -> Reconciled {
    let known: Vec<SourceRecord> = sequence
        .iter()
        .filter(|m| m.role != Role::User)
        .flat_map(|m| m.sources.iter().cloned())
        .collect();

    let mut out = sequence.fork();
    let mut existing = Vec::new();
    let mut new = Vec::new();
    let mut counter = 0usize;
    let mut prior_sources = 0usize;

    for message in out.iter_mut() {
        let start = counter;

        if let Some(content) = message.content.as_deref() {
            for (offset, block) in source::source_blocks(content).iter().enumerate() {
                let global = start + offset;
                match known.get(global) {
                    Some(source) => existing.push(source.clone()),
                    None => new.push(SourceRecord::from_block_attributes(&block.attributes, global)),
                }
            }
            let (rewritten, next) = source::renumber_source_blocks(content, start);
            message.content = Some(rewritten);
            counter = next;
        }
        if let Some(original) = message.original_content.as_deref() {
            let (rewritten, next) = source::renumber_source_blocks(original, start);
            message.original_content = Some(rewritten);
            if message.content.is_none() {
                counter = next;
            }
        }

        if message.role == Role::User {
            existing.extend(message.sources.iter().cloned());
        }

        if !message.citations.is_empty() {
            rebase_markers(message, prior_sources);
        }
        prior_sources += message.sources.len();
    }

    debug!(
        blocks = counter,
        existing = existing.len(),
        new = new.len(),
        "Reconciled citations"
    );

    Reconciled {
        sequence: out,
        existing,
        new,
    }
}

/// Rewrite every cited marker of `message` to `offset + local ordinal`, in
/// one pass so a rewritten marker is never rewritten again.
fn rebase_markers(message: &mut Message, offset: usize) {
    let base = message.model_text().to_string();
    let citations: &CitationMap = &message.citations;
    let rebased = MARKER_RE
        .replace_all(&base, |caps: &regex_lite::Captures<'_>| {
            let marker = caps.get(0).map_or("", |m| m.as_str());
            match citations.get(marker) {
                Some(ordinal) => format!("[source{}]", offset + ordinal),
                None => marker.to_string(),
            }
        })
        .into_owned();
    message.original_content = Some(rebased);
}
