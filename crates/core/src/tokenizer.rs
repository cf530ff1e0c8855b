//! Token counting.
//!
//! Budgets are measured by a [`Tokenizer`]; the sequence never needs the
//! tokens themselves, only how many there are.

use std::fmt;

/// Counts tokens in a piece of text.
pub trait Tokenizer: Send + Sync + fmt::Debug {
    fn count(&self, text: &str) -> usize;
}

/// One token per character. Makes budget arithmetic exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }
}

/// Rough estimate of 1 token ≈ 4 characters for English text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenizer;

impl Tokenizer for HeuristicTokenizer {
    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

#[cfg(feature = "tiktoken")]
pub use bpe::BpeTokenizer;

#[cfg(feature = "tiktoken")]
mod bpe {
    use std::sync::Arc;

    use tiktoken_rs::CoreBPE;

    use super::Tokenizer;

    /// Byte-pair encoding as used by the OpenAI model family.
    #[derive(Clone)]
    pub struct BpeTokenizer {
        bpe: Arc<CoreBPE>,
    }

    impl BpeTokenizer {
        /// The encoding a model uses, falling back to `cl100k_base`.
        pub fn for_model(model: &str) -> Result<Self, String> {
            let bpe = match tiktoken_rs::get_bpe_from_model(model) {
                Ok(bpe) => bpe,
                Err(_) => tiktoken_rs::cl100k_base().map_err(|e| e.to_string())?,
            };
            Ok(Self { bpe: Arc::new(bpe) })
        }
    }

    impl std::fmt::Debug for BpeTokenizer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("BpeTokenizer")
        }
    }

    impl Tokenizer for BpeTokenizer {
        fn count(&self, text: &str) -> usize {
            self.bpe.encode_with_special_tokens(text).len()
        }
    }
}
