//! In-memory vocabulary.

use serde::{Deserialize, Serialize};

use super::context::{VocabType, Vocabulary};
use crate::core::TokenId;

/// Vocabulary backed by a list of token strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleVocab {
    /// Tokenizer family.
    pub vocab_type: VocabType,
    /// Token text indexed by id.
    pub tokens: Vec<String>,
    /// Beginning-of-sequence token.
    pub bos: Option<TokenId>,
    /// End-of-sequence token.
    pub eos: Option<TokenId>,
    /// Prepend BOS when tokenizing.
    pub add_bos: bool,
    /// Append EOS when tokenizing.
    pub add_eos: bool,
}

impl SimpleVocab {
    /// Create a BPE vocabulary from token strings with BOS = 1, EOS = 2.
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            vocab_type: VocabType::Bpe,
            tokens,
            bos: Some(1),
            eos: Some(2),
            add_bos: true,
            add_eos: false,
        }
    }

    /// Synthetic vocabulary of `n_vocab` tokens: five specials then `tok<N>`.
    pub fn synthetic(n_vocab: usize) -> Self {
        const SPECIALS: [&str; 5] = ["<unk>", "<s>", "</s>", "<pad>", "<mask>"];

        let tokens = (0..n_vocab)
            .map(|id| match SPECIALS.get(id) {
                Some(special) => (*special).to_string(),
                None => format!("tok{id}"),
            })
            .collect();
        Self::new(tokens)
    }

    /// Set the BOS token.
    pub fn with_bos(mut self, bos: Option<TokenId>) -> Self {
        self.bos = bos;
        self
    }

    /// Set the EOS token.
    pub fn with_eos(mut self, eos: Option<TokenId>) -> Self {
        self.eos = eos;
        self
    }

    /// Set the tokenizer family.
    pub fn with_vocab_type(mut self, vocab_type: VocabType) -> Self {
        self.vocab_type = vocab_type;
        self
    }

    /// Replace the text of one token.
    pub fn with_token(mut self, id: TokenId, text: impl Into<String>) -> Self {
        if let Some(slot) = self.tokens.get_mut(id as usize) {
            *slot = text.into();
        }
        self
    }
}

impl Vocabulary for SimpleVocab {
    fn vocab_type(&self) -> VocabType {
        self.vocab_type
    }

    fn n_vocab(&self) -> usize {
        self.tokens.len()
    }

    fn bos(&self) -> Option<TokenId> {
        self.bos
    }

    fn eos(&self) -> Option<TokenId> {
        self.eos
    }

    fn add_bos(&self) -> bool {
        self.add_bos
    }

    fn add_eos(&self) -> bool {
        self.add_eos
    }

    fn token_text(&self, id: TokenId) -> Option<&[u8]> {
        self.tokens.get(id as usize).map(String::as_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_layout() {
        let vocab = SimpleVocab::synthetic(8);

        assert_eq!(vocab.n_vocab(), 8);
        assert_eq!(vocab.token_text(1), Some("<s>".as_bytes()));
        assert_eq!(vocab.token_text(6), Some("tok6".as_bytes()));
        assert_eq!(vocab.token_text(8), None);
    }
}
