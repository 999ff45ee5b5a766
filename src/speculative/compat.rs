//! Draft/target compatibility check.
//!
//! Draft tokens are handed to the target model verbatim, so both models must
//! agree on what every token id means. The check runs once, when the decoder
//! is built, and stops at the first mismatch:
//!
//! 1. same tokenizer family
//! 2. same BOS/EOS flags and ids
//! 3. vocabulary sizes within [`VOCAB_MAX_SIZE_DIFFERENCE`]
//! 4. identical token text for every shared id from [`VOCAB_CHECK_START_TOKEN_ID`]

use tracing::{debug, error};

use crate::core::TokenId;
use crate::error::{Error, Result};
use crate::model::{ModelContext, Vocabulary};

/// Largest allowed difference between the two vocabulary sizes.
pub const VOCAB_MAX_SIZE_DIFFERENCE: usize = 128;

/// First token id whose text is compared; lower ids are reserved specials.
pub const VOCAB_CHECK_START_TOKEN_ID: TokenId = 5;

/// Check that `draft` may speculate for `target`.
///
/// # Errors
///
/// Returns [`Error::IncompatibleModels`] naming the first mismatch.
pub fn verify(target: &dyn Vocabulary, draft: &dyn Vocabulary) -> Result<()> {
    debug!(
        target_type = ?target.vocab_type(),
        draft_type = ?draft.vocab_type(),
        "checking draft/target vocabularies"
    );

    if target.vocab_type() != draft.vocab_type() {
        return Err(incompatible(format!(
            "vocab type differs: target {:?}, draft {:?}",
            target.vocab_type(),
            draft.vocab_type()
        )));
    }

    if target.add_bos() != draft.add_bos()
        || target.add_eos() != draft.add_eos()
        || target.bos() != draft.bos()
        || target.eos() != draft.eos()
    {
        return Err(incompatible(format!(
            "special tokens differ: target bos={:?} (add={}) eos={:?} (add={}), \
             draft bos={:?} (add={}) eos={:?} (add={})",
            target.bos(),
            target.add_bos(),
            target.eos(),
            target.add_eos(),
            draft.bos(),
            draft.add_bos(),
            draft.eos(),
            draft.add_eos()
        )));
    }

    let n_vocab_tgt = target.n_vocab();
    let n_vocab_dft = draft.n_vocab();
    let vocab_diff = n_vocab_tgt.abs_diff(n_vocab_dft);
    if vocab_diff > VOCAB_MAX_SIZE_DIFFERENCE {
        return Err(incompatible(format!(
            "target vocab size {n_vocab_tgt} does not match draft vocab size {n_vocab_dft} \
             (difference {vocab_diff}, max allowed {VOCAB_MAX_SIZE_DIFFERENCE})"
        )));
    }

    let shared = n_vocab_tgt.min(n_vocab_dft) as TokenId;
    for id in VOCAB_CHECK_START_TOKEN_ID..shared {
        let text_tgt = target.token_text(id);
        let text_dft = draft.token_text(id);
        if text_tgt != text_dft {
            return Err(incompatible(format!(
                "token {id} content differs: target '{}', draft '{}'",
                lossy(text_tgt),
                lossy(text_dft)
            )));
        }
    }

    Ok(())
}

/// Check two model contexts; see [`verify`].
pub fn verify_contexts<T, D>(target: &T, draft: &D) -> Result<()>
where
    T: ModelContext + ?Sized,
    D: ModelContext + ?Sized,
{
    verify(target.vocab(), draft.vocab())
}

/// Boolean form of [`verify_contexts`].
pub fn are_compatible<T, D>(target: &T, draft: &D) -> bool
where
    T: ModelContext + ?Sized,
    D: ModelContext + ?Sized,
{
    verify_contexts(target, draft).is_ok()
}

fn incompatible(reason: String) -> Error {
    error!("draft model cannot speculate for target: {reason}");
    Error::IncompatibleModels { reason }
}

fn lossy(text: Option<&[u8]>) -> String {
    text.map(|t| String::from_utf8_lossy(t).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SimpleVocab, VocabType};

    #[test]
    fn test_reserved_ids_are_not_compared() {
        let target = SimpleVocab::synthetic(32);
        let draft = SimpleVocab::synthetic(32).with_token(4, "<other>");

        assert!(verify(&target, &draft).is_ok());
    }

    #[test]
    fn test_first_checked_id_is_compared() {
        let target = SimpleVocab::synthetic(32);
        let draft = SimpleVocab::synthetic(32).with_token(5, "<other>");

        let err = verify(&target, &draft).unwrap_err();
        assert!(matches!(err, Error::IncompatibleModels { .. }));
        assert!(err.to_string().contains("token 5"));
    }

    #[test]
    fn test_vocab_type_checked_first() {
        let target = SimpleVocab::synthetic(32);
        let draft = SimpleVocab::synthetic(512).with_vocab_type(VocabType::Spm);

        let err = verify(&target, &draft).unwrap_err();
        assert!(err.to_string().contains("vocab type"));
    }

    #[test]
    fn test_eos_presence_must_match() {
        let target = SimpleVocab::synthetic(32);
        let draft = SimpleVocab::synthetic(32).with_eos(None);

        assert!(verify(&target, &draft).is_err());
    }
}
