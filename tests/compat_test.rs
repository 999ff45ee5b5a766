//! Integration tests for the draft/target compatibility check.

use candle_core::Device;
use nano_speculative::speculative::compat::{self, VOCAB_MAX_SIZE_DIFFERENCE};
use nano_speculative::{BigramModel, Error, SimpleVocab, VocabType};

fn uniform_model(vocab: SimpleVocab) -> anyhow::Result<BigramModel> {
    let n_vocab = vocab.tokens.len();
    let probs = vec![vec![1.0 / n_vocab as f32; n_vocab]; n_vocab];
    Ok(BigramModel::from_probs(vocab, &probs, 8, &Device::Cpu)?)
}

#[test]
fn test_identical_vocabularies() {
    let vocab = SimpleVocab::synthetic(300);
    assert!(compat::verify(&vocab, &vocab.clone()).is_ok());
}

#[test]
fn test_vocab_type_mismatch() {
    let target = SimpleVocab::synthetic(32);
    let draft = SimpleVocab::synthetic(32).with_vocab_type(VocabType::Spm);

    let err = compat::verify(&target, &draft).unwrap_err();
    assert!(matches!(err, Error::IncompatibleModels { .. }));
    assert!(err.to_string().contains("vocab type"));
}

#[test]
fn test_special_token_mismatch() {
    let target = SimpleVocab::synthetic(32);

    assert!(compat::verify(&target, &SimpleVocab::synthetic(32).with_bos(Some(4))).is_err());
    assert!(compat::verify(&target, &SimpleVocab::synthetic(32).with_eos(None)).is_err());

    let mut no_bos = SimpleVocab::synthetic(32);
    no_bos.add_bos = false;
    assert!(compat::verify(&target, &no_bos).is_err());
}

#[test]
fn test_size_difference_limit() {
    let target = SimpleVocab::synthetic(300);
    let at_limit = SimpleVocab::synthetic(300 + VOCAB_MAX_SIZE_DIFFERENCE);
    let over_limit = SimpleVocab::synthetic(300 + VOCAB_MAX_SIZE_DIFFERENCE + 1);

    assert!(compat::verify(&target, &at_limit).is_ok());
    // Symmetric in which side is larger
    assert!(compat::verify(&at_limit, &target).is_ok());

    let err = compat::verify(&target, &over_limit).unwrap_err();
    assert!(err.to_string().contains("vocab size"));
}

#[test]
fn test_token_text_mismatch() {
    let target = SimpleVocab::synthetic(64);
    let draft = SimpleVocab::synthetic(64).with_token(40, "something else");

    let err = compat::verify(&target, &draft).unwrap_err();
    assert!(err.to_string().contains("token 40"));
}

#[test]
fn test_check_is_order_dependent_only_on_first_mismatch() {
    // Type mismatch is reported even though sizes also differ
    let target = SimpleVocab::synthetic(32);
    let draft = SimpleVocab::synthetic(500).with_vocab_type(VocabType::Wpm);

    let err = compat::verify(&target, &draft).unwrap_err();
    assert!(err.to_string().contains("vocab type"));
}

#[test]
fn test_contexts() -> anyhow::Result<()> {
    let target = uniform_model(SimpleVocab::synthetic(16))?;
    let same = uniform_model(SimpleVocab::synthetic(16))?;
    let other = uniform_model(SimpleVocab::synthetic(16).with_token(7, "seven"))?;

    assert!(compat::are_compatible(&target, &same));
    assert!(!compat::are_compatible(&target, &other));
    assert!(compat::verify_contexts(&target, &same).is_ok());
    Ok(())
}
