//! Unit tests for SpeculativeConfig.

use std::io::Write;

use nano_speculative::{Error, SpeculativeConfig};

#[test]
fn test_default_config() {
    let config = SpeculativeConfig::default();
    assert_eq!(config.n_draft, 16);
    assert_eq!(config.n_reuse, 256);
    assert_eq!(config.n_min, 5);
    assert!((config.p_min - 0.9).abs() < f32::EPSILON);
}

#[test]
fn test_builder_pattern() {
    let config = SpeculativeConfig::new(8).n_reuse(32).n_min(2).p_min(0.75);

    assert_eq!(config.n_draft, 8);
    assert_eq!(config.n_reuse, 32);
    assert_eq!(config.n_min, 2);
    assert!((config.p_min - 0.75).abs() < f32::EPSILON);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_values() {
    assert!(matches!(
        SpeculativeConfig::new(0).validate(),
        Err(Error::Config(_))
    ));
    assert!(SpeculativeConfig::new(4).p_min(-0.1).validate().is_err());
    assert!(SpeculativeConfig::new(4).p_min(f32::NAN).validate().is_err());
    assert!(SpeculativeConfig::new(4).p_min(0.0).validate().is_ok());
    assert!(SpeculativeConfig::new(4).p_min(1.0).validate().is_ok());
}

#[test]
fn test_from_json_file() -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(format!(
        "nano-speculative-config-{}.json",
        std::process::id()
    ));
    let mut file = std::fs::File::create(&path)?;
    write!(file, r#"{{ "n_draft": 4, "p_min": 0.5 }}"#)?;
    drop(file);

    let config = SpeculativeConfig::from_json_file(&path);
    std::fs::remove_file(&path)?;
    let config = config?;

    assert_eq!(config.n_draft, 4);
    assert!((config.p_min - 0.5).abs() < f32::EPSILON);
    assert_eq!(config.n_reuse, 256);
    assert_eq!(config.n_min, 5);
    Ok(())
}

#[test]
fn test_from_json_file_errors() {
    assert!(matches!(
        SpeculativeConfig::from_json_file("/nonexistent/speculative.json"),
        Err(Error::Io(_))
    ));

    let path = std::env::temp_dir().join(format!(
        "nano-speculative-bad-config-{}.json",
        std::process::id()
    ));
    std::fs::write(&path, r#"{ "n_draft": 0 }"#).unwrap();
    let result = SpeculativeConfig::from_json_file(&path);
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(Error::Config(_))));
}
