//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use peer_link::config::{AcceptorConfig, FrameConfig, IdentityConfig, LinkConfig, LoggingConfig};
use peer_link::{ProtocolError, TlsVersion};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = LinkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_acceptor_address() {
    let mut config = LinkConfig::default();
    config.acceptor.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid acceptor address")));
}

#[test]
fn test_empty_acceptor_address() {
    let mut config = LinkConfig::default();
    config.acceptor.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_backpressure_limit_bounds() {
    let zero = AcceptorConfig {
        backpressure_limit: 0,
        ..AcceptorConfig::default()
    };
    assert!(zero
        .validate()
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));

    let huge = AcceptorConfig {
        backpressure_limit: 2_000_000,
        ..AcceptorConfig::default()
    };
    assert!(huge
        .validate()
        .iter()
        .any(|e| e.contains("Backpressure limit too large")));
}

#[test]
fn test_pending_wait_bounds() {
    let short = AcceptorConfig {
        pending_wait: Duration::from_millis(1),
        ..AcceptorConfig::default()
    };
    assert!(short.validate().iter().any(|e| e.contains("too short")));

    let long = AcceptorConfig {
        pending_wait: Duration::from_secs(600),
        ..AcceptorConfig::default()
    };
    assert!(long.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_frame_limits() {
    let tiny = FrameConfig {
        max_buffered_bytes: 100,
        read_chunk_size: 64,
    };
    assert!(tiny.validate().iter().any(|e| e.contains("too small")));

    let chunk_too_big = FrameConfig {
        max_buffered_bytes: 4096,
        read_chunk_size: 8192,
    };
    assert!(chunk_too_big
        .validate()
        .iter()
        .any(|e| e.contains("cannot exceed")));

    let zero_chunk = FrameConfig {
        max_buffered_bytes: 4096,
        read_chunk_size: 0,
    };
    assert!(!zero_chunk.validate().is_empty());
}

#[test]
fn test_identity_validity() {
    let zero = IdentityConfig {
        validity_days: 0,
        ..IdentityConfig::default()
    };
    assert!(zero.validate().iter().any(|e| e.contains("at least 1 day")));

    let no_org = IdentityConfig {
        organization: String::new(),
        ..IdentityConfig::default()
    };
    assert!(no_org
        .validate()
        .iter()
        .any(|e| e.contains("Organization cannot be empty")));
}

#[test]
fn test_logging_app_name() {
    let config = LoggingConfig {
        app_name: "x".repeat(65),
        ..LoggingConfig::default()
    };
    assert!(config.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_validate_strict_collects_errors() {
    let config = LinkConfig::default_with_overrides(|c| {
        c.acceptor.backpressure_limit = 0;
        c.identity.validity_days = 0;
    });

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(msg)) => {
            assert!(msg.contains("Backpressure"));
            assert!(msg.contains("validity"));
        }
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn test_from_toml_partial_sections() {
    let config = LinkConfig::from_toml(
        r#"
        [tls]
        versions = "tls13"

        [identity]
        validity_days = 365
        organization = "Test"
        organizational_unit = "Unit"
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(config.tls.versions, TlsVersion::Tls13);
    assert_eq!(config.identity.validity_days, 365);
    assert_eq!(config.acceptor.backpressure_limit, 32);
    assert_eq!(config.logging.log_level, Level::INFO);
}

#[test]
fn test_invalid_toml_is_config_error() {
    assert!(matches!(
        LinkConfig::from_toml("acceptor = 5"),
        Err(ProtocolError::ConfigError(_))
    ));
}

#[test]
fn test_example_config_round_trips() {
    let text = LinkConfig::example_config();
    let parsed = LinkConfig::from_toml(&text).expect("example config should parse");
    assert!(parsed.validate().is_empty());
    assert_eq!(parsed.acceptor.address, "127.0.0.1:1716");
    assert_eq!(parsed.acceptor.pending_wait, Duration::from_secs(4));
}

#[test]
fn test_save_and_load_file() {
    let path = std::env::temp_dir().join(format!("peer-link-config-{}.toml", std::process::id()));
    let config = LinkConfig::default_with_overrides(|c| c.frame.max_buffered_bytes = 4096);

    config.save_to_file(&path).unwrap();
    let loaded = LinkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.frame.max_buffered_bytes, 4096);
}
