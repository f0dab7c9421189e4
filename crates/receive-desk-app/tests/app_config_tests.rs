//! Integration tests for configuration loading from environment maps.

use std::path::PathBuf;
use std::time::Duration;

use receive_desk_app::{AppConfig, AppError};

fn source(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
    Some(
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect(),
    )
}

#[test]
fn app_config_tests_applies_defaults() {
    let config = AppConfig::from_source(source(&[(
        "RECEIVE_DESK_API_URL",
        "https://api.example.test/receive",
    )]))
    .expect("config loads");

    assert_eq!(config.session_file, PathBuf::from("receive-desk-session.json"));
    assert_eq!(config.request_timeout_secs, 30);
    assert_eq!(config.image_timeout_secs, 60);
}

#[test]
fn app_config_tests_reads_overrides() {
    let config = AppConfig::from_source(source(&[
        ("RECEIVE_DESK_API_URL", "https://api.example.test/receive"),
        ("RECEIVE_DESK_SESSION_FILE", "/tmp/desk.json"),
        ("RECEIVE_DESK_REQUEST_TIMEOUT_SECS", "5"),
        ("RECEIVE_DESK_IMAGE_TIMEOUT_SECS", "90"),
    ]))
    .expect("config loads");

    let api = config.api_config().expect("api config builds");
    assert_eq!(api.request_timeout, Duration::from_secs(5));
    assert_eq!(api.upload_timeout, Duration::from_secs(90));
    assert_eq!(api.base_url.as_str(), "https://api.example.test/receive/");
    assert_eq!(config.session_file, PathBuf::from("/tmp/desk.json"));
}

#[test]
fn app_config_tests_requires_api_url() {
    let result = AppConfig::from_source(source(&[]));

    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn app_config_tests_rejects_unusable_api_url() {
    let config = AppConfig::from_source(source(&[("RECEIVE_DESK_API_URL", "ftp://files.test/")]))
        .expect("config loads");

    assert!(matches!(config.api_config(), Err(AppError::Api(_))));
}
