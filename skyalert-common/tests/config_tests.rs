//! Unit tests for configuration loading and the consumer configuration gate
//!
//! Uses serial_test to prevent environment variable races. Tests that touch
//! SKYALERT_* variables are marked with #[serial].

use serial_test::serial;
use skyalert_common::config::{
    load_config, load_toml_config, resolve_database_path, GcnConfig, TomlConfig,
};
use skyalert_common::Error;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

#[test]
fn test_empty_toml_uses_defaults() {
    let file = write_config("");
    let config = load_toml_config(file.path()).unwrap();

    assert!(config.database_path.is_none());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.http.port, 5750);
    assert_eq!(config.gcn.poll_interval_secs, 10);
    assert_eq!(config.gcn.max_messages, 100);
    assert_eq!(config.gcn.skymap_timeout_secs, 120);
    assert!(config.gcn.topics.is_empty());
    assert_eq!(config.health.url, "http://127.0.0.1:5750/health");
}

#[test]
fn test_full_toml_is_parsed() {
    let file = write_config(
        r#"
        database_path = "/var/lib/skyalert/alerts.db"

        [logging]
        level = "debug"

        [gcn]
        client_id = "abc"
        client_secret = "xyz"
        topics = ["gcn.classic.voevent.LVC_PRELIMINARY", "gcn.classic.voevent.FERMI_GBM_FIN_POS"]
        poll_interval_secs = 30

        [health]
        url = "http://localhost:9000/health"
        timeout_secs = 2
        "#,
    );
    let config = load_toml_config(file.path()).unwrap();

    assert_eq!(
        config.database_path,
        Some(PathBuf::from("/var/lib/skyalert/alerts.db"))
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.gcn.topics.len(), 2);
    assert_eq!(config.gcn.poll_interval_secs, 30);
    assert_eq!(config.health.timeout_secs, 2);
}

#[test]
fn test_malformed_toml_is_config_error() {
    let file = write_config("gcn = [not toml");
    let result = load_toml_config(file.path());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_missing_explicit_file_falls_back_to_defaults() {
    env::remove_var("SKYALERT_CONFIG");
    let config = load_config(Some(Path::new("/nonexistent/skyalert.toml"))).unwrap();
    assert_eq!(config.http.port, 5750);
}

#[test]
fn test_validate_requires_client_id() {
    let config = GcnConfig {
        client_secret: Some("secret".to_string()),
        topics: vec!["topic".to_string()],
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_validate_requires_secret() {
    let config = GcnConfig {
        client_id: Some("id".to_string()),
        client_secret: Some("   ".to_string()),
        topics: vec!["topic".to_string()],
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_validate_requires_non_empty_topics() {
    let config = GcnConfig {
        client_id: Some("id".to_string()),
        client_secret: Some("secret".to_string()),
        topics: vec!["".to_string(), "  ".to_string()],
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_validate_rejects_zero_poll_settings() {
    let config = GcnConfig {
        client_id: Some("id".to_string()),
        client_secret: Some("secret".to_string()),
        topics: vec!["topic".to_string()],
        ..Default::default()
    };
    assert!(config.validate().is_ok());

    let no_interval = GcnConfig {
        poll_interval_secs: 0,
        ..config.clone()
    };
    match no_interval.validate() {
        Err(Error::Config(msg)) => assert!(msg.contains("poll_interval_secs")),
        other => panic!("expected config error, got {:?}", other),
    }

    let no_batch = GcnConfig {
        max_messages: 0,
        ..config
    };
    match no_batch.validate() {
        Err(Error::Config(msg)) => assert!(msg.contains("max_messages")),
        other => panic!("expected config error, got {:?}", other),
    }
}

#[test]
fn test_validate_returns_trimmed_credentials() {
    let config = GcnConfig {
        client_id: Some(" id ".to_string()),
        client_secret: Some("secret".to_string()),
        topics: vec![" a ".to_string(), "b".to_string()],
        ..Default::default()
    };
    let creds = config.validate().unwrap();
    assert_eq!(creds.client_id, "id");
    assert_eq!(creds.topics, vec!["a".to_string(), "b".to_string()]);
}

#[test]
#[serial]
fn test_env_overrides_topics_and_credentials() {
    env::set_var("SKYALERT_GCN_CLIENT_ID", "env-id");
    env::set_var("SKYALERT_GCN_CLIENT_SECRET", "env-secret");
    env::set_var("SKYALERT_GCN_TOPICS", "one, two");

    let mut config = GcnConfig::default();
    config.apply_env_overrides();

    env::remove_var("SKYALERT_GCN_CLIENT_ID");
    env::remove_var("SKYALERT_GCN_CLIENT_SECRET");
    env::remove_var("SKYALERT_GCN_TOPICS");

    let creds = config.validate().unwrap();
    assert_eq!(creds.client_id, "env-id");
    assert_eq!(creds.topics, vec!["one".to_string(), "two".to_string()]);
}

#[test]
#[serial]
fn test_database_path_priority() {
    env::remove_var("SKYALERT_DATABASE");
    let toml = TomlConfig {
        database_path: Some(PathBuf::from("/from/toml.db")),
        ..Default::default()
    };

    // CLI beats everything
    let cli = PathBuf::from("/from/cli.db");
    assert_eq!(resolve_database_path(Some(&cli), &toml), cli);

    // Environment beats TOML
    env::set_var("SKYALERT_DATABASE", "/from/env.db");
    assert_eq!(
        resolve_database_path(None, &toml),
        PathBuf::from("/from/env.db")
    );
    env::remove_var("SKYALERT_DATABASE");

    // TOML beats default
    assert_eq!(
        resolve_database_path(None, &toml),
        PathBuf::from("/from/toml.db")
    );

    // Default lands in the data dir
    let default = resolve_database_path(None, &TomlConfig::default());
    assert!(default.ends_with("skyalert.db"));
}
