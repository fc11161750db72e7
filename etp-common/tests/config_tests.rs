//! Configuration file resolution and parsing
//!
//! Tests that touch `ETP_CONFIG` are marked `#[serial]` so they do not race
//! on the process environment.

use etp_common::config::{
    load_config, load_toml_config, locate_config_file, OffsetReset, CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::io::Write;

const FULL_CONFIG: &str = r#"
bind_addr = "127.0.0.1"
port = 5810
model_path = "/opt/etp/model.json"

[logging]
level = "debug"

[pipeline]
batch_timeout_ms = 2500
poll_interval_ms = 20
max_batch_size = 1000
days_since_last_purchase_fallback = 30.0

[resources.stream]
bootstrap_servers = "sqlite:///var/lib/etp/events.db"
topics = "user_events"
group_id = "scorer-a"
auto_offset_reset = "latest"
enable_auto_commit = false

[resources.store]
database = "/var/lib/etp/features.db"
"#;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write config");
    file
}

#[test]
fn test_full_config_parses() {
    let file = write_config(FULL_CONFIG);
    let config = load_toml_config(file.path()).unwrap();

    assert_eq!(config.bind_addr, "127.0.0.1");
    assert_eq!(config.port, 5810);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.pipeline.batch_timeout_ms, 2500);
    assert_eq!(config.pipeline.days_since_last_purchase_fallback, 30.0);

    let resources = config.resources.expect("resources section");
    assert_eq!(resources.stream.topics, "user_events");
    assert_eq!(resources.stream.auto_offset_reset, OffsetReset::Latest);
    assert!(!resources.stream.enable_auto_commit);
    // Omitted store fields fall back to defaults
    assert_eq!(resources.store.max_connections, 5);
    assert!(resources.store.read_only);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let file = write_config("port = \"not a number\"");
    let result = load_toml_config(file.path());
    assert!(matches!(result, Err(etp_common::Error::Config(_))));
}

#[test]
fn test_empty_group_id_rejected() {
    let file = write_config(
        r#"
[resources.stream]
bootstrap_servers = "sqlite::memory:"
topics = "t"
group_id = "  "

[resources.store]
database = "features.db"
"#,
    );
    assert!(load_toml_config(file.path()).is_err());
}

#[test]
#[serial]
fn test_explicit_path_wins_over_env() {
    let file = write_config(FULL_CONFIG);
    env::set_var(CONFIG_ENV_VAR, "/nonexistent/etp.toml");

    let located = locate_config_file(Some(file.path()));
    assert_eq!(located.as_deref(), Some(file.path()));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_without_explicit_path() {
    let file = write_config(FULL_CONFIG);
    env::set_var(CONFIG_ENV_VAR, file.path());

    let config = load_config(None).unwrap();
    assert_eq!(config.port, 5810);

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_explicit_file_is_error() {
    env::remove_var(CONFIG_ENV_VAR);
    let result = load_config(Some(std::path::Path::new("/nonexistent/etp/config.toml")));
    assert!(matches!(result, Err(etp_common::Error::Io(_))));
}
