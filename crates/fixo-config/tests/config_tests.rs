// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the Fixo configuration system.

use fixo_config::diagnostic::ConfigError;
use fixo_config::model::FixoConfig;
use fixo_config::{load_and_validate_path, load_and_validate_str, load_config_from_str};

#[test]
fn full_toml_deserializes() {
    let toml = r#"
[app]
name = "helpdesk"
log_level = "debug"

[storage]
database_path = "/tmp/fixo-test.db"
wal_mode = false

[blobs]
root_dir = "/tmp/fixo-blobs"
url_ttl_secs = 600
max_upload_bytes = 2048

[gateway]
host = "0.0.0.0"
port = 8088
public_url = "https://support.example.org"
token_secret = "0123456789abcdef0123456789abcdef"

[rtc]
ice_servers = ["stun:a.example.org:3478", "stun:b.example.org:3478"]
stable_poll_initial_ms = 20
stable_poll_max_ms = 200
stable_timeout_secs = 5
media_prompt_timeout_secs = 30
screen_share_audio = false

[signaling]
ttl_secs = 120
prune_interval_secs = 30
purge_on_end = false

[client]
server_url = "http://127.0.0.1:8088"
token = "abc.def"
"#;

    let config = load_and_validate_str(toml).expect("valid config");
    assert_eq!(config.app.name, "helpdesk");
    assert_eq!(config.app.log_level, "debug");
    assert!(!config.storage.wal_mode);
    assert_eq!(config.blobs.url_ttl_secs, 600);
    assert_eq!(config.gateway.port, 8088);
    assert_eq!(config.gateway.base_url(), "https://support.example.org");
    assert_eq!(config.rtc.ice_servers.len(), 2);
    assert_eq!(config.rtc.stable_poll_initial().as_millis(), 20);
    assert!(!config.rtc.screen_share_audio);
    assert!(!config.signaling.purge_on_end);
    assert_eq!(config.client.token.as_deref(), Some("abc.def"));
}

#[test]
fn empty_toml_uses_defaults() {
    let config = load_config_from_str("").expect("defaults");
    assert_eq!(config.app.name, "fixo");
    assert_eq!(config.app.log_level, "info");
    assert!(config.storage.wal_mode);
    assert_eq!(
        config.rtc.ice_servers,
        vec![
            "stun:stun.l.google.com:19302",
            "stun:stun1.l.google.com:19302"
        ]
    );
    assert_eq!(config.rtc.stable_poll_initial_ms, 50);
    assert_eq!(config.rtc.media_prompt_timeout_secs, 60);
    assert!(config.signaling.purge_on_end);
    assert!(config.gateway.token_secret.is_none());
    assert_eq!(config.gateway.base_url(), "http://127.0.0.1:3180");
}

#[test]
fn unknown_key_gets_suggestion() {
    let toml = r#"
[rtc]
ice_server = ["stun:a:1", "stun:b:1"]
"#;
    let errors = load_and_validate_str(toml).expect_err("unknown key");
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        ConfigError::UnknownKey {
            key, suggestion, ..
        } => {
            assert_eq!(key, "ice_server");
            assert_eq!(suggestion.as_deref(), Some("ice_servers"));
        }
        other => panic!("expected UnknownKey, got {other:?}"),
    }
}

#[test]
fn unknown_section_is_rejected() {
    let errors = load_and_validate_str("[llm]\nmodel = \"x\"\n").expect_err("unknown section");
    assert!(matches!(errors[0], ConfigError::UnknownKey { .. }));
}

#[test]
fn wrong_type_is_reported_with_key_path() {
    let errors = load_and_validate_str("[gateway]\nport = \"eighty\"\n").expect_err("bad type");
    match &errors[0] {
        ConfigError::InvalidType { key, .. } => assert_eq!(key, "gateway.port"),
        other => panic!("expected InvalidType, got {other:?}"),
    }
}

#[test]
fn single_ice_server_fails_validation() {
    let toml = r#"
[rtc]
ice_servers = ["stun:stun.l.google.com:19302"]
"#;
    let errors = load_and_validate_str(toml).expect_err("one server");
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains("at least two")))
    );
}

#[test]
fn override_merges_over_file_values() {
    use figment::{
        Figment,
        providers::{Format, Serialized, Toml},
    };

    let config: FixoConfig = Figment::new()
        .merge(Serialized::defaults(FixoConfig::default()))
        .merge(Toml::string("[gateway]\nport = 9000\n"))
        .merge(("gateway.port", 9100))
        .extract()
        .expect("merged");
    assert_eq!(config.gateway.port, 9100);
}

#[test]
#[serial_test::serial]
fn loads_explicit_file() {
    let dir = std::env::temp_dir().join(format!("fixo-config-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("fixo.toml");
    std::fs::write(&path, "[signaling]\nttl_secs = 42\n").unwrap();

    let config = load_and_validate_path(&path).expect("valid file");
    assert_eq!(config.signaling.ttl_secs, 42);

    std::fs::remove_dir_all(&dir).unwrap();
}
