// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Collects every problem instead of failing on the first.

use crate::diagnostic::ConfigError;
use crate::model::FixoConfig;

const ICE_SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];
const MIN_TOKEN_SECRET_LEN: usize = 32;
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &FixoConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if !LOG_LEVELS.contains(&config.app.log_level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "app.log_level must be one of {}, got `{}`",
            LOG_LEVELS.join(", "),
            config.app.log_level
        )));
    }

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::validation(
            "storage.database_path must not be empty",
        ));
    }

    if config.blobs.root_dir.trim().is_empty() {
        errors.push(ConfigError::validation("blobs.root_dir must not be empty"));
    }
    if config.blobs.url_ttl_secs == 0 {
        errors.push(ConfigError::validation(
            "blobs.url_ttl_secs must be greater than zero",
        ));
    }
    if config.blobs.max_upload_bytes == 0 {
        errors.push(ConfigError::validation(
            "blobs.max_upload_bytes must be greater than zero",
        ));
    }

    let host = config.gateway.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::validation("gateway.host must not be empty"));
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        errors.push(ConfigError::validation(format!(
            "gateway.host `{host}` is not a valid IP address or hostname"
        )));
    }

    if let Some(secret) = &config.gateway.token_secret
        && secret.len() < MIN_TOKEN_SECRET_LEN
    {
        errors.push(ConfigError::validation(format!(
            "gateway.token_secret must be at least {MIN_TOKEN_SECRET_LEN} characters"
        )));
    }

    if let Some(url) = &config.gateway.public_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ConfigError::validation(format!(
            "gateway.public_url `{url}` must start with http:// or https://"
        )));
    }

    if config.rtc.ice_servers.len() < 2 {
        errors.push(ConfigError::validation(format!(
            "rtc.ice_servers needs at least two independent servers, got {}",
            config.rtc.ice_servers.len()
        )));
    }
    for server in &config.rtc.ice_servers {
        if !ICE_SCHEMES.iter().any(|s| server.starts_with(s)) {
            errors.push(ConfigError::validation(format!(
                "rtc.ice_servers entry `{server}` must use one of {}",
                ICE_SCHEMES.join(" ")
            )));
        }
    }

    if config.rtc.stable_poll_initial_ms == 0 {
        errors.push(ConfigError::validation(
            "rtc.stable_poll_initial_ms must be greater than zero",
        ));
    }
    if config.rtc.stable_poll_max_ms < config.rtc.stable_poll_initial_ms {
        errors.push(ConfigError::validation(
            "rtc.stable_poll_max_ms must not be below rtc.stable_poll_initial_ms",
        ));
    }
    if config.rtc.stable_timeout_secs == 0 {
        errors.push(ConfigError::validation(
            "rtc.stable_timeout_secs must be greater than zero",
        ));
    }

    if config.signaling.ttl_secs == 0 {
        errors.push(ConfigError::validation(
            "signaling.ttl_secs must be greater than zero",
        ));
    }
    if config.signaling.prune_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "signaling.prune_interval_secs must be greater than zero",
        ));
    }

    if let Some(url) = &config.client.server_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ConfigError::validation(format!(
            "client.server_url `{url}` must start with http:// or https://"
        )));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&FixoConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = FixoConfig::default();
        config.rtc.ice_servers = vec!["http://example.com".into()];
        config.gateway.token_secret = Some("short".into());
        config.signaling.ttl_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        // one server only, bad scheme, short secret, zero ttl
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn turn_servers_are_accepted() {
        let mut config = FixoConfig::default();
        config.rtc.ice_servers = vec![
            "stun:stun.example.org:3478".into(),
            "turns:turn.example.org:5349".into(),
        ];
        assert!(validate_config(&config).is_ok());
    }
}
