// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `/etc/fixo/fixo.toml`
//! 3. `~/.config/fixo/fixo.toml`
//! 4. `./fixo.toml`
//! 5. `FIXO_*` environment variables

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::FixoConfig;

/// Config sections reachable through `FIXO_<SECTION>_<KEY>` variables.
const ENV_SECTIONS: &[&str] = &[
    "app",
    "storage",
    "blobs",
    "gateway",
    "rtc",
    "signaling",
    "client",
];

pub(crate) const SYSTEM_CONFIG: &str = "/etc/fixo/fixo.toml";
pub(crate) const LOCAL_CONFIG: &str = "fixo.toml";

pub(crate) fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fixo/fixo.toml"))
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<FixoConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string over the defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<FixoConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FixoConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from one explicit file plus env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FixoConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FixoConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full Figment before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(FixoConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG))
        .merge(Toml::file(user_config_path().unwrap_or_default()))
        .merge(Toml::file(LOCAL_CONFIG))
        .merge(env_provider())
}

/// Maps `FIXO_GATEWAY_TOKEN_SECRET` to `gateway.token_secret`.
///
/// Only the first underscore after a known section name becomes a dot;
/// `Env::split("_")` would turn `token_secret` into `token.secret`.
pub(crate) fn env_key(raw: &str) -> String {
    for section in ENV_SECTIONS {
        if let Some(rest) = raw
            .strip_prefix(section)
            .and_then(|r| r.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    raw.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("FIXO_").map(|key| env_key(key.as_str()).into())
}
