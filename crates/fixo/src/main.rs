// SPDX-FileCopyrightText: 2026 Fixo Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixo - live support sessions between students and admins.
//!
//! This is the binary entry point: the gateway server, token issuing and a
//! terminal chat client.

mod chat;
mod serve;
mod shutdown;

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use colored::Colorize;

use fixo_config::FixoConfig;
use fixo_core::{FixoError, Identity, Role};
use fixo_gateway::TokenSigner;

/// Fixo - live support sessions between students and admins.
#[derive(Parser, Debug)]
#[command(name = "fixo", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the default locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the support gateway.
    Serve,
    /// Issue an identity token signed with `gateway.token_secret`.
    Token {
        /// User id carried by the token.
        #[arg(long)]
        user: String,
        /// `student` or `admin`.
        #[arg(long, default_value = "student", value_parser = parse_role)]
        role: Role,
        /// Lifetime in seconds; defaults to `gateway.token_ttl_secs`.
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Open a live chat against a running gateway.
    Chat {
        /// Gateway URL, overriding `client.server_url`.
        #[arg(long)]
        server: Option<String>,
        /// Identity token, overriding `client.token`.
        #[arg(long)]
        token: Option<String>,
    },
    /// Print the effective configuration with secrets redacted.
    Config,
}

fn parse_role(value: &str) -> Result<Role, String> {
    Role::from_str(value).map_err(|_| format!("unknown role '{value}' (expected student or admin)"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => fixo_config::load_and_validate_path(path),
        None => fixo_config::load_and_validate(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            fixo_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::Token {
            user,
            role,
            ttl_secs,
        }) => issue_token(&config, Identity::new(user, role), ttl_secs).map(|token| {
            println!("{token}");
        }),
        Some(Commands::Chat { server, token }) => {
            let mut config = config;
            if server.is_some() {
                config.client.server_url = server;
            }
            if token.is_some() {
                config.client.token = token;
            }
            chat::run_chat(config).await
        }
        Some(Commands::Config) => redacted_toml(&config).map(|toml| print!("{toml}")),
        None => {
            println!("fixo: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {e}", "error".red().bold());
        std::process::exit(1);
    }
}

fn issue_token(
    config: &FixoConfig,
    identity: Identity,
    ttl_secs: Option<u64>,
) -> Result<String, FixoError> {
    let mut gateway = config.gateway.clone();
    if let Some(ttl) = ttl_secs {
        gateway.token_ttl_secs = ttl;
    }
    let signer = TokenSigner::from_config(&gateway).ok_or_else(|| {
        FixoError::Config("gateway.token_secret must be set to issue tokens".to_string())
    })?;
    signer.issue(&identity)
}

fn redacted_toml(config: &FixoConfig) -> Result<String, FixoError> {
    let mut shown = config.clone();
    if shown.gateway.token_secret.is_some() {
        shown.gateway.token_secret = Some("<redacted>".to_string());
    }
    if shown.client.token.is_some() {
        shown.client.token = Some("<redacted>".to_string());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| FixoError::Internal(format!("failed to render config: {e}")))
}
