//! Command-line interface definition for oidc-session
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand};

/// oidc-session - OpenID Connect session client
///
/// Signs a local session in against an authorization server with the
/// password grant, renews it with its refresh token and signs it out.
#[derive(Parser, Debug, Clone)]
#[command(name = "oidc-session")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/oidc-session.yaml")]
    pub config: Option<String>,

    /// Override the authorization server base address
    #[arg(long, env = "OIDC_SESSION_AUTHORITY")]
    pub authority: Option<String>,

    /// Session identifier to act on
    #[arg(short, long, env = "OIDC_SESSION_ID", default_value = "default")]
    pub session: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for oidc-session
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Sign in with username and password
    SignIn {
        /// Username or email address
        #[arg(short, long)]
        username: String,

        /// Password (prefer the environment variable over the flag)
        #[arg(short, long, env = "OIDC_SESSION_PASSWORD", hide_env_values = true)]
        password: String,

        /// Keep the session beyond the browser session
        #[arg(short, long)]
        remember: bool,
    },

    /// Exchange the refresh token for new tokens
    Renew,

    /// Revoke the refresh token and clear the session
    SignOut,

    /// Show the signed-in user
    Whoami {
        /// List every claim
        #[arg(long)]
        claims: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Fetch and validate the discovery document
    Discover {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
