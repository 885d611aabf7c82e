//! oidc-session - OpenID Connect session client
//!
#![doc = "Main entry point for the oidc-session CLI."]

use anyhow::Result;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oidc_session::auth::{SessionId, SignInRequest};
use oidc_session::cli::{Cli, Commands};
use oidc_session::commands;
use oidc_session::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.json_logs);
    oidc_session::metrics::init_metrics_exporter();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/oidc-session.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let session = SessionId::new(cli.session.clone());

    match cli.command {
        Commands::SignIn {
            username,
            password,
            remember,
        } => {
            tracing::info!(session = %session, "Signing in");
            let request = SignInRequest {
                username,
                password,
                remember,
            };
            commands::session::sign_in(config, session, request, cancel).await
        }
        Commands::Renew => {
            tracing::info!(session = %session, "Renewing session");
            commands::session::renew(config, session, cancel).await
        }
        Commands::SignOut => {
            tracing::info!(session = %session, "Signing out");
            commands::session::sign_out(config, session, cancel).await
        }
        Commands::Whoami { claims, json } => {
            commands::session::whoami(config, session, claims, json).await
        }
        Commands::Discover { json } => commands::discover::discover(config, json, cancel).await,
    }
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling outstanding requests");
            cancel.cancel();
        }
    });
}

fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("oidc_session=info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
