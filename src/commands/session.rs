//! Session lifecycle command handlers

use std::sync::Arc;

use colored::Colorize;
use prettytable::{format, row, Table};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::claims::Claims;
use crate::auth::identity::IdentityResolver;
use crate::auth::manager::{SignInOutcome, SignInRequest, TokenLifecycleManager};
use crate::auth::session::{AuthenticatedSession, SessionId, SessionTokenStore};
use crate::config::Config;
use crate::error::{IdentityError, Result};

fn build_manager(config: &Config) -> Result<TokenLifecycleManager> {
    let store = config.session.open_store()?;
    TokenLifecycleManager::from_config(config, store)
}

/// Signs the session in and reports the outcome.
///
/// A rejection is printed and reported as an error so the process exits
/// non-zero.
pub async fn sign_in(
    config: Config,
    session: SessionId,
    request: SignInRequest,
    cancel: CancellationToken,
) -> Result<()> {
    let manager = build_manager(&config)?;
    let username = request.username.clone();

    match manager.sign_in(&session, request, &cancel).await? {
        SignInOutcome::SignedIn => {
            let user = IdentityResolver::new(manager.store())
                .current_user_id(&session)
                .await
                .unwrap_or_else(|_| username);
            println!(
                "{} {} ({})",
                "Signed in as".green(),
                user.bold(),
                format!("session {session}").dimmed()
            );
            Ok(())
        }
        SignInOutcome::Rejected(failure) => {
            println!("{}", "Sign-in rejected:".red().bold());
            for error in &failure.errors {
                println!("  - {}", error);
            }
            anyhow::bail!("sign-in rejected with status {}", failure.status_code)
        }
    }
}

/// Renews the session's tokens.
///
/// A rejected refresh token signs the session out locally.
pub async fn renew(config: Config, session: SessionId, cancel: CancellationToken) -> Result<()> {
    let manager = build_manager(&config)?;

    match manager.renew_from_refresh_token(&session, &cancel).await? {
        Some(tokens) => {
            println!(
                "{} access token valid until {}",
                "Renewed:".green(),
                tokens.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        None => {
            println!(
                "{}",
                "Refresh token no longer accepted; signing out.".yellow()
            );
            manager.sign_out(&session, &cancel).await?;
            anyhow::bail!("session {session} could not be renewed")
        }
    }
}

/// Signs the session out.  Always ends with an anonymous session.
pub async fn sign_out(config: Config, session: SessionId, cancel: CancellationToken) -> Result<()> {
    let manager = build_manager(&config)?;
    manager.sign_out(&session, &cancel).await?;
    println!("{} {}", "Signed out".green(), format!("session {session}").dimmed());
    Ok(())
}

#[derive(Serialize)]
struct WhoamiOutput<'a> {
    session: &'a str,
    sub: &'a str,
    expires_at: String,
    expired: bool,
    persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<&'a Claims>,
}

/// Prints the signed-in user, optionally with every claim.
pub async fn whoami(config: Config, session: SessionId, show_claims: bool, json: bool) -> Result<()> {
    let store: Arc<dyn SessionTokenStore> = config.session.open_store()?;
    let sub = IdentityResolver::new(Arc::clone(&store))
        .current_user_id(&session)
        .await?;
    let record = store
        .read(&session)
        .await?
        .ok_or_else(|| IdentityError::NoActiveSession(format!("session {session}")))?;

    if json {
        let output = WhoamiOutput {
            session: session.as_str(),
            sub: &sub,
            expires_at: record.tokens.expires_at.to_rfc3339(),
            expired: record.tokens.is_expired(),
            persistent: record.persistent,
            claims: show_claims.then_some(&record.principal.claims),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_session_summary(&session, &sub, &record);
    if show_claims {
        print_claims_table(&record.principal.claims);
    }
    Ok(())
}

fn print_session_summary(session: &SessionId, sub: &str, record: &AuthenticatedSession) {
    let expiry = record.tokens.expires_at.format("%Y-%m-%d %H:%M:%S UTC");
    let state = if record.tokens.is_expired() {
        "expired".yellow()
    } else {
        "active".green()
    };

    println!("Session:    {}", session.as_str().cyan());
    println!("Subject:    {}", sub.bold());
    println!("Tokens:     {} (until {})", state, expiry);
    println!(
        "Persistent: {}",
        if record.persistent { "yes" } else { "no" }
    );
}

fn print_claims_table(claims: &Claims) {
    if claims.is_empty() {
        println!("{}", "No claims.".yellow());
        return;
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(row!["Claim".bold(), "Value".bold()]);
    for claim in claims {
        table.add_row(row![claim.name.cyan(), claim.value]);
    }

    println!();
    table.printstd();
    println!();
}
