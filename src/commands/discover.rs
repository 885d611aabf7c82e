//! Discovery command handler

use std::sync::Arc;

use colored::Colorize;
use prettytable::{row, Table};
use tokio_util::sync::CancellationToken;

use crate::auth::discovery::DiscoveryDocument;
use crate::auth::manager::TokenLifecycleManager;
use crate::auth::session::MemorySessionStore;
use crate::config::Config;
use crate::error::Result;

/// Resolves the configured authority and prints its endpoints.
pub async fn discover(config: Config, json: bool, cancel: CancellationToken) -> Result<()> {
    // Discovery never touches a session; skip opening the configured store.
    let manager = TokenLifecycleManager::from_config(&config, Arc::new(MemorySessionStore::new()))?;
    let document = manager.discover(&cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(document.as_ref())?);
    } else {
        print_document(manager.authority().as_str(), &document);
    }
    Ok(())
}

fn print_document(authority: &str, document: &DiscoveryDocument) {
    let revocation = document
        .revocation_endpoint
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "(not advertised)".yellow().to_string());

    let mut table = Table::new();
    table.add_row(row!["Issuer", document.issuer]);
    table.add_row(row!["Token endpoint", document.token_endpoint]);
    table.add_row(row!["User info endpoint", document.userinfo_endpoint]);
    table.add_row(row!["Revocation endpoint", revocation]);

    println!("\nDiscovery document for {}:\n", authority.cyan());
    table.printstd();
    println!();
}
