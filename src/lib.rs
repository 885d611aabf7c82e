//! oidc-session - OpenID Connect session identity library
//!
//! This library manages the token lifecycle of a user session against an
//! OAuth 2.0 / OpenID Connect authorization server: discovery, password
//! sign-in, refresh-token renewal, revocation on sign-out and resolution of
//! the signed-in subject.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `auth`: Discovery, credential exchange, session storage and the
//!   lifecycle manager
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `metrics`: Lifecycle counters and latency histograms
//! - `cli` / `commands`: The `oidc-session` command-line front end
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use oidc_session::auth::{MemorySessionStore, SessionId, SignInRequest, TokenLifecycleManager};
//! use oidc_session::Config;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.authority.base_url = "https://auth.example.com".to_string();
//!     config.client.client_id = "web-client".to_string();
//!     config.validate()?;
//!
//!     let manager = TokenLifecycleManager::from_config(&config, Arc::new(MemorySessionStore::new()))?;
//!     let session = SessionId::generate();
//!     let outcome = manager
//!         .sign_in(
//!             &session,
//!             SignInRequest {
//!                 username: "a@b.com".to_string(),
//!                 password: "correct".to_string(),
//!                 remember: false,
//!             },
//!             &CancellationToken::new(),
//!         )
//!         .await?;
//!     println!("status {}", outcome.status_code());
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use auth::{IdentityResolver, SessionId, SignInOutcome, SignInRequest, TokenLifecycleManager};
pub use config::Config;
pub use error::{IdentityError, Result};
