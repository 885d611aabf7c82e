//! Error types for oidc-session
//!
//! This module defines the fatal error kinds raised by the token lifecycle,
//! using `thiserror` for ergonomic error handling.
//!
//! User-facing rejections (wrong credentials, a refresh token the server no
//! longer accepts) are *not* errors; they are returned as values
//! ([`Failure`](crate::auth::exchange::Failure) and `Ok(None)` respectively).
//! Everything in [`IdentityError`] means either the authorization server is
//! unreachable or misbehaving, or the caller broke a contract.

use thiserror::Error;

/// Main error type for oidc-session operations
///
/// Public functions return [`Result`], an `anyhow::Result`; callers that need
/// to branch on the kind use `err.downcast_ref::<IdentityError>()`.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Discovery document could not be fetched or failed policy validation
    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    /// User-info lookup failed after a successful token grant
    #[error("User info lookup failed: {0}")]
    UserInfoFailed(String),

    /// Token endpoint unreachable or answered with a server error
    #[error("Token endpoint error: {0}")]
    TokenEndpoint(String),

    /// Token endpoint answered 2xx with a body that is not a usable token set
    #[error("Malformed token response: {0}")]
    MalformedTokenResponse(String),

    /// Renewal attempted on a session that holds no refresh token
    #[error("No active session: {0}")]
    NoActiveSession(String),

    /// Subject requested from an anonymous session or one without `sub`
    #[error("No subject claim: {0}")]
    NoSubjectClaim(String),

    /// The operation was aborted by its cancellation token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Session persistence failed
    #[error("Session store error: {0}")]
    SessionStore(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for oidc-session operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

/// Returns the [`IdentityError`] carried by `err`, if any.
///
/// # Examples
///
/// ```
/// use oidc_session::error::{identity_error, IdentityError};
///
/// let err: anyhow::Error = IdentityError::NoActiveSession("s1".to_string()).into();
/// assert!(matches!(identity_error(&err), Some(IdentityError::NoActiveSession(_))));
/// ```
pub fn identity_error(err: &anyhow::Error) -> Option<&IdentityError> {
    err.downcast_ref::<IdentityError>()
}
