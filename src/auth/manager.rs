//! Token lifecycle orchestration
//!
//! [`TokenLifecycleManager`] ties discovery, credential exchange and the
//! session store together into the three operations a web layer needs:
//! sign-in, renewal and sign-out.  It owns no session state of its own;
//! every call names the session it acts on.
//!
//! Session state machine:
//!
//! ```text
//! Anonymous --sign_in--> Active --renew--> Active
//!                          |                 |
//!                          +--sign_out-------+--renew rejected / sign_out--> Anonymous
//! ```
//!
//! A rejected renewal leaves the stored record untouched and returns `None`;
//! the caller decides whether to sign the session out.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::discovery::{DiscoveryDocument, DiscoveryResolver};
use crate::auth::exchange::{CredentialExchanger, Failure};
use crate::auth::session::{AuthenticatedSession, Principal, SessionId, SessionTokenStore, TokenSet};
use crate::config::Config;
use crate::error::{identity_error, IdentityError, Result};
use crate::metrics::{self, OperationTimer};

/// Credentials submitted by the user.  Never persisted.
#[derive(Clone)]
pub struct SignInRequest {
    /// Username or email address.
    pub username: String,
    /// Plain-text password.
    pub password: String,
    /// Keep the session beyond the browser session.
    pub remember: bool,
}

impl std::fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remember", &self.remember)
            .finish()
    }
}

/// Result of a sign-in attempt that reached the authorization server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// The session is now active.
    SignedIn,
    /// The server rejected the credentials; the session is unchanged.
    Rejected(Failure),
}

impl SignInOutcome {
    /// HTTP-style status of the outcome: 200 or 400.
    pub fn status_code(&self) -> u16 {
        match self {
            SignInOutcome::SignedIn => 200,
            SignInOutcome::Rejected(failure) => failure.status_code,
        }
    }

    /// Returns `true` for [`SignInOutcome::SignedIn`].
    pub fn is_signed_in(&self) -> bool {
        matches!(self, SignInOutcome::SignedIn)
    }
}

type SessionLocks = Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>;

/// Orchestrates sign-in, renewal and sign-out against one authority.
///
/// Sign-ins, renewals and sign-outs of the same session are serialised;
/// operations on different sessions run independently.
pub struct TokenLifecycleManager {
    discovery: Arc<DiscoveryResolver>,
    exchanger: CredentialExchanger,
    store: Arc<dyn SessionTokenStore>,
    authority: Url,
    refresh_claims_on_renew: bool,
    session_locks: SessionLocks,
}

impl TokenLifecycleManager {
    /// Creates a manager for the authority at `authority`.
    pub fn new(
        discovery: Arc<DiscoveryResolver>,
        exchanger: CredentialExchanger,
        store: Arc<dyn SessionTokenStore>,
        authority: Url,
    ) -> Self {
        Self {
            discovery,
            exchanger,
            store,
            authority,
            refresh_claims_on_renew: false,
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builds a manager, HTTP client included, from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the HTTP client
    /// cannot be built.
    pub fn from_config(config: &Config, store: Arc<dyn SessionTokenStore>) -> Result<Self> {
        let http = Arc::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(config.http.timeout_seconds))
                .build()?,
        );
        let discovery = Arc::new(DiscoveryResolver::new(
            Arc::clone(&http),
            config.authority.policy(),
            Duration::from_secs(config.authority.cache_ttl_seconds),
        ));
        let exchanger = CredentialExchanger::new(http, config.client.credentials());

        Ok(Self::new(discovery, exchanger, store, config.authority.base_url()?)
            .with_refresh_claims_on_renew(config.session.refresh_claims_on_renew))
    }

    /// Re-fetch user info after every successful renewal.
    pub fn with_refresh_claims_on_renew(mut self, enabled: bool) -> Self {
        self.refresh_claims_on_renew = enabled;
        self
    }

    /// The session store this manager writes to.
    pub fn store(&self) -> Arc<dyn SessionTokenStore> {
        Arc::clone(&self.store)
    }

    /// The authority base address.
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Resolves the authority's discovery document.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::DiscoveryFailed`] if resolution fails and
    /// [`IdentityError::Cancelled`] if `cancel` fires first.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Arc<DiscoveryDocument>> {
        cancellable(cancel, "discovery", async {
            self.discovery.resolve(&self.authority).await.into_document()
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Sign-in
    // -----------------------------------------------------------------------

    /// Signs `session` in with a username and password.
    ///
    /// On [`SignInOutcome::Rejected`] the session is not touched.  On
    /// [`SignInOutcome::SignedIn`] the session holds the new tokens and a
    /// principal built from the user-info claims.  Waits for any renewal
    /// or sign-out already running on the same session.
    ///
    /// # Errors
    ///
    /// Fatal kinds: [`IdentityError::DiscoveryFailed`],
    /// [`IdentityError::TokenEndpoint`],
    /// [`IdentityError::MalformedTokenResponse`],
    /// [`IdentityError::UserInfoFailed`], [`IdentityError::Cancelled`] and
    /// store failures.  None of them modify the session.
    pub async fn sign_in(
        &self,
        session: &SessionId,
        request: SignInRequest,
        cancel: &CancellationToken,
    ) -> Result<SignInOutcome> {
        let timer = OperationTimer::start("sign_in");
        let result = self
            .with_session_lock(session, Some(cancel), self.sign_in_inner(session, request, cancel))
            .await;
        timer.finish(match &result {
            Ok(SignInOutcome::SignedIn) => "signed_in",
            Ok(SignInOutcome::Rejected(_)) => "rejected",
            Err(e) => error_outcome(e),
        });
        result
    }

    async fn sign_in_inner(
        &self,
        session: &SessionId,
        request: SignInRequest,
        cancel: &CancellationToken,
    ) -> Result<SignInOutcome> {
        let discovery = self.discover(cancel).await?;

        let exchanged = cancellable(
            cancel,
            "sign-in",
            self.exchanger
                .exchange_password(&discovery, &request.username, &request.password),
        )
        .await?;

        let tokens = match exchanged {
            Ok(tokens) => tokens,
            Err(failure) => {
                tracing::debug!(session = %session, errors = ?failure.errors, "Sign-in rejected");
                return Ok(SignInOutcome::Rejected(failure));
            }
        };

        ensure_not_cancelled(cancel, "sign-in")?;

        let record = AuthenticatedSession {
            principal: Principal::from_claims(tokens.claims.clone()),
            tokens,
            persistent: request.remember,
        };
        self.store.write(session, record).await?;

        tracing::info!(session = %session, persistent = request.remember, "Session signed in");
        Ok(SignInOutcome::SignedIn)
    }

    // -----------------------------------------------------------------------
    // Renewal
    // -----------------------------------------------------------------------

    /// Exchanges the session's refresh token for new tokens.
    ///
    /// Returns `Ok(None)` when the server rejects the refresh token.  The
    /// stored record is then left exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::NoActiveSession`] if the session is anonymous.
    /// - [`IdentityError::DiscoveryFailed`], [`IdentityError::TokenEndpoint`],
    ///   [`IdentityError::MalformedTokenResponse`] on infrastructure failure.
    /// - [`IdentityError::UserInfoFailed`] when claims are refreshed and the
    ///   lookup fails.
    /// - [`IdentityError::Cancelled`] if `cancel` fires before the write.
    pub async fn renew_from_refresh_token(
        &self,
        session: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenSet>> {
        let timer = OperationTimer::start("renew");
        let result = self
            .with_session_lock(session, Some(cancel), self.renew_inner(session, cancel))
            .await;
        timer.finish(match &result {
            Ok(Some(_)) => "renewed",
            Ok(None) => "rejected",
            Err(e) => error_outcome(e),
        });
        result
    }

    async fn renew_inner(
        &self,
        session: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenSet>> {
        // Read under the lock so a queued renewal sees the rotated token.
        let current = self
            .store
            .read(session)
            .await?
            .ok_or_else(|| IdentityError::NoActiveSession(format!("session {session}")))?;

        let discovery = self.discover(cancel).await?;

        let issued = cancellable(
            cancel,
            "renewal",
            self.exchanger
                .exchange_refresh_token(&discovery, &current.tokens.refresh_token),
        )
        .await?;

        let Some(issued) = issued else {
            tracing::info!(session = %session, "Refresh token rejected; session left untouched");
            return Ok(None);
        };

        let mut tokens = issued.renew(&current.tokens);
        let mut principal = current.principal;

        if self.refresh_claims_on_renew {
            let claims = cancellable(
                cancel,
                "renewal",
                self.exchanger.user_info(&discovery, &tokens.access_token),
            )
            .await?;
            if claims != principal.claims {
                principal = Principal::from_claims(claims.clone());
            }
            tokens.claims = claims;
        }

        ensure_not_cancelled(cancel, "renewal")?;

        self.store
            .write(
                session,
                AuthenticatedSession {
                    principal,
                    tokens: tokens.clone(),
                    persistent: current.persistent,
                },
            )
            .await?;

        tracing::info!(session = %session, expires_at = %tokens.expires_at, "Session renewed");
        Ok(Some(tokens))
    }

    // -----------------------------------------------------------------------
    // Sign-out
    // -----------------------------------------------------------------------

    /// Revokes the session's refresh token (best effort) and clears it.
    ///
    /// Discovery and revocation failures are logged and counted, never
    /// returned.  Cancellation stops the revocation attempt but the local
    /// clear still happens.
    ///
    /// # Errors
    ///
    /// Only if the session store fails to clear the record.
    pub async fn sign_out(&self, session: &SessionId, cancel: &CancellationToken) -> Result<()> {
        let timer = OperationTimer::start("sign_out");
        let result = self
            .with_session_lock(session, None, self.sign_out_inner(session, cancel))
            .await;
        timer.finish(if result.is_ok() { "signed_out" } else { "error" });
        result
    }

    async fn sign_out_inner(&self, session: &SessionId, cancel: &CancellationToken) -> Result<()> {
        match self.revocable_refresh_token(session).await {
            Ok(token) => {
                let revoked: std::result::Result<(), (&'static str, anyhow::Error)> = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err((
                        "cancelled",
                        anyhow::Error::from(IdentityError::Cancelled("sign-out".to_string())),
                    )),
                    r = self.revoke_upstream(&token) => r,
                };
                if let Err((stage, e)) = revoked {
                    tracing::warn!(
                        session = %session,
                        stage,
                        error = %e,
                        "Refresh token not revoked; clearing session locally"
                    );
                    metrics::record_sign_out_degraded(stage);
                }
            }
            Err(stage) => metrics::record_sign_out_degraded(stage),
        }

        self.store.clear(session).await?;
        tracing::info!(session = %session, "Session signed out");
        Ok(())
    }

    /// The refresh token sign-out should revoke, or the degradation stage
    /// explaining why there is none.
    async fn revocable_refresh_token(
        &self,
        session: &SessionId,
    ) -> std::result::Result<String, &'static str> {
        match self.store.read_refresh_token(session).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => {
                tracing::debug!(session = %session, "No refresh token to revoke");
                Err("no_refresh_token")
            }
            Err(e) => {
                tracing::warn!(session = %session, error = %e, "Could not read session before sign-out");
                Err("store_read")
            }
        }
    }

    async fn revoke_upstream(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<(), (&'static str, anyhow::Error)> {
        let discovery = self
            .discovery
            .resolve(&self.authority)
            .await
            .into_document()
            .map_err(|e| ("discovery", e))?;
        self.exchanger
            .revoke(&discovery, refresh_token)
            .await
            .map_err(|e| ("revoke", e))
    }

    // -----------------------------------------------------------------------
    // Per-session serialisation
    // -----------------------------------------------------------------------

    /// Runs `op` while holding the session's lock.  Waiting for the lock is
    /// abandoned if `cancel` is given and fires.
    async fn with_session_lock<T, F>(
        &self,
        session: &SessionId,
        cancel: Option<&CancellationToken>,
        op: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lease = self.lease_session(session);
        let guard = match cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                guard = lease.lock.lock() => Some(guard),
            },
            None => Some(lease.lock.lock().await),
        };
        match guard {
            Some(_guard) => op.await,
            None => Err(IdentityError::Cancelled(format!("waiting for session {session}")).into()),
        }
    }

    fn lease_session<'a>(&'a self, session: &'a SessionId) -> SessionLease<'a> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        SessionLease {
            locks: &self.session_locks,
            session,
            lock: Arc::clone(locks.entry(session.clone()).or_default()),
        }
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds a reference to a session's lock and drops the map entry on the way
/// out, including when the owning future is dropped mid-flight.
struct SessionLease<'a> {
    locks: &'a SessionLocks,
    session: &'a SessionId,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(self.session);
        }
    }
}

/// Races `fut` against `cancel`.
async fn cancellable<T, F>(cancel: &CancellationToken, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(IdentityError::Cancelled(operation.to_string()).into()),
        result = fut => result,
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(IdentityError::Cancelled(operation.to_string()).into());
    }
    Ok(())
}

fn error_outcome(err: &anyhow::Error) -> &'static str {
    match identity_error(err) {
        Some(IdentityError::Cancelled(_)) => "cancelled",
        _ => "error",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
