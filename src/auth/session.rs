//! Session token persistence
//!
//! A session is process-external state identified by an opaque
//! [`SessionId`] (typically the value of a session cookie).  It is either
//! anonymous (no record) or holds exactly one [`AuthenticatedSession`]: the
//! authentication principal plus the current [`TokenSet`].
//!
//! [`SessionTokenStore`] is the seam between the lifecycle manager and
//! whatever physically keeps the session.  Two implementations are provided:
//!
//! - [`MemorySessionStore`] -- in-process map, for tests and single-process
//!   hosts.
//! - [`FileSessionStore`] -- one JSON file per session, replaced atomically
//!   via write-then-rename.
//!
//! Every write replaces the whole record, so a reader never observes a new
//! access token paired with a stale refresh token.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::auth::claims::Claims;
use crate::error::{IdentityError, Result};

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Opaque handle of the caller's transport-level session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// TokenSet
// ---------------------------------------------------------------------------

/// Tokens and claims obtained from a successful grant.
///
/// Always fully populated; a grant that cannot fill every field fails
/// instead of producing a partial set.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use oidc_session::auth::claims::Claims;
/// use oidc_session::auth::session::TokenSet;
///
/// let tokens = TokenSet {
///     access_token: "AT1".to_string(),
///     refresh_token: "RT1".to_string(),
///     expires_at: Utc::now() + Duration::hours(1),
///     claims: Claims::from_pairs([("sub", "user-42")]),
/// };
/// assert!(!tokens.is_expired());
/// // Secrets never reach logs.
/// assert!(!format!("{tokens:?}").contains("AT1"));
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Bearer access token.
    pub access_token: String,
    /// Refresh token used for renewal and revocation.
    pub refresh_token: String,
    /// Absolute UTC expiry of the access token.
    pub expires_at: DateTime<Utc>,
    /// Claims describing the subject, in server order.
    pub claims: Claims,
}

impl TokenSet {
    /// Returns `true` once `expires_at` has passed.
    ///
    /// An expired set still carries valid claims; only the access token is
    /// unusable downstream.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("claims", &self.claims)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// AuthenticatedSession
// ---------------------------------------------------------------------------

/// The authenticated subject of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// Claims the principal was built from.
    pub claims: Claims,
    /// When the principal was (re-)established.
    pub authenticated_at: DateTime<Utc>,
}

impl Principal {
    /// Builds a principal from claims, stamped now.
    pub fn from_claims(claims: Claims) -> Self {
        Self {
            claims,
            authenticated_at: Utc::now(),
        }
    }
}

/// Everything an authenticated session holds.  Written as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    /// The signed-in subject.
    pub principal: Principal,
    /// Current tokens.
    pub tokens: TokenSet,
    /// Whether the session should outlive the browser session
    /// ("remember me").
    pub persistent: bool,
}

// ---------------------------------------------------------------------------
// SessionTokenStore
// ---------------------------------------------------------------------------

/// Persistence of token material for a session.
///
/// Implementations must make [`write`](Self::write) atomic with respect to
/// concurrent readers of the same session and [`clear`](Self::clear)
/// idempotent.
#[async_trait]
pub trait SessionTokenStore: Send + Sync {
    /// Replaces the session's record.
    async fn write(&self, session: &SessionId, record: AuthenticatedSession) -> Result<()>;

    /// Returns the session's record, or `None` when anonymous.
    async fn read(&self, session: &SessionId) -> Result<Option<AuthenticatedSession>>;

    /// Removes all token material and the principal.  No-op when anonymous.
    async fn clear(&self, session: &SessionId) -> Result<()>;

    /// Returns the stored refresh token, or `None` when anonymous.
    async fn read_refresh_token(&self, session: &SessionId) -> Result<Option<String>> {
        Ok(self
            .read(session)
            .await?
            .map(|record| record.tokens.refresh_token))
    }
}

// ---------------------------------------------------------------------------
// MemorySessionStore
// ---------------------------------------------------------------------------

/// In-process session store backed by a single `RwLock<HashMap>`.
///
/// # Examples
///
/// ```
/// use oidc_session::auth::session::{MemorySessionStore, SessionId, SessionTokenStore};
///
/// # async fn example() -> oidc_session::error::Result<()> {
/// let store = MemorySessionStore::new();
/// let session = SessionId::new("cookie-123");
/// assert!(store.read(&session).await?.is_none());
/// store.clear(&session).await?; // idempotent
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, AuthenticatedSession>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of authenticated sessions held.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` when no session is authenticated.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionTokenStore for MemorySessionStore {
    async fn write(&self, session: &SessionId, record: AuthenticatedSession) -> Result<()> {
        self.sessions.write().await.insert(session.clone(), record);
        Ok(())
    }

    async fn read(&self, session: &SessionId) -> Result<Option<AuthenticatedSession>> {
        Ok(self.sessions.read().await.get(session).cloned())
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        self.sessions.write().await.remove(session);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileSessionStore
// ---------------------------------------------------------------------------

/// Session store keeping one JSON file per session in a directory.
///
/// File names are the hex SHA-256 of the session id, so arbitrary cookie
/// values never reach the filesystem.  Writes go to a sibling temp file that
/// is then renamed over the target, which replaces the record atomically.
pub struct FileSessionStore {
    directory: PathBuf,
}

impl FileSessionStore {
    /// Creates a store rooted at `directory`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::SessionStore`] if the directory cannot be
    /// created.
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(|e| {
            IdentityError::SessionStore(format!(
                "failed to create session directory {}: {e}",
                directory.display()
            ))
        })?;
        Ok(Self { directory })
    }

    /// Platform default directory (e.g. `~/.local/share/oidc-session/sessions`).
    pub fn default_directory() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "oidc-session")
            .map(|dirs| dirs.data_dir().join("sessions"))
    }

    /// Directory the store writes into.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, session: &SessionId) -> PathBuf {
        let digest = Sha256::digest(session.as_str().as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.directory.join(format!("{name}.json"))
    }
}

#[async_trait]
impl SessionTokenStore for FileSessionStore {
    async fn write(&self, session: &SessionId, record: AuthenticatedSession) -> Result<()> {
        let path = self.path_for(session);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec_pretty(&record)?;

        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            IdentityError::SessionStore(format!("failed to write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(IdentityError::SessionStore(format!(
                "failed to replace {}: {e}",
                path.display()
            ))
            .into());
        }
        Ok(())
    }

    async fn read(&self, session: &SessionId) -> Result<Option<AuthenticatedSession>> {
        let path = self.path_for(session);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IdentityError::SessionStore(format!(
                "failed to read {}: {e}",
                path.display()
            ))
            .into()),
        }
    }

    async fn clear(&self, session: &SessionId) -> Result<()> {
        let path = self.path_for(session);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IdentityError::SessionStore(format!(
                "failed to remove {}: {e}",
                path.display()
            ))
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
