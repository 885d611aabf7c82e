//! Subject resolution for the current session
//!
//! This is the only module that gives a claim a meaning: the authenticated
//! user's id is the value of the `sub` claim.

use std::sync::Arc;

use crate::auth::session::{SessionId, SessionTokenStore};
use crate::error::{IdentityError, Result};

/// Name of the subject identifier claim.
pub const SUBJECT_CLAIM: &str = "sub";

/// Resolves the signed-in user of a session.
pub struct IdentityResolver {
    store: Arc<dyn SessionTokenStore>,
}

impl IdentityResolver {
    /// Creates a resolver reading from `store`.
    pub fn new(store: Arc<dyn SessionTokenStore>) -> Self {
        Self { store }
    }

    /// Returns the `sub` claim of the session's principal.
    ///
    /// An expired session still resolves; renewal is the caller's call.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NoSubjectClaim`] when the session is
    /// anonymous or its principal carries no `sub`.  Callers are expected
    /// to check authentication state first.
    pub async fn current_user_id(&self, session: &SessionId) -> Result<String> {
        let record = self.store.read(session).await?.ok_or_else(|| {
            IdentityError::NoSubjectClaim(format!("session {session} is anonymous"))
        })?;

        record
            .principal
            .claims
            .find_first(SUBJECT_CLAIM)
            .map(str::to_string)
            .ok_or_else(|| {
                IdentityError::NoSubjectClaim(format!("session {session} has no sub claim")).into()
            })
    }
}
