//! OpenID Connect session identity
//!
//! - [`discovery`] resolves and caches the authority's metadata document.
//! - [`exchange`] performs the password, refresh and revocation calls.
//! - [`session`] persists a session's tokens and principal.
//! - [`manager`] orchestrates sign-in, renewal and sign-out.
//! - [`identity`] answers "who is signed in".

pub mod claims;
pub mod discovery;
pub mod exchange;
pub mod identity;
pub mod manager;
pub mod session;

pub use claims::{Claim, Claims};
pub use discovery::{DiscoveryDocument, DiscoveryPolicy, DiscoveryResolver, DiscoveryResponse};
pub use exchange::{ClientCredentials, CredentialExchanger, CredentialStyle, Failure};
pub use identity::IdentityResolver;
pub use manager::{SignInOutcome, SignInRequest, TokenLifecycleManager};
pub use session::{
    AuthenticatedSession, FileSessionStore, MemorySessionStore, Principal, SessionId,
    SessionTokenStore, TokenSet,
};
