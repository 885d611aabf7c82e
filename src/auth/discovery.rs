//! OpenID Connect discovery for the authorization server
//!
//! This module fetches the authorization server's metadata document from
//! `<base>/.well-known/openid-configuration` and turns it into a
//! [`DiscoveryDocument`] whose endpoints are absolute URLs ready to use.
//!
//! Resolution never fails with an error: network problems, HTTP errors,
//! malformed bodies and policy violations all come back as
//! [`DiscoveryResponse::Error`], and the caller decides whether that is fatal.
//! Successful documents may be memoized per base address for a bounded
//! time-to-live.
//!
//! # References
//!
//! - OpenID Connect Discovery 1.0 <https://openid.net/specs/openid-connect-discovery-1_0.html>
//! - RFC 8414 <https://www.rfc-editor.org/rfc/rfc8414>

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::{Host, Url};

use crate::error::{IdentityError, Result};
use crate::metrics;

/// Path appended to the base address to locate the metadata document.
pub const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

// ---------------------------------------------------------------------------
// DiscoveryPolicy
// ---------------------------------------------------------------------------

/// Validation rules applied to the base address and the fetched document.
///
/// The defaults are strict: HTTPS is required everywhere except on loopback
/// hosts, the advertised issuer must match the base address, and every
/// endpoint must live on the same authority as the base address.  Plaintext
/// intra-cluster deployments switch `require_https` off explicitly.
///
/// # Examples
///
/// ```
/// use oidc_session::auth::discovery::DiscoveryPolicy;
///
/// let policy = DiscoveryPolicy::default();
/// assert!(policy.require_https);
///
/// let plaintext = DiscoveryPolicy { require_https: false, ..DiscoveryPolicy::default() };
/// assert!(!plaintext.require_https);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPolicy {
    /// Reject `http` base addresses and endpoints.
    pub require_https: bool,
    /// Exempt `localhost` / loopback IPs from `require_https`.
    pub allow_http_on_loopback: bool,
    /// Require `issuer` to equal the base address (trailing slash ignored).
    pub validate_issuer_name: bool,
    /// Require every endpoint to share the base address's scheme, host and port.
    pub validate_endpoints: bool,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            require_https: true,
            allow_http_on_loopback: true,
            validate_issuer_name: true,
            validate_endpoints: true,
        }
    }
}

impl DiscoveryPolicy {
    fn check_scheme(&self, url: &Url, what: &str) -> std::result::Result<(), String> {
        if !self.require_https || url.scheme() == "https" {
            return Ok(());
        }
        if self.allow_http_on_loopback && url.scheme() == "http" && is_loopback(url) {
            return Ok(());
        }
        Err(format!("{what} must use HTTPS: {url}"))
    }
}

pub(crate) fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Endpoint metadata of an authorization server.
///
/// Immutable once returned; shared through an [`Arc`] so cached copies are
/// cheap to hand out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier advertised by the server.
    pub issuer: String,
    /// Token endpoint used for the password and refresh grants.
    pub token_endpoint: Url,
    /// User-info endpoint queried with the bearer access token.
    pub userinfo_endpoint: Url,
    /// Revocation endpoint (RFC 7009).  Absent when the server does not
    /// advertise one; sign-out then only clears the local session.
    pub revocation_endpoint: Option<Url>,
    /// Metadata fields not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    issuer: String,
    token_endpoint: String,
    #[serde(default)]
    userinfo_endpoint: Option<String>,
    #[serde(default)]
    revocation_endpoint: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

/// Category of a failed discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryErrorType {
    /// The base address or the document violated the [`DiscoveryPolicy`].
    PolicyViolation,
    /// The server answered with a non-success status.
    Http,
    /// The request never produced a response.
    Transport,
    /// The body was not a usable metadata document.
    Malformed,
}

/// Outcome of [`DiscoveryResolver::resolve`].
#[derive(Debug, Clone)]
pub enum DiscoveryResponse {
    /// Metadata fetched and validated.
    Document(Arc<DiscoveryDocument>),
    /// Discovery failed; `detail` is suitable for logs.
    Error {
        /// What went wrong.
        error_type: DiscoveryErrorType,
        /// Human-readable description.
        detail: String,
    },
}

impl DiscoveryResponse {
    fn error(error_type: DiscoveryErrorType, detail: impl Into<String>) -> Self {
        Self::Error {
            error_type,
            detail: detail.into(),
        }
    }

    /// Returns `true` when discovery failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Failure description, when discovery failed.
    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Self::Document(_) => None,
            Self::Error { detail, .. } => Some(detail),
        }
    }

    /// Converts the response into the document, treating failure as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::DiscoveryFailed`] when discovery failed.
    pub fn into_document(self) -> Result<Arc<DiscoveryDocument>> {
        match self {
            Self::Document(doc) => Ok(doc),
            Self::Error { error_type, detail } => Err(IdentityError::DiscoveryFailed(format!(
                "{error_type:?}: {detail}"
            ))
            .into()),
        }
    }
}

/// Builds `<base>/.well-known/openid-configuration`.
///
/// The base address's path is kept so issuers hosted under a sub-path
/// resolve correctly; query and fragment are dropped.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use oidc_session::auth::discovery::well_known_url;
///
/// let base = Url::parse("https://auth.example.com/realms/shop").unwrap();
/// assert_eq!(
///     well_known_url(&base).as_str(),
///     "https://auth.example.com/realms/shop/.well-known/openid-configuration"
/// );
/// ```
pub fn well_known_url(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), WELL_KNOWN_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn cache_key(base: &Url) -> String {
    base.as_str().trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// DiscoveryResolver
// ---------------------------------------------------------------------------

struct CachedDocument {
    document: Arc<DiscoveryDocument>,
    fetched_at: Instant,
}

/// Fetches, validates and optionally caches discovery documents.
///
/// The cache is keyed by base address.  Concurrent refreshes of the same
/// entry are not coordinated; the last writer wins, and staleness is bounded
/// by the TTL.  Failed resolutions are never cached.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use url::Url;
/// use oidc_session::auth::discovery::{DiscoveryPolicy, DiscoveryResolver};
///
/// # async fn example() -> oidc_session::error::Result<()> {
/// let resolver = DiscoveryResolver::new(
///     Arc::new(reqwest::Client::new()),
///     DiscoveryPolicy::default(),
///     Duration::from_secs(300),
/// );
/// let base = Url::parse("https://auth.example.com")?;
/// let doc = resolver.resolve(&base).await.into_document()?;
/// println!("token endpoint: {}", doc.token_endpoint);
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryResolver {
    http: Arc<reqwest::Client>,
    policy: DiscoveryPolicy,
    cache_ttl: Duration,
    cache: RwLock<HashMap<String, CachedDocument>>,
}

impl DiscoveryResolver {
    /// Creates a resolver.  A zero `cache_ttl` disables caching.
    pub fn new(http: Arc<reqwest::Client>, policy: DiscoveryPolicy, cache_ttl: Duration) -> Self {
        Self {
            http,
            policy,
            cache_ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The policy applied to every resolution.
    pub fn policy(&self) -> &DiscoveryPolicy {
        &self.policy
    }

    /// Resolves the discovery document for `base`.
    ///
    /// Serves a cached document while it is younger than the TTL, otherwise
    /// fetches and validates a fresh one.
    pub async fn resolve(&self, base: &Url) -> DiscoveryResponse {
        let key = cache_key(base);

        if !self.cache_ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    metrics::record_discovery_cache("hit");
                    return DiscoveryResponse::Document(Arc::clone(&entry.document));
                }
            }
        }

        let response = self.fetch(base).await;

        if let DiscoveryResponse::Document(ref document) = response {
            if !self.cache_ttl.is_zero() {
                metrics::record_discovery_cache("miss");
                self.cache.write().await.insert(
                    key,
                    CachedDocument {
                        document: Arc::clone(document),
                        fetched_at: Instant::now(),
                    },
                );
            }
        }

        response
    }

    /// Drops the cached document for `base`, if any.
    pub async fn invalidate(&self, base: &Url) {
        self.cache.write().await.remove(&cache_key(base));
    }

    async fn fetch(&self, base: &Url) -> DiscoveryResponse {
        if let Err(detail) = self.policy.check_scheme(base, "base address") {
            return DiscoveryResponse::error(DiscoveryErrorType::PolicyViolation, detail);
        }

        let url = well_known_url(base);
        tracing::debug!(url = %url, "Fetching discovery document");

        let resp = match self.http.get(url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Discovery request failed");
                return DiscoveryResponse::error(
                    DiscoveryErrorType::Transport,
                    format!("discovery request to {url} failed: {e}"),
                );
            }
        };

        let status = resp.status();
        if !status.is_success() {
            return DiscoveryResponse::error(
                DiscoveryErrorType::Http,
                format!("discovery endpoint {url} returned {status}"),
            );
        }

        let raw: RawMetadata = match resp.json().await {
            Ok(raw) => raw,
            Err(e) => {
                return DiscoveryResponse::error(
                    DiscoveryErrorType::Malformed,
                    format!("failed to parse discovery document: {e}"),
                )
            }
        };

        match self.validate(base, raw) {
            Ok(document) => DiscoveryResponse::Document(Arc::new(document)),
            Err(resp) => resp,
        }
    }

    fn validate(
        &self,
        base: &Url,
        raw: RawMetadata,
    ) -> std::result::Result<DiscoveryDocument, DiscoveryResponse> {
        if self.policy.validate_issuer_name
            && raw.issuer.trim_end_matches('/') != base.as_str().trim_end_matches('/')
        {
            return Err(DiscoveryResponse::error(
                DiscoveryErrorType::PolicyViolation,
                format!(
                    "issuer name mismatch: expected {}, got {}",
                    base.as_str().trim_end_matches('/'),
                    raw.issuer
                ),
            ));
        }

        let userinfo = raw.userinfo_endpoint.as_deref().ok_or_else(|| {
            DiscoveryResponse::error(
                DiscoveryErrorType::Malformed,
                "discovery document has no userinfo_endpoint",
            )
        })?;

        let token_endpoint = self.endpoint(base, "token_endpoint", &raw.token_endpoint)?;
        let userinfo_endpoint = self.endpoint(base, "userinfo_endpoint", userinfo)?;
        let revocation_endpoint = raw
            .revocation_endpoint
            .as_deref()
            .map(|s| self.endpoint(base, "revocation_endpoint", s))
            .transpose()?;

        Ok(DiscoveryDocument {
            issuer: raw.issuer,
            token_endpoint,
            userinfo_endpoint,
            revocation_endpoint,
            extra: raw.extra,
        })
    }

    fn endpoint(
        &self,
        base: &Url,
        name: &str,
        value: &str,
    ) -> std::result::Result<Url, DiscoveryResponse> {
        let url = Url::parse(value).map_err(|e| {
            DiscoveryResponse::error(
                DiscoveryErrorType::Malformed,
                format!("{name} is not an absolute URL ({value}): {e}"),
            )
        })?;

        self.policy
            .check_scheme(&url, name)
            .map_err(|detail| DiscoveryResponse::error(DiscoveryErrorType::PolicyViolation, detail))?;

        if self.policy.validate_endpoints
            && (url.scheme() != base.scheme()
                || url.host_str() != base.host_str()
                || url.port_or_known_default() != base.port_or_known_default())
        {
            return Err(DiscoveryResponse::error(
                DiscoveryErrorType::PolicyViolation,
                format!("{name} {url} is not on the authority of {base}"),
            ));
        }

        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
