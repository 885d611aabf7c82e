//! Token endpoint, user-info and revocation calls
//!
//! [`CredentialExchanger`] speaks the wire protocol with the authorization
//! server on behalf of one confidential client:
//!
//! - [`exchange_password`](CredentialExchanger::exchange_password) --
//!   resource-owner password grant followed by a user-info lookup.
//! - [`exchange_refresh_token`](CredentialExchanger::exchange_refresh_token)
//!   -- refresh grant.
//! - [`revoke`](CredentialExchanger::revoke) -- RFC 7009 token revocation.
//!
//! Failures are split three ways.  A grant the server *rejects* (400 or
//! 401) is an expected outcome and comes back as a value: a [`Failure`] for
//! the password grant, `None` for the refresh grant.  A server that cannot
//! be reached, throttles (408, 429), answers any other error status, or
//! returns garbage is fatal and comes back as an [`IdentityError`].
//!
//! # References
//!
//! - RFC 6749 sections 4.3 and 6 <https://www.rfc-editor.org/rfc/rfc6749>
//! - RFC 7009 <https://www.rfc-editor.org/rfc/rfc7009>
//! - OpenID Connect Core 1.0 section 5.3 (UserInfo)

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::claims::Claims;
use crate::auth::discovery::DiscoveryDocument;
use crate::auth::session::TokenSet;
use crate::error::{IdentityError, Result};

// ---------------------------------------------------------------------------
// Client credentials
// ---------------------------------------------------------------------------

/// How the client authenticates to the token and revocation endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStyle {
    /// `Authorization: Basic` with form-urlencoded id and secret.
    #[default]
    Basic,
    /// `client_id` / `client_secret` form fields.
    Post,
}

/// Registration of this application at the authorization server.
#[derive(Clone)]
pub struct ClientCredentials {
    /// OAuth client identifier.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Space-separated scopes requested with the password grant.
    pub scope: Option<String>,
    /// Client authentication method.
    pub style: CredentialStyle,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("scope", &self.scope)
            .field("style", &self.style)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Failure
// ---------------------------------------------------------------------------

/// Status code attached to every credential rejection.
pub const REJECTION_STATUS: u16 = 400;

/// A user-facing rejection, ready to render.
///
/// # Examples
///
/// ```
/// use oidc_session::auth::exchange::Failure;
///
/// let failure = Failure::new(vec!["Email or password is wrong".to_string()]);
/// assert_eq!(failure.status_code, 400);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Messages in the order the server gave them.  Never empty.
    pub errors: Vec<String>,
    /// Always [`REJECTION_STATUS`].
    pub status_code: u16,
}

impl Failure {
    /// Creates a rejection carrying `errors`.
    pub fn new(errors: Vec<String>) -> Self {
        Self {
            errors,
            status_code: REJECTION_STATUS,
        }
    }

    /// Builds a rejection from a token endpoint error body.
    ///
    /// Prefers a non-empty `errors` array (the shape the identity server
    /// emits for bad credentials), then `error_description`, then `error`,
    /// then the HTTP status itself.
    fn from_error_body(status: StatusCode, body: &str) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let errors = match parsed {
            Some(b) if !b.errors.is_empty() => b.errors,
            Some(ErrorBody {
                error_description: Some(d),
                ..
            }) if !d.is_empty() => vec![d],
            Some(ErrorBody { error: Some(e), .. }) if !e.is_empty() => vec![e],
            _ => vec![format!("token endpoint returned {status}")],
        };
        Self::new(errors)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.errors.join("; "), self.status_code)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "Errors")]
    errors: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

// ---------------------------------------------------------------------------
// Token responses
// ---------------------------------------------------------------------------

/// Tokens returned by a grant, before claims are attached.
#[derive(Clone, PartialEq)]
pub struct IssuedTokens {
    /// Bearer access token.
    pub access_token: String,
    /// New refresh token; `None` when the server does not rotate.
    pub refresh_token: Option<String>,
    /// Absolute UTC expiry of the access token.
    pub expires_at: DateTime<Utc>,
}

impl IssuedTokens {
    /// Combines these tokens with an existing set, keeping its claims and,
    /// if the server did not rotate it, its refresh token.
    pub fn renew(self, previous: &TokenSet) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .unwrap_or_else(|| previous.refresh_token.clone()),
            expires_at: self.expires_at,
            claims: previous.claims.clone(),
        }
    }
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Raw JSON response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    /// `expires_in` seconds become an absolute timestamp; a missing or
    /// negative value means the token is treated as already expired.
    fn into_issued(self) -> IssuedTokens {
        let secs = self.expires_in.unwrap_or(0).clamp(0, i64::from(u32::MAX));
        IssuedTokens {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at: Utc::now() + chrono::Duration::seconds(secs),
        }
    }
}

/// `400` carries `invalid_grant` and friends, `401` carries
/// `invalid_client`.  Any other non-success status, `408` and `429`
/// included, is an infrastructure failure.
fn is_grant_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED)
}

/// How the token endpoint answered a grant request.
enum GrantResponse {
    Issued(IssuedTokens),
    Rejected { status: StatusCode, body: String },
}

// ---------------------------------------------------------------------------
// CredentialExchanger
// ---------------------------------------------------------------------------

/// Performs grants, user-info lookups and revocations for one client.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use oidc_session::auth::exchange::{ClientCredentials, CredentialExchanger, CredentialStyle};
///
/// let exchanger = CredentialExchanger::new(
///     Arc::new(reqwest::Client::new()),
///     ClientCredentials {
///         client_id: "web-client".to_string(),
///         client_secret: "secret".to_string(),
///         scope: Some("openid profile offline_access".to_string()),
///         style: CredentialStyle::Basic,
///     },
/// );
/// ```
pub struct CredentialExchanger {
    http: Arc<reqwest::Client>,
    credentials: ClientCredentials,
}

impl CredentialExchanger {
    /// Creates an exchanger for the given client.
    pub fn new(http: Arc<reqwest::Client>, credentials: ClientCredentials) -> Self {
        Self { http, credentials }
    }

    /// The client this exchanger authenticates as.
    pub fn credentials(&self) -> &ClientCredentials {
        &self.credentials
    }

    /// Exchanges a username and password for a full [`TokenSet`].
    ///
    /// On a successful grant the new access token is immediately used to
    /// fetch the subject's claims from the user-info endpoint.
    ///
    /// # Returns
    ///
    /// - `Ok(Ok(tokens))` -- granted, claims attached.
    /// - `Ok(Err(failure))` -- the server rejected the credentials.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::TokenEndpoint`] if the token endpoint is
    ///   unreachable or answers 5xx.
    /// - [`IdentityError::MalformedTokenResponse`] if the grant succeeds
    ///   without a parsable body or without a refresh token.
    /// - [`IdentityError::UserInfoFailed`] if the user-info lookup fails.
    pub async fn exchange_password(
        &self,
        discovery: &DiscoveryDocument,
        username: &str,
        password: &str,
    ) -> Result<std::result::Result<TokenSet, Failure>> {
        let mut params = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ];
        if let Some(scope) = self.credentials.scope.as_deref() {
            params.push(("scope", scope));
        }

        tracing::debug!(endpoint = %discovery.token_endpoint, "Requesting password grant");
        let issued = match self.grant(&discovery.token_endpoint, params).await? {
            GrantResponse::Issued(issued) => issued,
            GrantResponse::Rejected { status, body } => {
                let failure = Failure::from_error_body(status, &body);
                tracing::debug!(%status, errors = ?failure.errors, "Password grant rejected");
                return Ok(Err(failure));
            }
        };

        let refresh_token = issued.refresh_token.clone().ok_or_else(|| {
            IdentityError::MalformedTokenResponse(
                "password grant returned no refresh_token".to_string(),
            )
        })?;

        let claims = self.user_info(discovery, &issued.access_token).await?;

        Ok(Ok(TokenSet {
            access_token: issued.access_token,
            refresh_token,
            expires_at: issued.expires_at,
            claims,
        }))
    }

    /// Exchanges a refresh token for new tokens.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when the server rejects the refresh token; the session
    /// should then be treated as signed out.
    ///
    /// # Errors
    ///
    /// [`IdentityError::TokenEndpoint`] or
    /// [`IdentityError::MalformedTokenResponse`] as for the password grant.
    pub async fn exchange_refresh_token(
        &self,
        discovery: &DiscoveryDocument,
        refresh_token: &str,
    ) -> Result<Option<IssuedTokens>> {
        let params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        tracing::debug!(endpoint = %discovery.token_endpoint, "Requesting refresh grant");
        match self.grant(&discovery.token_endpoint, params).await? {
            GrantResponse::Issued(issued) => Ok(Some(issued)),
            GrantResponse::Rejected { status, body } => {
                let failure = Failure::from_error_body(status, &body);
                tracing::debug!(%status, errors = ?failure.errors, "Refresh grant rejected");
                Ok(None)
            }
        }
    }

    /// Revokes a refresh token at the revocation endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::TokenEndpoint`] when the server advertises no
    /// revocation endpoint, cannot be reached, or answers non-2xx.  Callers
    /// treat revocation as best-effort.
    pub async fn revoke(&self, discovery: &DiscoveryDocument, refresh_token: &str) -> Result<()> {
        let endpoint = discovery.revocation_endpoint.as_ref().ok_or_else(|| {
            IdentityError::TokenEndpoint("server advertises no revocation_endpoint".to_string())
        })?;

        let params = vec![
            ("token", refresh_token),
            ("token_type_hint", "refresh_token"),
        ];

        tracing::debug!(endpoint = %endpoint, "Revoking refresh token");
        let resp = self
            .authenticated_post(endpoint, params)
            .send()
            .await
            .map_err(|e| IdentityError::TokenEndpoint(format!("revocation request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IdentityError::TokenEndpoint(format!(
                "revocation endpoint returned {status}: {body}"
            ))
            .into());
        }
        Ok(())
    }

    /// Fetches the subject's claims with a bearer access token.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UserInfoFailed`] on any failure: transport,
    /// non-2xx status, or a body that is not a JSON object.
    pub async fn user_info(
        &self,
        discovery: &DiscoveryDocument,
        access_token: &str,
    ) -> Result<Claims> {
        tracing::debug!(endpoint = %discovery.userinfo_endpoint, "Requesting user info");
        let resp = self
            .http
            .get(discovery.userinfo_endpoint.clone())
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| IdentityError::UserInfoFailed(format!("user info request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(IdentityError::UserInfoFailed(format!(
                "user info endpoint returned {status}"
            ))
            .into());
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            IdentityError::UserInfoFailed(format!("failed to parse user info response: {e}"))
        })?;

        match body {
            serde_json::Value::Object(map) => Ok(Claims::from_json_object(&map)),
            other => Err(IdentityError::UserInfoFailed(format!(
                "user info response is not a JSON object: {other}"
            ))
            .into()),
        }
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn grant<'a>(
        &'a self,
        endpoint: &Url,
        params: Vec<(&'a str, &'a str)>,
    ) -> Result<GrantResponse> {
        let resp = self
            .authenticated_post(endpoint, params)
            .send()
            .await
            .map_err(|e| IdentityError::TokenEndpoint(format!("token request failed: {e}")))?;

        let status = resp.status();
        if is_grant_rejection(status) {
            let body = resp.text().await.unwrap_or_default();
            return Ok(GrantResponse::Rejected { status, body });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IdentityError::TokenEndpoint(format!(
                "token endpoint returned {status}: {body}"
            ))
            .into());
        }

        let raw: TokenResponse = resp.json().await.map_err(|e| {
            IdentityError::MalformedTokenResponse(format!("failed to parse token response: {e}"))
        })?;

        Ok(GrantResponse::Issued(raw.into_issued()))
    }

    fn authenticated_post<'a>(
        &'a self,
        endpoint: &Url,
        mut params: Vec<(&'a str, &'a str)>,
    ) -> reqwest::RequestBuilder {
        let request = self.http.post(endpoint.clone());
        match self.credentials.style {
            CredentialStyle::Basic => request
                .header(reqwest::header::AUTHORIZATION, self.basic_authorization())
                .form(&params),
            CredentialStyle::Post => {
                params.push(("client_id", &self.credentials.client_id));
                params.push(("client_secret", &self.credentials.client_secret));
                request.form(&params)
            }
        }
    }

    /// `Basic base64(urlencode(id) ":" urlencode(secret))` per RFC 6749
    /// section 2.3.1.
    fn basic_authorization(&self) -> String {
        let id: String =
            url::form_urlencoded::byte_serialize(self.credentials.client_id.as_bytes()).collect();
        let secret: String =
            url::form_urlencoded::byte_serialize(self.credentials.client_secret.as_bytes())
                .collect();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        format!("Basic {encoded}")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
