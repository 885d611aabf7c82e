//! Shared fixtures for the integration tests: a mock authorization server
//! and managers wired to it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_session::auth::claims::Claims;
use oidc_session::auth::discovery::{DiscoveryPolicy, DiscoveryResolver};
use oidc_session::auth::exchange::{ClientCredentials, CredentialExchanger, CredentialStyle};
use oidc_session::auth::manager::TokenLifecycleManager;
use oidc_session::auth::session::{AuthenticatedSession, Principal, SessionTokenStore, TokenSet};

#[allow(dead_code)]
pub const TOKEN_PATH: &str = "/connect/token";
#[allow(dead_code)]
pub const USERINFO_PATH: &str = "/connect/userinfo";
#[allow(dead_code)]
pub const REVOCATION_PATH: &str = "/connect/revocation";
#[allow(dead_code)]
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// Discovery document for a server rooted at `base`.
#[allow(dead_code)]
pub fn discovery_body(base: &str, with_revocation: bool) -> serde_json::Value {
    let mut body = json!({
        "issuer": base,
        "token_endpoint": format!("{base}{TOKEN_PATH}"),
        "userinfo_endpoint": format!("{base}{USERINFO_PATH}"),
        "grant_types_supported": ["password", "refresh_token"]
    });
    if with_revocation {
        body["revocation_endpoint"] = json!(format!("{base}{REVOCATION_PATH}"));
    }
    body
}

#[allow(dead_code)]
pub async fn mount_discovery(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(WELL_KNOWN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_body(&server.uri(), true)))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn token_body(access: &str, refresh: Option<&str>) -> serde_json::Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 3600
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

/// Password grant for `username` / `password` issuing `access` + `refresh`.
#[allow(dead_code)]
pub async fn mount_password_grant(server: &MockServer, password: &str, access: &str, refresh: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains(format!("password={password}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, Some(refresh))))
        .mount(server)
        .await;
}

/// User info answering for bearer `access` with `claims`.
#[allow(dead_code)]
pub async fn mount_userinfo(server: &MockServer, access: &str, claims: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .and(header("authorization", format!("Bearer {access}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(claims))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn http_client() -> Arc<reqwest::Client> {
    Arc::new(
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build http client"),
    )
}

#[allow(dead_code)]
pub fn credentials(style: CredentialStyle) -> ClientCredentials {
    ClientCredentials {
        client_id: "web-client".to_string(),
        client_secret: "secret".to_string(),
        scope: Some("openid profile offline_access".to_string()),
        style,
    }
}

/// Manager pointed at `server`, discovery caching disabled.
#[allow(dead_code)]
pub fn manager_for(server: &MockServer, store: Arc<dyn SessionTokenStore>) -> TokenLifecycleManager {
    let http = http_client();
    let discovery = Arc::new(DiscoveryResolver::new(
        Arc::clone(&http),
        DiscoveryPolicy::default(),
        Duration::ZERO,
    ));
    let exchanger = CredentialExchanger::new(http, credentials(CredentialStyle::Basic));
    TokenLifecycleManager::new(
        discovery,
        exchanger,
        store,
        Url::parse(&server.uri()).expect("mock server uri"),
    )
}

/// An active session record holding `access` / `refresh` for `user-42`.
#[allow(dead_code)]
pub fn active_session(access: &str, refresh: &str) -> AuthenticatedSession {
    let claims = Claims::from_pairs([("sub", "user-42"), ("name", "Ada")]);
    AuthenticatedSession {
        principal: Principal::from_claims(claims.clone()),
        tokens: TokenSet {
            access_token: access.to_string(),
            refresh_token: refresh.to_string(),
            expires_at: Utc::now(),
            claims,
        },
        persistent: true,
    }
}
