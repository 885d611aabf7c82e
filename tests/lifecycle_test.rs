//! Token lifecycle integration tests using wiremock
//!
//! Drives sign-in, renewal and sign-out end to end against a mock
//! authorization server and checks the session state after each step.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use oidc_session::auth::identity::IdentityResolver;
use oidc_session::auth::manager::{SignInOutcome, SignInRequest};
use oidc_session::auth::session::{
    FileSessionStore, MemorySessionStore, SessionId, SessionTokenStore,
};
use oidc_session::error::{identity_error, IdentityError};

mod common;
use common::{
    active_session, manager_for, mount_discovery, mount_password_grant, mount_userinfo,
    token_body, REVOCATION_PATH, TOKEN_PATH, USERINFO_PATH, WELL_KNOWN_PATH,
};

fn request(password: &str, remember: bool) -> SignInRequest {
    SignInRequest {
        username: "a@b.com".to_string(),
        password: password.to_string(),
        remember,
    }
}

async fn mount_refresh(server: &MockServer, refresh: &str, access: &str, rotated: Option<&str>) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains(format!("refresh_token={refresh}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, rotated)))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Sign-in
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sign_in_then_current_user_id_is_sub() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_password_grant(&server, "correct", "AT1", "RT1").await;
    mount_userinfo(&server, "AT1", json!({"sub": "user-42", "name": "Ada"})).await;

    let store = Arc::new(MemorySessionStore::new());
    let manager = manager_for(&server, store.clone());
    let session = SessionId::new("cookie-1");

    let outcome = manager
        .sign_in(&session, request("correct", true), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, SignInOutcome::SignedIn);
    assert_eq!(outcome.status_code(), 200);

    let record = store.read(&session).await.unwrap().unwrap();
    assert_eq!(record.tokens.access_token, "AT1");
    assert_eq!(record.tokens.refresh_token, "RT1");
    assert!(record.persistent);
    assert!(record
        .tokens
        .claims
        .iter()
        .any(|c| c.name == "sub" && c.value == "user-42"));

    let resolver = IdentityResolver::new(store);
    assert_eq!(resolver.current_user_id(&session).await.unwrap(), "user-42");
}

#[tokio::test]
async fn test_sign_in_wrong_password_leaves_session_anonymous() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"errors": ["Email or password is wrong"]})),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let manager = manager_for(&server, store.clone());
    let session = SessionId::new("cookie-1");

    let outcome = manager
        .sign_in(&session, request("wrong", false), &CancellationToken::new())
        .await
        .unwrap();

    match outcome {
        SignInOutcome::Rejected(failure) => {
            assert_eq!(failure.status_code, 400);
            assert!(!failure.errors.is_empty());
        }
        SignInOutcome::SignedIn => panic!("wrong password must not sign in"),
    }
    assert!(store.read(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sign_in_rejection_keeps_existing_session() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let existing = active_session("AT0", "RT0");
    store.write(&session, existing.clone()).await.unwrap();

    let outcome = manager_for(&server, store.clone())
        .sign_in(&session, request("wrong", false), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status_code(), 400);
    assert_eq!(store.read(&session).await.unwrap(), Some(existing));
}

#[tokio::test]
async fn test_sign_in_user_info_failure_is_fatal_and_anonymous() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_password_grant(&server, "correct", "AT1", "RT1").await;
    Mock::given(method("GET"))
        .and(path(USERINFO_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let err = manager_for(&server, store.clone())
        .sign_in(&session, request("correct", false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::UserInfoFailed(_))
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_sign_in_discovery_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WELL_KNOWN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let err = manager_for(&server, store.clone())
        .sign_in(
            &SessionId::new("cookie-1"),
            request("correct", false),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::DiscoveryFailed(_))
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_sign_in_cancelled_mid_request_leaves_session_anonymous() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT1", Some("RT1")))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let manager = manager_for(&server, store.clone());
    let session = SessionId::new("cookie-1");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = manager
        .sign_in(&session, request("correct", false), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(identity_error(&err), Some(IdentityError::Cancelled(_))));
    assert!(store.read(&session).await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Renewal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_renew_overwrites_tokens_and_keeps_principal() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_refresh(&server, "RT1", "AT2", Some("RT2")).await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let before = active_session("AT1", "RT1");
    store.write(&session, before.clone()).await.unwrap();

    let renewed = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(renewed.access_token, "AT2");
    assert_eq!(renewed.refresh_token, "RT2");
    assert_eq!(renewed.claims, before.tokens.claims);

    let after = store.read(&session).await.unwrap().unwrap();
    assert_eq!(after.tokens, renewed);
    assert_eq!(after.principal, before.principal);
    assert!(after.persistent);
}

#[tokio::test]
async fn test_renew_non_rotating_server_keeps_refresh_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_refresh(&server, "RT1", "AT2", None).await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();

    let renewed = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(renewed.access_token, "AT2");
    assert_eq!(renewed.refresh_token, "RT1");
}

#[tokio::test]
async fn test_renew_rejected_returns_none_and_session_untouched() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let before = active_session("AT1", "RT1");
    store.write(&session, before.clone()).await.unwrap();

    let renewed = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap();

    assert!(renewed.is_none());
    let after = store.read(&session).await.unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(
        store.read_refresh_token(&session).await.unwrap().as_deref(),
        Some("RT1")
    );
}

#[tokio::test]
async fn test_renew_throttled_is_fatal_and_session_untouched() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "5"))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let before = active_session("AT1", "RT1");
    store.write(&session, before.clone()).await.unwrap();

    let err = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::TokenEndpoint(_))
    ));
    assert_eq!(store.read(&session).await.unwrap(), Some(before));
}

#[tokio::test]
async fn test_renew_request_timeout_status_is_fatal() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(408))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store
        .write(&session, active_session("AT1", "RT1"))
        .await
        .unwrap();

    let err = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::TokenEndpoint(_))
    ));
    assert_eq!(
        store.read_refresh_token(&session).await.unwrap().as_deref(),
        Some("RT1")
    );
}

#[tokio::test]
async fn test_renew_discovery_failure_is_fatal_and_session_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WELL_KNOWN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT2", Some("RT2"))))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let before = active_session("AT1", "RT1");
    store.write(&session, before.clone()).await.unwrap();

    let err = manager_for(&server, store.clone())
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::DiscoveryFailed(_))
    ));
    assert_eq!(store.read(&session).await.unwrap(), Some(before));
}

#[tokio::test]
async fn test_renew_anonymous_session_is_contract_violation() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;

    let err = manager_for(&server, Arc::new(MemorySessionStore::new()))
        .renew_from_refresh_token(&SessionId::new("nobody"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::NoActiveSession(_))
    ));
}

#[tokio::test]
async fn test_renew_refreshes_claims_when_enabled() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_refresh(&server, "RT1", "AT2", Some("RT2")).await;
    mount_userinfo(&server, "AT2", json!({"sub": "user-42", "name": "Ada Lovelace"})).await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();

    let manager = manager_for(&server, store.clone()).with_refresh_claims_on_renew(true);
    let renewed = manager
        .renew_from_refresh_token(&session, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(renewed.claims.find_first("name"), Some("Ada Lovelace"));
    let after = store.read(&session).await.unwrap().unwrap();
    assert_eq!(after.principal.claims.find_first("name"), Some("Ada Lovelace"));
}

#[tokio::test]
async fn test_concurrent_renewals_use_rotated_refresh_token() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    // Single-use refresh tokens: a second use of RT1 falls through to 404.
    mount_refresh(&server, "RT1", "AT2", Some("RT2")).await;
    mount_refresh(&server, "RT2", "AT3", Some("RT3")).await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();
    let manager = manager_for(&server, store.clone());

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(
        manager.renew_from_refresh_token(&session, &cancel),
        manager.renew_from_refresh_token(&session, &cancel),
    );

    assert!(first.unwrap().is_some());
    assert!(second.unwrap().is_some());
    let after = store.read(&session).await.unwrap().unwrap();
    assert_eq!(after.tokens.access_token, "AT3");
    assert_eq!(after.tokens.refresh_token, "RT3");
}

#[tokio::test]
async fn test_renew_cancelled_mid_request_leaves_session_untouched() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT2", Some("RT2")))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    let before = active_session("AT1", "RT1");
    store.write(&session, before.clone()).await.unwrap();
    let manager = manager_for(&server, store.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = manager
        .renew_from_refresh_token(&session, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(identity_error(&err), Some(IdentityError::Cancelled(_))));
    assert_eq!(store.read(&session).await.unwrap(), Some(before));
}

// ---------------------------------------------------------------------------
// Sign-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sign_out_revokes_and_clears() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(REVOCATION_PATH))
        .and(body_string_contains("token=RT1"))
        .and(body_string_contains("token_type_hint=refresh_token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();

    manager_for(&server, store.clone())
        .sign_out(&session, &CancellationToken::new())
        .await
        .unwrap();

    assert!(store.read(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_even_when_revoke_fails() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    Mock::given(method("POST"))
        .and(path(REVOCATION_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();
    let manager = manager_for(&server, store.clone());

    manager
        .sign_out(&session, &CancellationToken::new())
        .await
        .unwrap();
    assert!(store.read(&session).await.unwrap().is_none());

    // Second sign-out on the now anonymous session is a silent no-op.
    manager
        .sign_out(&session, &CancellationToken::new())
        .await
        .unwrap();
    assert!(store.read(&session).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_even_when_discovery_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(WELL_KNOWN_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySessionStore::new());
    let session = SessionId::new("cookie-1");
    store.write(&session, active_session("AT1", "RT1")).await.unwrap();

    manager_for(&server, store.clone())
        .sign_out(&session, &CancellationToken::new())
        .await
        .unwrap();

    assert!(store.read(&session).await.unwrap().is_none());
    let err = IdentityResolver::new(store)
        .current_user_id(&session)
        .await
        .unwrap_err();
    assert!(matches!(
        identity_error(&err),
        Some(IdentityError::NoSubjectClaim(_))
    ));
}

// ---------------------------------------------------------------------------
// File-backed sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_lifecycle_with_file_store() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_password_grant(&server, "correct", "AT1", "RT1").await;
    mount_userinfo(&server, "AT1", json!({"sub": "user-42"})).await;
    mount_refresh(&server, "RT1", "AT2", Some("RT2")).await;
    Mock::given(method("POST"))
        .and(path(REVOCATION_PATH))
        .and(body_string_contains("token=RT2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionTokenStore> = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    let manager = manager_for(&server, store.clone());
    let session = SessionId::new("cookie-1");
    let cancel = CancellationToken::new();

    assert!(manager
        .sign_in(&session, request("correct", false), &cancel)
        .await
        .unwrap()
        .is_signed_in());

    // A second store over the same directory sees the persisted session.
    let reopened = Arc::new(FileSessionStore::new(dir.path()).unwrap());
    assert_eq!(
        IdentityResolver::new(reopened.clone())
            .current_user_id(&session)
            .await
            .unwrap(),
        "user-42"
    );

    let renewed = manager
        .renew_from_refresh_token(&session, &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(renewed.refresh_token, "RT2");
    assert_eq!(
        reopened.read_refresh_token(&session).await.unwrap().as_deref(),
        Some("RT2")
    );

    manager.sign_out(&session, &cancel).await.unwrap();
    assert!(reopened.read(&session).await.unwrap().is_none());
}
