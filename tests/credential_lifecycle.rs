//! Integration tests for keeping a stored credential usable: renewal,
//! rotation, revocation and endpoint failures.
//!
//! Each test creates its own in-memory SQLite database and a wiremock token
//! endpoint, so the refresher runs against the real store and HTTP client.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use workbridge::auth::{
    Credential, CredentialStore, CredentialUpdate, HttpTokenEndpoint, RefreshError, TokenRefresher,
};
use workbridge::storage::Database;
use workbridge::Platform;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn credential(access: &str, expires_at: i64) -> Credential {
    Credential {
        access_token: SecretString::from(access),
        refresh_token: SecretString::from("1//refresh"),
        expires_at,
        auth_user_hint: Some("me@corp.example".to_string()),
        last_sync_watermark: Some(42),
        connected_at: 1_690_000_000_000,
    }
}

fn refresher(db: &Database, server: &MockServer, timeout: Duration) -> TokenRefresher {
    let endpoint = HttpTokenEndpoint::new(
        reqwest::Client::new(),
        format!("{}/token", server.uri()),
        "client-id",
        SecretString::from("client-secret"),
    )
    .with_timeout(timeout);
    TokenRefresher::new(Arc::new(db.clone()), Arc::new(endpoint))
}

// ============================================================================
// Renewal
// ============================================================================

#[tokio::test]
async fn test_expiring_token_is_renewed_once_and_persisted() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Gmail, &credential("ya29.old", now_ms() + 30_000))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.new",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = refresher(&db, &server, Duration::from_secs(5));
    let before = now_ms();
    let valid = refresher.ensure_valid("u1", Platform::Gmail).await.unwrap();
    assert_eq!(valid.access_token(), "ya29.new");

    let stored = db.get("u1", Platform::Gmail).await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose_secret(), "ya29.new");
    assert_eq!(stored.refresh_token.expose_secret(), "1//refresh");
    assert!(stored.expires_at >= before + 3_599_000);
    // Refresh path never writes the watermark
    assert_eq!(stored.last_sync_watermark, Some(42));

    // Second call sees a fresh token and stays off the network
    let again = refresher.ensure_valid("u1", Platform::Gmail).await.unwrap();
    assert_eq!(again.access_token(), "ya29.new");
}

#[tokio::test]
async fn test_fresh_token_makes_no_call() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Drive, &credential("ya29.live", now_ms() + 3_600_000))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let valid = refresher(&db, &server, Duration::from_secs(5))
        .ensure_valid("u1", Platform::Drive)
        .await
        .unwrap();
    assert_eq!(valid.access_token(), "ya29.live");
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Drive, &credential("ya29.old", 0))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "ya29.new",
            "expires_in": 3599,
            "refresh_token": "1//rotated"
        })))
        .mount(&server)
        .await;

    refresher(&db, &server, Duration::from_secs(5))
        .ensure_valid("u1", Platform::Drive)
        .await
        .unwrap();

    let stored = db.get("u1", Platform::Drive).await.unwrap().unwrap();
    assert_eq!(stored.refresh_token.expose_secret(), "1//rotated");
}

#[tokio::test]
async fn test_concurrent_callers_share_one_renewal() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Gmail, &credential("ya29.old", now_ms()))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({
                    "access_token": "ya29.new",
                    "expires_in": 3599
                }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let refresher = refresher(&db, &server, Duration::from_secs(5));
    let (a, b, c) = tokio::join!(
        refresher.ensure_valid("u1", Platform::Gmail),
        refresher.ensure_valid("u1", Platform::Gmail),
        refresher.ensure_valid("u1", Platform::Gmail),
    );
    for result in [a, b, c] {
        assert_eq!(result.unwrap().access_token(), "ya29.new");
    }
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_revoked_refresh_token_requires_reauth() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Gmail, &credential("ya29.old", 10))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "Token has been expired or revoked."
        })))
        .mount(&server)
        .await;

    let err = refresher(&db, &server, Duration::from_secs(5))
        .ensure_valid("u1", Platform::Gmail)
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::ReauthRequired { platform: Platform::Gmail }));

    let stored = db.get("u1", Platform::Gmail).await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose_secret(), "ya29.old");
    assert_eq!(stored.expires_at, 10);
}

#[tokio::test]
async fn test_endpoint_timeout_is_transient_and_store_unchanged() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Drive, &credential("ya29.old", 10))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "access_token": "late" }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = refresher(&db, &server, Duration::from_millis(100))
        .ensure_valid("u1", Platform::Drive)
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Transient(_)), "got {err:?}");

    let stored = db.get("u1", Platform::Drive).await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose_secret(), "ya29.old");
    assert_eq!(stored.refresh_token.expose_secret(), "1//refresh");
    assert_eq!(stored.expires_at, 10);
    assert_eq!(stored.last_sync_watermark, Some(42));
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let db = test_db().await;
    let server = MockServer::start().await;
    db.save_credential("u1", Platform::Gmail, &credential("ya29.old", 10))
        .await
        .unwrap();

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = refresher(&db, &server, Duration::from_secs(5))
        .ensure_valid("u1", Platform::Gmail)
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Transient(_)));
}

#[tokio::test]
async fn test_unlinked_and_disconnected_accounts() {
    let db = test_db().await;
    let server = MockServer::start().await;
    let refresher = refresher(&db, &server, Duration::from_secs(5));

    let err = refresher.ensure_valid("u1", Platform::Gmail).await.unwrap_err();
    assert!(matches!(err, RefreshError::NotConnected { platform: Platform::Gmail }));

    db.save_credential("u1", Platform::Gmail, &credential("ya29.live", now_ms() + 3_600_000))
        .await
        .unwrap();
    assert!(refresher.ensure_valid("u1", Platform::Gmail).await.is_ok());

    assert!(db.delete_credential("u1", Platform::Gmail).await.unwrap());
    let err = refresher.ensure_valid("u1", Platform::Gmail).await.unwrap_err();
    assert!(matches!(err, RefreshError::NotConnected { .. }));
}

#[tokio::test]
async fn test_watermark_update_keeps_tokens() {
    let db = test_db().await;
    db.save_credential("u1", Platform::Gmail, &credential("ya29.live", 99))
        .await
        .unwrap();

    db.update("u1", Platform::Gmail, CredentialUpdate::watermark(1_700_000_000_000))
        .await
        .unwrap();

    let stored = db.get("u1", Platform::Gmail).await.unwrap().unwrap();
    assert_eq!(stored.last_sync_watermark, Some(1_700_000_000_000));
    assert_eq!(stored.access_token.expose_secret(), "ya29.live");
    assert_eq!(stored.expires_at, 99);
}
