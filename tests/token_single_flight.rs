use std::sync::Arc;

use anyhow::Result;
use ledgerlink::provider::TokenManager;
use secrecy::SecretString;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager(server: &MockServer) -> TokenManager {
    TokenManager::new(
        server.uri(),
        SecretString::from("secret-id"),
        SecretString::from("secret-key"),
    )
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .and(body_partial_json(serde_json::json!({
            "secret_id": "secret-id",
            "secret_key": "secret-key",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"access": "tok-1", "access_expires": 3600, "refresh": "r", "refresh_expires": 7200}"#,
            "application/json",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let manager = Arc::new(manager(&server));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(
            async move { manager.get_valid_token().await },
        ));
    }

    for handle in handles {
        assert_eq!(handle.await??, "tok-1");
    }
    Ok(())
}

#[tokio::test]
async fn token_within_safety_margin_is_refreshed() -> Result<()> {
    let server = MockServer::start().await;

    // A 60-second ttl is entirely consumed by the safety margin, so the
    // cached token is never considered valid.
    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"access": "tok-short", "access_expires": 60}"#,
            "application/json",
        ))
        .expect(2)
        .mount(&server)
        .await;

    let manager = manager(&server);
    assert_eq!(manager.get_valid_token().await?, "tok-short");
    assert_eq!(manager.get_valid_token().await?, "tok-short");
    Ok(())
}

#[tokio::test]
async fn rejected_exchange_surfaces_as_auth_error() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .respond_with(ResponseTemplate::new(401).set_body_raw(
            r#"{"summary": "Authentication failed"}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let err = manager(&server).get_valid_token().await.unwrap_err();
    assert!(matches!(
        err,
        ledgerlink::provider::ProviderError::Auth(_)
    ));
    Ok(())
}

#[tokio::test]
async fn empty_token_surfaces_as_auth_error() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"access": "", "access_expires": 3600}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let err = manager(&server).get_valid_token().await.unwrap_err();
    assert!(matches!(
        err,
        ledgerlink::provider::ProviderError::Auth(_)
    ));
    Ok(())
}
