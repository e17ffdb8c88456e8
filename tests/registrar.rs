mod common;

use common::{MockServer, Reply};
use device_agent::{
    error::RegistrationError,
    http_client::build_client,
    services::registrar::{AccountIdentity, DeviceRegistrar, MAX_ATTEMPTS},
};
use std::time::Duration;

fn identity() -> AccountIdentity {
    AccountIdentity {
        email: "me@example.com".to_string(),
        password: "pw".to_string(),
        device_name: "kitchen".to_string(),
    }
}

fn registrar(base_url: &str, timeout: Duration) -> DeviceRegistrar {
    let client = build_client(timeout).expect("failed to create client");
    DeviceRegistrar::new(client, base_url, Duration::ZERO)
}

#[tokio::test]
async fn test_register_returns_token() {
    let server = MockServer::start(vec![Reply::Json(200, r#"{"token":"abc123"}"#)]).await;

    let token = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await
        .expect("registration should succeed");

    assert_eq!(token.value(), "abc123");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/rest/device/create");

    let body: serde_json::Value =
        serde_json::from_str(&requests[0].body).expect("body should be json");
    assert_eq!(
        body,
        serde_json::json!({"email": "me@example.com", "password": "pw", "name": "kitchen"})
    );
}

#[tokio::test]
async fn test_rejection_is_not_retried() {
    let server =
        MockServer::start(vec![Reply::Json(400, r#"{"message":"email taken"}"#)]).await;

    let result = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await;

    assert_eq!(
        result.map(|token| token.value().to_string()),
        Err(RegistrationError::Rejected("email taken".to_string()))
    );
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_server_errors_exhaust_attempts() {
    let server = MockServer::start(vec![Reply::Json(500, "{}")]).await;

    let result = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await;

    assert!(matches!(
        result,
        Err(RegistrationError::Exhausted { attempts, .. }) if attempts == MAX_ATTEMPTS
    ));
    assert_eq!(server.request_count(), MAX_ATTEMPTS as usize);
}

#[tokio::test]
async fn test_hanging_server_times_out_each_attempt() {
    let server = MockServer::start(vec![Reply::Hang]).await;

    let result = registrar(&server.base_url, Duration::from_millis(300))
        .register(&identity())
        .await;

    assert!(matches!(result, Err(RegistrationError::Exhausted { .. })));
    assert_eq!(server.request_count(), MAX_ATTEMPTS as usize);
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let server = MockServer::start(vec![
        Reply::Json(503, "{}"),
        Reply::Json(200, r#"{"token":"second"}"#),
    ])
    .await;

    let token = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await
        .expect("second attempt should succeed");

    assert_eq!(token.value(), "second");
    assert_eq!(server.request_count(), 2);
}

#[tokio::test]
async fn test_malformed_success_body() {
    let server = MockServer::start(vec![Reply::Json(200, r#"{"id":7}"#)]).await;

    let result = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await;

    assert!(matches!(
        result,
        Err(RegistrationError::MalformedResponse(_))
    ));
    assert_eq!(server.request_count(), 1);
}

#[tokio::test]
async fn test_empty_token_is_malformed() {
    let server = MockServer::start(vec![Reply::Json(200, r#"{"token":""}"#)]).await;

    let result = registrar(&server.base_url, Duration::from_secs(5))
        .register(&identity())
        .await;

    assert!(matches!(
        result,
        Err(RegistrationError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_unreachable_server_is_exhausted() {
    // nothing listens on port 9
    let result = registrar("http://127.0.0.1:9/rest", Duration::from_secs(1))
        .register(&identity())
        .await;

    assert!(matches!(result, Err(RegistrationError::Exhausted { .. })));
}
