mod common;

use common::{MockServer, Reply};
use device_agent::{
    http_client::build_client,
    sensor::FixedSensor,
    services::{telemetry::TelemetryReporter, token_store::DeviceToken},
};
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;

const INTERVAL: Duration = Duration::from_secs(1);

fn reporter(base_url: &str) -> TelemetryReporter {
    let client = build_client(Duration::from_secs(2)).expect("failed to create client");
    TelemetryReporter::new(client, base_url, INTERVAL, Arc::new(FixedSensor::new(23.5)))
}

#[tokio::test]
async fn test_reports_with_bearer_token() {
    let server = MockServer::start(vec![Reply::Json(200, "{}")]).await;
    let reporter = reporter(&server.base_url);

    assert!(reporter.start(DeviceToken::new("abc123")).await);
    sleep(INTERVAL + Duration::from_millis(500)).await;
    reporter.stop().await;

    let requests = server.requests();
    assert!(requests.len() >= 2, "expected two samples, got {}", requests.len());

    for request in &requests {
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/rest/device/temp");
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer abc123")
        );

        let body: serde_json::Value =
            serde_json::from_str(&request.body).expect("body should be json");
        assert_eq!(body["temp"], serde_json::json!(23.5));
        assert!(body["date"].as_i64().is_some_and(|date| date > 0));
    }
}

#[tokio::test]
async fn test_second_start_does_not_add_a_worker() {
    let server = MockServer::start(vec![Reply::Json(200, "{}")]).await;
    let reporter = reporter(&server.base_url);

    assert!(reporter.start(DeviceToken::new("abc123")).await);
    assert!(!reporter.start(DeviceToken::new("abc123")).await);
    sleep(Duration::from_millis(300)).await;

    // one worker posts once per interval
    assert_eq!(server.request_count(), 1);
    reporter.stop().await;
}

#[tokio::test]
async fn test_no_reports_after_stop() {
    let server = MockServer::start(vec![Reply::Json(200, "{}")]).await;
    let reporter = reporter(&server.base_url);

    reporter.start(DeviceToken::new("abc123")).await;
    sleep(Duration::from_millis(300)).await;
    assert!(reporter.stop().await);
    assert!(!reporter.is_running().await);

    let after_stop = server.request_count();
    sleep(INTERVAL * 2).await;

    assert_eq!(server.request_count(), after_stop);
}

#[tokio::test]
async fn test_failed_posts_keep_reporting() {
    let server = MockServer::start(vec![Reply::Json(500, "{}")]).await;
    let reporter = reporter(&server.base_url);

    reporter.start(DeviceToken::new("abc123")).await;
    sleep(INTERVAL + Duration::from_millis(500)).await;

    assert!(reporter.is_running().await);
    assert!(server.request_count() >= 2);
    reporter.stop().await;
}
