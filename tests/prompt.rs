mod common;

use common::{MockServer, Reply};
use device_agent::{
    http_client::build_client,
    prompt::{IdentityPrompt, MAX_PROMPTS, register_interactively},
    services::registrar::{DeviceRegistrar, MAX_ATTEMPTS},
};
use std::time::Duration;

const ANSWERS: &str = "me@example.com\n pass word \nkitchen\n";

fn registrar(base_url: &str) -> DeviceRegistrar {
    let client = build_client(Duration::from_secs(5)).expect("failed to create client");
    DeviceRegistrar::new(client, base_url, Duration::ZERO)
}

/// Console input answering the identity questions `rounds` times.
fn input(rounds: u32) -> Vec<u8> {
    ANSWERS.repeat(rounds as usize).into_bytes()
}

fn prompts_shown(output: &str) -> usize {
    output.matches("User Email :: ").count()
}

#[tokio::test]
async fn test_rejection_asks_again_and_registers() {
    let server = MockServer::start(vec![
        Reply::Json(400, r#"{"message":"email taken"}"#),
        Reply::Json(200, r#"{"token":"abc123"}"#),
    ])
    .await;
    let input = input(MAX_PROMPTS);
    let mut output = Vec::new();
    let mut prompt = IdentityPrompt::new(input.as_slice(), &mut output);

    let token = register_interactively(&registrar(&server.base_url), &mut prompt)
        .await
        .expect("second identity should register");
    drop(prompt);

    assert_eq!(token.value(), "abc123");
    assert_eq!(server.request_count(), 2);

    let shown = String::from_utf8(output).expect("should be utf8");
    assert_eq!(prompts_shown(&shown), 2);
    assert_eq!(shown.matches("ERROR :: email taken").count(), 1);

    let body: serde_json::Value =
        serde_json::from_str(&server.requests()[1].body).expect("body should be json");
    assert_eq!(body["password"], " pass word ");
}

#[tokio::test]
async fn test_gives_up_after_repeated_rejections() {
    let server = MockServer::start(vec![Reply::Json(400, r#"{"message":"email taken"}"#)]).await;
    let input = input(MAX_PROMPTS + 1);
    let mut output = Vec::new();
    let mut prompt = IdentityPrompt::new(input.as_slice(), &mut output);

    let result = register_interactively(&registrar(&server.base_url), &mut prompt).await;
    drop(prompt);

    assert!(result.is_err());
    assert_eq!(server.request_count(), MAX_PROMPTS as usize);

    let shown = String::from_utf8(output).expect("should be utf8");
    assert_eq!(prompts_shown(&shown), MAX_PROMPTS as usize);
    assert_eq!(
        shown.matches("ERROR :: email taken").count(),
        MAX_PROMPTS as usize
    );
    assert!(shown.contains("maximum number of registration attempts"));
}

#[tokio::test]
async fn test_server_error_stops_without_asking_again() {
    let server = MockServer::start(vec![Reply::Json(500, "{}")]).await;
    let input = input(MAX_PROMPTS);
    let mut output = Vec::new();
    let mut prompt = IdentityPrompt::new(input.as_slice(), &mut output);

    let result = register_interactively(&registrar(&server.base_url), &mut prompt).await;
    drop(prompt);

    assert!(result.is_err());
    // the registrar retries on its own, all within the first prompt
    assert_eq!(server.request_count(), MAX_ATTEMPTS as usize);

    let shown = String::from_utf8(output).expect("should be utf8");
    assert_eq!(prompts_shown(&shown), 1);
    assert!(!shown.contains("ERROR :: "));
}
