//! HTTP engine client tests against a mock engine.

use std::time::Duration;

use formy_engine::{
    AuthType, EngineClient, EngineClientConfig, EngineError, EngineRequest, HttpEngineClient,
};
use formy_models::ErrorKind;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpEngineClient {
    HttpEngineClient::new(EngineClientConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .expect("build client")
}

fn request(operation: &str) -> EngineRequest {
    EngineRequest::new(
        operation,
        json!({ "image": "/uploads/source.jpg" }),
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_successful_call_returns_outputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/operations/extract_pose"))
        .and(body_partial_json(json!({
            "operation": "extract_pose",
            "payload": { "image": "/uploads/source.jpg" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "outputs": { "pose": { "keypoints": [[0.1, 0.2]] } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .invoke(request("extract_pose"))
        .await
        .expect("call succeeds");

    assert!(response.require("pose").is_ok());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request("swap_head"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request("swap_head"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
}

#[tokio::test]
async fn test_request_timeout_status_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(408).set_body_string("request timeout"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request("swap_head"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Rejected);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_client_error_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("no face detected"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request("detect_face"))
        .await
        .unwrap_err();

    match &err {
        EngineError::Rejected { status, message } => {
            assert_eq!(*status, 422);
            assert_eq!(message, "no face detected");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_deadline_is_enforced_client_side() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "outputs": {} }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let err = client_for(&server)
        .invoke(EngineRequest::new(
            "transfer_pose",
            json!({}),
            Duration::from_millis(200),
        ))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_undecodable_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request("segment_person"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::InvalidResponse(_)));
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let client = HttpEngineClient::new(EngineClientConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        connect_timeout: Duration::from_secs(1),
        ..Default::default()
    })
    .unwrap();

    let err = client.invoke(request("extract_pose")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
}

#[tokio::test]
async fn test_api_key_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "outputs": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEngineClient::new(
        EngineClientConfig {
            base_url: server.uri(),
            ..Default::default()
        }
        .with_api_key("secret", AuthType::ApiKey),
    )
    .unwrap();

    client.invoke(request("detect_face")).await.expect("authorized call");
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    assert!(client_for(&server).health_check().await.unwrap());
}
