//! ComfyUI client tests against a mock server.

use std::time::Duration;

use formy_engine::{ComfyUiConfig, ComfyUiEngineClient, EngineClient, EngineError, EngineRequest};
use formy_models::ErrorKind;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pose_workflow() -> Value {
    json!({
        "1": { "class_type": "LoadImage", "inputs": {}, "_meta": { "title": "input:source_image:1" } },
        "2": { "class_type": "LoadImage", "inputs": {}, "_meta": { "title": "input:pose:2" } },
        "9": { "class_type": "SaveImage", "inputs": {}, "_meta": { "title": "output:image:1" } },
        "10": { "class_type": "ImageComparer", "inputs": {}, "_meta": { "title": "output:image_comparer:2" } }
    })
}

fn client_for(server: &MockServer) -> ComfyUiEngineClient {
    ComfyUiEngineClient::new(ComfyUiConfig {
        base_url: server.uri(),
        poll_interval: Duration::from_millis(20),
        ..Default::default()
    })
    .expect("build client")
    .with_workflow("transfer_pose", pose_workflow())
}

fn request(deadline: Duration) -> EngineRequest {
    EngineRequest::new(
        "transfer_pose",
        json!({ "source_image": "src.png", "pose": "pose.png" }),
        deadline,
    )
}

async fn mount_submit(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "prompt_id": "p-1",
            "number": 1,
            "node_errors": {}
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_submit_then_poll_until_outputs() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": {
                "1": { "inputs": { "image": "src.png" } },
                "2": { "inputs": { "image": "pose.png" } }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-1" })))
        .expect(1)
        .mount(&server)
        .await;
    // Still running on the first poll.
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-1": {
                "status": { "status_str": "success", "completed": true, "messages": [] },
                "outputs": {
                    "9": { "images": [{ "filename": "out.png", "subfolder": "", "type": "output" }] },
                    "10": { "images": [{ "filename": "cmp.png", "subfolder": "cmp", "type": "temp" }] }
                }
            }
        })))
        .mount(&server)
        .await;

    let response = client_for(&server)
        .invoke(request(Duration::from_secs(5)))
        .await
        .expect("workflow succeeds");

    assert_eq!(
        response.require_str("output_image").unwrap(),
        format!("{}/view?filename=out.png&type=output", server.uri())
    );
    assert_eq!(
        response.optional_str("comparison_image"),
        Some(format!("{}/view?filename=cmp.png&type=temp&subfolder=cmp", server.uri()).as_str())
    );
    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/history/p-1")
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test]
async fn test_failed_run_is_rejected() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "p-1": {
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", { "exception_message": "CUDA out of memory" }]]
                },
                "outputs": {}
            }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request(Duration::from_secs(5)))
        .await
        .unwrap_err();

    match &err {
        EngineError::WorkflowFailed(message) => assert_eq!(message, "CUDA out of memory"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn test_deadline_covers_the_polling_loop() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let err = client_for(&server)
        .invoke(request(Duration::from_millis(300)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_history_server_error_is_transient() {
    let server = MockServer::start().await;
    mount_submit(&server).await;
    Mock::given(method("GET"))
        .and(path("/history/p-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("restarting"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_rejected_submission() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "type": "prompt_outputs_failed_validation" },
            "node_errors": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(request(Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Rejected { status: 400, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_unknown_operation_makes_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .invoke(EngineRequest::new("swap_head", json!({}), Duration::from_secs(5)))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(err.kind(), ErrorKind::Rejected);
}

#[tokio::test]
async fn test_health_check_uses_system_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "system": {} })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client_for(&server).health_check().await.unwrap());
}
