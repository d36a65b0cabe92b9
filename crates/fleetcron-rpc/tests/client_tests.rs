//! RemoteChannel against a mock coordinator.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetcron_models::{MachineId, RpcCommand, RpcEnvelope, RpcResponse};
use fleetcron_rpc::{RemoteChannel, RpcError, SessionSigner, TaskChannel};

const SECRET: &str = "fleet-secret";

fn channel(server: &MockServer) -> RemoteChannel {
    RemoteChannel::new(
        &server.uri(),
        MachineId::from_address("http://w1:8000"),
        SessionSigner::new(SECRET, 300),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_get_tasks_sends_signed_envelope() {
    let server = MockServer::start().await;
    let body = RpcResponse::with_result(&json!({"batch": "b1"})).unwrap();
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&server)
        .await;

    let result = channel(&server).get_tasks("mail").await.unwrap();
    assert_eq!(result, Some(json!({"batch": "b1"})));

    let requests = server.received_requests().await.unwrap();
    let envelope: RpcEnvelope = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(envelope.job, "mail");
    assert_eq!(envelope.command, RpcCommand::GetTasks);
    assert_eq!(envelope.machine_id, MachineId::from_address("http://w1:8000"));
    assert!(envelope.args.is_none());
    let now = chrono::Utc::now().timestamp();
    tokio_test::assert_ok!(SessionSigner::new(SECRET, 300).verify(&envelope, now));
}

#[tokio::test]
async fn test_idle_coordinator_returns_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(RpcResponse::empty()))
        .mount(&server)
        .await;

    assert_eq!(channel(&server).get_tasks("feeds").await.unwrap(), None);
}

#[tokio::test]
async fn test_put_tasks_carries_args() {
    let server = MockServer::start().await;
    let ack = RpcResponse::with_result(&json!({"accepted": true})).unwrap();
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&ack))
        .mount(&server)
        .await;

    let reply = channel(&server)
        .put_tasks("media", json!({"file": "a.part000.mp4"}))
        .await
        .unwrap();
    assert_eq!(reply, Some(json!({"accepted": true})));

    let requests = server.received_requests().await.unwrap();
    let envelope: RpcEnvelope = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(envelope.command, RpcCommand::PutTasks);
    let args: serde_json::Value = envelope.decode_args().unwrap().unwrap();
    assert_eq!(args["file"], "a.part000.mp4");
}

#[tokio::test]
async fn test_rejection_surfaces_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad digest"))
        .mount(&server)
        .await;

    let err = channel(&server).get_tasks("mail").await.unwrap_err();
    match err {
        RpcError::Status { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad digest");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rpc"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = channel(&server).get_tasks("mail").await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unreachable_coordinator_is_transient() {
    let channel = RemoteChannel::new(
        "http://127.0.0.1:9",
        MachineId::from("w"),
        SessionSigner::new(SECRET, 300),
        Duration::from_secs(1),
    )
    .unwrap();
    let err = channel.get_tasks("mail").await.unwrap_err();
    assert!(matches!(err, RpcError::Transport(_)));
}

#[test]
fn test_invalid_url_rejected() {
    let err = RemoteChannel::new(
        "not a url",
        MachineId::from("w"),
        SessionSigner::new(SECRET, 300),
        Duration::from_secs(1),
    )
    .unwrap_err();
    assert!(matches!(err, RpcError::InvalidUrl(_)));
}
