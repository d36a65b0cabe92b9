//! Coordinator endpoint integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use fleetcron_jobs::{Job, JobError, JobRegistry, JobResult};
use fleetcron_models::{Ack, MachineId, NodeRole, Roster, RpcCommand, RpcEnvelope, RpcResponse};
use fleetcron_rpc::{RemoteChannel, SessionSigner, TaskChannel};
use fleetcron_server::{create_router, AppState, ServerConfig};

const SECRET: &str = "fleet-secret";

/// Hands every worker its own name and accepts any non-empty answer.
struct EchoJob;

#[async_trait]
impl Job for EchoJob {
    type Task = String;
    type Outcome = String;

    fn name(&self) -> &str {
        "echo"
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        Ok(())
    }

    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<String>> {
        if worker.as_str() == "broken" {
            return Err(JobError::job_failed("store unavailable"));
        }
        Ok(Some(format!("hello {}", worker)))
    }

    async fn do_tasks(&self, task: String) -> JobResult<Option<String>> {
        Ok(Some(task))
    }

    async fn put_tasks(&self, _worker: &MachineId, outcome: String) -> JobResult<Ack> {
        Ok(if outcome.is_empty() {
            Ack::rejected("empty")
        } else {
            Ack::accepted()
        })
    }
}

fn app_with(config: ServerConfig) -> Router {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(EchoJob));
    let state = AppState::new(
        config,
        MachineId::from("coord"),
        NodeRole::Coordinator,
        Roster::new(vec![MachineId::from("w0"), MachineId::from("w1")]),
        Arc::new(registry),
        SessionSigner::new(SECRET, 300),
    );
    create_router(state, None)
}

fn app() -> Router {
    app_with(ServerConfig::default())
}

fn envelope(job: &str, worker: &str, command: RpcCommand, args: Option<&Value>) -> RpcEnvelope {
    let mut env = RpcEnvelope::new(job, MachineId::from(worker), command, chrono::Utc::now().timestamp());
    if let Some(args) = args {
        env = env.with_args(args).unwrap();
    }
    SessionSigner::new(SECRET, 300).sign(&mut env).unwrap();
    env
}

fn post(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/rpc")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn call(app: Router, env: &RpcEnvelope) -> (StatusCode, Vec<u8>) {
    let response = app.oneshot(post(serde_json::to_vec(env).unwrap())).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_roster_endpoint_keeps_order() {
    let response = app()
        .oneshot(Request::builder().uri("/roster").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let roster: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(roster["workers"][0]["machine_id"], "w0");
    assert_eq!(roster["workers"][1]["position"], 1);
    assert_eq!(roster["jobs"][0], "echo");
}

#[tokio::test]
async fn test_get_tasks_round_trip() {
    let (status, body) = call(app(), &envelope("echo", "w1", RpcCommand::GetTasks, None)).await;
    assert_eq!(status, StatusCode::OK);
    let reply: RpcResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.decode::<String>().unwrap().as_deref(), Some("hello w1"));
}

#[tokio::test]
async fn test_put_tasks_returns_ack() {
    let args = Value::String(String::new());
    let (status, body) = call(app(), &envelope("echo", "w1", RpcCommand::PutTasks, Some(&args))).await;
    assert_eq!(status, StatusCode::OK);
    let reply: RpcResponse = serde_json::from_slice(&body).unwrap();
    let ack: Ack = reply.decode().unwrap().unwrap();
    assert!(!ack.accepted);
}

#[tokio::test]
async fn test_tampered_digest_is_unauthorized() {
    let mut env = envelope("echo", "w1", RpcCommand::GetTasks, None);
    env.job = "other".to_string();
    let (status, _) = call(app(), &env).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_request_is_unauthorized() {
    let mut env = RpcEnvelope::new(
        "echo",
        MachineId::from("w1"),
        RpcCommand::GetTasks,
        chrono::Utc::now().timestamp() - 3600,
    );
    SessionSigner::new(SECRET, 300).sign(&mut env).unwrap();
    let (status, _) = call(app(), &env).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let (status, _) = call(app(), &envelope("nope", "w1", RpcCommand::GetTasks, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_without_args_is_bad_request() {
    let (status, _) = call(app(), &envelope("echo", "w1", RpcCommand::PutTasks, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_garbage_body_is_bad_request() {
    let response = app().oneshot(post("not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = app_with(ServerConfig {
        max_body_size: 1024,
        ..Default::default()
    });
    let response = app.oneshot(post(vec![b' '; 4096])).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_job_failure_is_internal_error() {
    let (status, _) = call(app(), &envelope("echo", "broken", RpcCommand::GetTasks, None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_remote_channel_against_live_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app()).await });

    let channel = RemoteChannel::new(
        &format!("http://{}", addr),
        MachineId::from("w0"),
        SessionSigner::new(SECRET, 300),
        Duration::from_secs(5),
    )
    .unwrap();

    let task = tokio_test::assert_ok!(channel.get_tasks("echo").await);
    assert_eq!(task, Some(Value::String("hello w0".to_string())));

    let reply = channel.put_tasks("echo", Value::String("done".to_string())).await.unwrap().unwrap();
    let ack: Ack = serde_json::from_value(reply).unwrap();
    assert!(ack.accepted);

    let wrong = RemoteChannel::new(
        &format!("http://{}", addr),
        MachineId::from("w0"),
        SessionSigner::new("other-secret", 300),
        Duration::from_secs(5),
    )
    .unwrap();
    let err = wrong.get_tasks("echo").await.unwrap_err();
    assert!(matches!(err, fleetcron_rpc::RpcError::Status { status: 401, .. }));
}
