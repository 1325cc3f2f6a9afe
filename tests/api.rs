//! HTTP-surface round trips against a fake worker, with caller-addressed
//! ports (no local pool).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cdp_client::testing::FakeWorker;
use serde_json::{json, Value};
use session_registry::{RegistryConfig, SessionRegistry};
use session_store::{MemoryStore, SessionStore};
use tower::ServiceExt;

use browserhive::server::{build_router, AppState};

fn test_app() -> (Router, Arc<SessionRegistry>) {
    let store = Arc::new(MemoryStore::new(Duration::from_secs(60)));
    let registry = SessionRegistry::new(
        Some(store as Arc<dyn SessionStore>),
        RegistryConfig {
            discovery_attempts: 3,
            discovery_backoff: Duration::from_millis(10),
            ..RegistryConfig::default()
        },
    );
    let app = build_router(AppState::new(Arc::clone(&registry), None));
    (app, registry)
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_session(app: &Router, fake: &FakeWorker, agent_id: &str, name: Option<&str>) -> Value {
    let mut body = json!({ "agent_id": agent_id, "browser_port": fake.port() });
    if let Some(name) = name {
        body["session_name"] = json!(name);
    }
    let (status, value) = request(app, "POST", "/sessions", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {value}");
    value
}

#[tokio::test]
async fn create_requires_an_agent_id() {
    let (app, _registry) = test_app();
    let (status, body) = request(&app, "POST", "/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn create_without_a_pool_or_port_is_unavailable() {
    let (app, _registry) = test_app();
    let (status, body) =
        request(&app, "POST", "/sessions", Some(json!({ "agent_id": "a" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NO_HEALTHY_WORKER");
}

#[tokio::test]
async fn session_lifecycle_round_trip() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    let created = create_session(&app, &fake, "agent-a", Some("task")).await;
    let session_id = created["session_id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("sess_"));
    assert_eq!(created["session_name"], "task");
    assert_eq!(created["agent_id"], "agent-a");
    assert!(created["context_id"].as_str().unwrap().starts_with("ctx-"));

    // Navigate.
    let (status, nav) = request(
        &app,
        "POST",
        &format!("/sessions/{session_id}/navigate"),
        Some(json!({ "url": "https://example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(nav["url"], "https://example.com");
    let page_id = nav["page_id"].as_str().unwrap().to_string();

    // Evaluate.
    let (status, eval) = request(
        &app,
        "POST",
        &format!("/sessions/{session_id}/execute"),
        Some(json!({ "page_id": page_id, "script": "document.title" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(eval["result"], "Example Domain");

    // Screenshot decodes to PNG bytes.
    let (status, shot) = request(
        &app,
        "POST",
        &format!("/sessions/{session_id}/screenshot"),
        Some(json!({ "page_id": page_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shot["format"], "png");
    let bytes = STANDARD.decode(shot["screenshot"].as_str().unwrap()).unwrap();
    assert_eq!(shot["size"], bytes.len());
    assert_eq!(&bytes[..4], &[0x89u8, 0x50, 0x4E, 0x47]);

    // Content.
    let (status, content) = request(
        &app,
        "GET",
        &format!("/sessions/{session_id}/pages/{page_id}/content"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let html = content["content"].as_str().unwrap();
    assert!(html.starts_with("<html>"));
    assert_eq!(content["length"], html.len());

    // Accessibility tree.
    let (status, ax) = request(
        &app,
        "GET",
        &format!("/sessions/{session_id}/pages/{page_id}/accessibility"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ax["tree"]["nodes"][0]["role"], "RootWebArea");

    // Full record.
    let (status, record) = request(&app, "GET", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["page_count"], 1);
    assert_eq!(record["page_ids"][0], page_id);
    assert_eq!(record["status"], "active");

    // Close the page.
    let (status, _) = request(
        &app,
        "DELETE",
        &format!("/sessions/{session_id}/pages/{page_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Destroy.
    let (status, _) = request(&app, "DELETE", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, missing) = request(&app, "GET", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"]["code"], "NOT_FOUND");

    registry.close().await;
}

#[tokio::test]
async fn duplicate_names_conflict_with_409() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    create_session(&app, &fake, "agent-a", Some("task")).await;
    let (status, body) = request(
        &app,
        "POST",
        "/sessions",
        Some(json!({
            "agent_id": "agent-a",
            "session_name": "task",
            "browser_port": fake.port(),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NAME_CONFLICT");

    // Same name, different agent: fine.
    create_session(&app, &fake, "agent-b", Some("task")).await;

    registry.close().await;
}

#[tokio::test]
async fn resume_by_name_and_by_id() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    let created = create_session(&app, &fake, "agent-a", Some("task")).await;
    let session_id = created["session_id"].as_str().unwrap();

    let (status, resumed) = request(
        &app,
        "POST",
        "/sessions/resume",
        Some(json!({ "agent_id": "agent-a", "session_name": "task" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["session_id"], *session_id);
    assert_eq!(resumed["resumed"], true);

    let (status, by_id) = request(
        &app,
        "POST",
        &format!("/sessions/{session_id}/resume"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["session_name"], "task");

    let (status, body) = request(
        &app,
        "POST",
        "/sessions/resume",
        Some(json!({ "agent_id": "agent-a", "session_name": "unknown" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    registry.close().await;
}

#[tokio::test]
async fn rename_moves_the_name() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    let created = create_session(&app, &fake, "agent-a", Some("first")).await;
    let session_id = created["session_id"].as_str().unwrap();
    create_session(&app, &fake, "agent-a", Some("second")).await;

    let (status, body) = request(
        &app,
        "PUT",
        &format!("/sessions/{session_id}/rename"),
        Some(json!({ "new_name": "second" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "NAME_CONFLICT");

    let (status, renamed) = request(
        &app,
        "PUT",
        &format!("/sessions/{session_id}/rename"),
        Some(json!({ "new_name": "third" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(renamed["session_name"], "third");

    registry.close().await;
}

#[tokio::test]
async fn listings_and_health() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    create_session(&app, &fake, "agent-a", Some("one")).await;
    create_session(&app, &fake, "agent-a", Some("two")).await;
    create_session(&app, &fake, "agent-b", Some("other")).await;

    let (status, all) = request(&app, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["count"], 3);

    let (status, per_agent) = request(&app, "GET", "/agents/agent-a/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(per_agent["agent_id"], "agent-a");
    assert_eq!(per_agent["count"], 2);

    let (status, health) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let (status, metrics) = request(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(metrics["total_processes"], 0);

    registry.close().await;
}

#[tokio::test]
async fn operations_on_unknown_sessions_and_pages_are_404() {
    let fake = FakeWorker::start().await;
    let (app, registry) = test_app();

    let (status, body) = request(
        &app,
        "POST",
        "/sessions/sess_missing/navigate",
        Some(json!({ "url": "https://example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let created = create_session(&app, &fake, "agent-a", None).await;
    let session_id = created["session_id"].as_str().unwrap();
    let (status, body) = request(
        &app,
        "POST",
        &format!("/sessions/{session_id}/execute"),
        Some(json!({ "page_id": "target-unknown", "script": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    registry.close().await;
}
