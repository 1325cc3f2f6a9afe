//! Inbound operations and their request/response shapes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use session_registry::{AxTree, SessionSnapshot, SessionStatus};

use crate::errors::ApiError;

use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default)]
    pub browser_port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub session_name: String,
    pub agent_id: String,
    pub context_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ResumeSessionRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub session_name: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeSessionResponse {
    pub session_id: String,
    pub session_name: String,
    pub resumed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RenameSessionRequest {
    #[serde(default)]
    pub new_name: String,
}

#[derive(Debug, Serialize)]
pub struct RenameSessionResponse {
    pub session_id: String,
    pub session_name: String,
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct NavigateResponse {
    pub session_id: String,
    pub page_id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub script: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub session_id: String,
    pub page_id: String,
    pub result: Value,
}

#[derive(Debug, Deserialize)]
pub struct ScreenshotRequest {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScreenshotResponse {
    pub session_id: String,
    pub page_id: String,
    /// Base64-encoded image payload.
    pub screenshot: String,
    pub format: String,
    /// Size in bytes before encoding.
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct ContentResponse {
    pub session_id: String,
    pub page_id: String,
    pub content: String,
    pub length: usize,
}

#[derive(Debug, Serialize)]
pub struct AccessibilityResponse {
    pub session_id: String,
    pub page_id: String,
    pub tree: AxTree,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionSnapshot>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AgentSessionsResponse {
    pub agent_id: String,
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub session_name: String,
    pub status: SessionStatus,
    pub page_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl From<SessionSnapshot> for SessionSummary {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            session_name: snapshot.session_name,
            status: snapshot.status,
            page_count: snapshot.page_count,
            created_at: snapshot.created_at,
            last_activity: snapshot.last_activity,
        }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<Value> {
    match &state.balancer {
        Some(balancer) => Json(json!(balancer.metrics())),
        None => Json(json!({
            "total_processes": 0,
            "total_sessions": 0,
            "processes": [],
        })),
    }
}

pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }

    // Caller-specified port wins; otherwise the balancer picks the worker.
    let requested = req.browser_port.filter(|port| *port != 0);
    let (port, worker) = match requested {
        Some(port) => (
            port,
            state.balancer.as_ref().and_then(|b| b.find_by_port(port)),
        ),
        None => {
            let balancer = state
                .balancer
                .as_ref()
                .ok_or(browser_pool::PoolError::NoHealthyWorker)?;
            let process = balancer.select()?;
            (process.port(), Some(process))
        }
    };

    let session = state
        .registry
        .create_session(&req.agent_id, req.session_name.as_deref(), port)
        .await?;
    if let Some(worker) = worker {
        worker.increment_sessions();
    }

    let response = CreateSessionResponse {
        session_id: session.id.clone(),
        session_name: session.name(),
        agent_id: session.agent_id.clone(),
        context_id: session.context_id.clone(),
        created_at: session.created_at,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let session = state.registry.get_session(&session_id).await?;
    Ok(Json(session.snapshot()))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<ListSessionsResponse> {
    let sessions = state.registry.list_sessions().await;
    let count = sessions.len();
    Json(ListSessionsResponse { sessions, count })
}

pub async fn destroy_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get_session(&session_id).await?;
    state.registry.destroy_session(&session_id).await?;

    if let Some(balancer) = &state.balancer {
        if let Some(worker) = balancer.find_by_port(session.process_port) {
            worker.decrement_sessions();
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resume_session(
    State(state): State<AppState>,
    Json(req): Json<ResumeSessionRequest>,
) -> Result<Json<ResumeSessionResponse>, ApiError> {
    if req.agent_id.is_empty() || req.session_name.is_empty() {
        return Err(ApiError::bad_request(
            "agent_id and session_name are required",
        ));
    }
    let session = state
        .registry
        .resume_by_name(&req.agent_id, &req.session_name)
        .await?;
    Ok(Json(ResumeSessionResponse {
        session_id: session.id.clone(),
        session_name: session.name(),
        resumed: true,
        created_at: session.created_at,
    }))
}

pub async fn resume_session_by_id(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ResumeSessionResponse>, ApiError> {
    let session = state.registry.resume_by_id(&session_id).await?;
    Ok(Json(ResumeSessionResponse {
        session_id: session.id.clone(),
        session_name: session.name(),
        resumed: true,
        created_at: session.created_at,
    }))
}

pub async fn rename_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<RenameSessionRequest>,
) -> Result<Json<RenameSessionResponse>, ApiError> {
    if req.new_name.is_empty() {
        return Err(ApiError::bad_request("new_name is required"));
    }
    let session = state
        .registry
        .rename_session(&session_id, &req.new_name)
        .await?;
    Ok(Json(RenameSessionResponse {
        session_id: session.id.clone(),
        session_name: session.name(),
        agent_id: session.agent_id.clone(),
    }))
}

pub async fn navigate(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<NavigateResponse>, ApiError> {
    if req.url.is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }
    let page_id = state.registry.navigate(&session_id, &req.url).await?;
    Ok(Json(NavigateResponse {
        session_id,
        page_id,
        url: req.url,
    }))
}

pub async fn execute_script(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    if req.page_id.is_empty() {
        return Err(ApiError::bad_request("page_id is required"));
    }
    if req.script.is_empty() {
        return Err(ApiError::bad_request("script is required"));
    }
    let result = state
        .registry
        .evaluate(&session_id, &req.page_id, &req.script)
        .await?;
    Ok(Json(ExecuteResponse {
        session_id,
        page_id: req.page_id,
        result,
    }))
}

pub async fn capture_screenshot(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ScreenshotRequest>,
) -> Result<Json<ScreenshotResponse>, ApiError> {
    if req.page_id.is_empty() {
        return Err(ApiError::bad_request("page_id is required"));
    }
    let format = req.format.as_deref().unwrap_or("png");
    let bytes = state
        .registry
        .screenshot(&session_id, &req.page_id, Some(format))
        .await?;
    Ok(Json(ScreenshotResponse {
        session_id,
        page_id: req.page_id,
        size: bytes.len(),
        screenshot: STANDARD.encode(&bytes),
        format: format.to_string(),
    }))
}

pub async fn page_content(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(String, String)>,
) -> Result<Json<ContentResponse>, ApiError> {
    let content = state.registry.content(&session_id, &page_id).await?;
    Ok(Json(ContentResponse {
        session_id,
        page_id,
        length: content.len(),
        content,
    }))
}

pub async fn page_accessibility(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(String, String)>,
) -> Result<Json<AccessibilityResponse>, ApiError> {
    let tree = state
        .registry
        .accessibility_tree(&session_id, &page_id)
        .await?;
    Ok(Json(AccessibilityResponse {
        session_id,
        page_id,
        tree,
    }))
}

pub async fn close_page(
    State(state): State<AppState>,
    Path((session_id, page_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    state.registry.close_page(&session_id, &page_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn agent_sessions(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentSessionsResponse>, ApiError> {
    let sessions: Vec<SessionSummary> = state
        .registry
        .list_agent_sessions(&agent_id)
        .await?
        .into_iter()
        .map(SessionSummary::from)
        .collect();
    let count = sessions.len();
    Ok(Json(AgentSessionsResponse {
        agent_id,
        sessions,
        count,
    }))
}
