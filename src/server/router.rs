use axum::http::Method;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route(
            "/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route("/sessions/resume", post(handlers::resume_session))
        .route(
            "/sessions/:id",
            get(handlers::get_session).delete(handlers::destroy_session),
        )
        .route("/sessions/:id/resume", post(handlers::resume_session_by_id))
        .route("/sessions/:id/rename", put(handlers::rename_session))
        .route("/sessions/:id/navigate", post(handlers::navigate))
        .route("/sessions/:id/execute", post(handlers::execute_script))
        .route("/sessions/:id/screenshot", post(handlers::capture_screenshot))
        .route(
            "/sessions/:id/pages/:page_id/content",
            get(handlers::page_content),
        )
        .route(
            "/sessions/:id/pages/:page_id/accessibility",
            get(handlers::page_accessibility),
        )
        .route("/sessions/:id/pages/:page_id", delete(handlers::close_page))
        .route("/agents/:agent_id/sessions", get(handlers::agent_sessions))
        .layer(cors)
        .with_state(state)
}
