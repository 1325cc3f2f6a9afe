//! HTTP surface: routes, handlers, shared state.

pub(crate) mod handlers;
pub mod router;
pub mod state;

use std::future::Future;

use tracing::info;

pub use router::build_router;
pub use state::AppState;

/// Binds the listener and serves until the shutdown future resolves, then
/// drains in-flight requests.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(target: "server", port, "http server listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!(target: "server", "http server stopped");
    Ok(())
}
