//! Debug-endpoint discovery.
//!
//! A worker advertises its browser-level websocket URL on
//! `http://<host>:<port>/json/version`. Workers take a few seconds to open
//! that port after spawn, so first-touch callers use the retrying variant.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::DiscoveryError;

const MAX_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: Option<String>,
}

/// Resolves the browser-level websocket URL for a worker's debug endpoint.
pub async fn browser_ws_url(host: &str, port: u16) -> Result<String, DiscoveryError> {
    let url = format!("http://{host}:{port}/json/version");
    let response = reqwest::get(&url)
        .await
        .map_err(|err| DiscoveryError::Unreachable(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::BadStatus(status.as_u16()));
    }

    let version: VersionInfo = response
        .json()
        .await
        .map_err(|err| DiscoveryError::Malformed(err.to_string()))?;

    match version.web_socket_debugger_url {
        Some(ws_url) if !ws_url.is_empty() => Ok(ws_url),
        _ => Err(DiscoveryError::NoEndpoint),
    }
}

/// Discovery with bounded retry and exponential backoff.
pub async fn browser_ws_url_with_retry(
    host: &str,
    port: u16,
    attempts: u32,
    initial_backoff: Duration,
) -> Result<String, DiscoveryError> {
    let mut backoff = initial_backoff;
    let mut last = DiscoveryError::Unreachable("no discovery attempt made".to_string());

    for attempt in 1..=attempts {
        match browser_ws_url(host, port).await {
            Ok(ws_url) => return Ok(ws_url),
            Err(err) => {
                debug!(
                    target: "cdp-client",
                    host, port, attempt, %err,
                    "debug endpoint not ready"
                );
                last = err;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWorker;

    #[tokio::test]
    async fn resolves_advertised_websocket_url() {
        let fake = FakeWorker::start().await;
        let ws_url = browser_ws_url("127.0.0.1", fake.port()).await.unwrap();
        assert_eq!(ws_url, fake.ws_url());
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Bind-then-drop to find a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = browser_ws_url("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Unreachable(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_surfaced() {
        let fake = FakeWorker::start().await;
        fake.set_http_status(503);
        let err = browser_ws_url("127.0.0.1", fake.port()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::BadStatus(503)));
    }

    #[tokio::test]
    async fn missing_field_is_no_endpoint() {
        let fake = FakeWorker::start().await;
        fake.set_omit_ws_url(true);
        let err = browser_ws_url("127.0.0.1", fake.port()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NoEndpoint));
    }

    #[tokio::test]
    async fn unparseable_body_is_malformed() {
        let fake = FakeWorker::start().await;
        fake.set_malformed_body(true);
        let err = browser_ws_url("127.0.0.1", fake.port()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::Malformed(_)));
    }

    #[tokio::test]
    async fn retry_succeeds_once_the_endpoint_comes_up() {
        let fake = std::sync::Arc::new(FakeWorker::start().await);
        fake.set_http_status(503);

        let recover = {
            let fake = std::sync::Arc::clone(&fake);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                fake.set_http_status(200);
            })
        };

        let ws_url =
            browser_ws_url_with_retry("127.0.0.1", fake.port(), 10, Duration::from_millis(25))
                .await
                .unwrap();
        assert_eq!(ws_url, fake.ws_url());
        recover.await.unwrap();
    }
}
