use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by a [`crate::CdpClient`] call.
#[derive(Debug, Clone, Error)]
pub enum CdpError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("client closed")]
    Closed,
    #[error("cdp error {code}: {message}")]
    Protocol { code: i64, message: String },
    #[error("websocket transport failure: {0}")]
    Transport(String),
    #[error("malformed protocol payload: {0}")]
    Malformed(String),
}

/// Failures while resolving a worker's debug endpoint to its websocket URL.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("debug endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("debug endpoint returned status {0}")]
    BadStatus(u16),
    #[error("debug endpoint payload unparseable: {0}")]
    Malformed(String),
    #[error("debug endpoint advertises no browser websocket url")]
    NoEndpoint,
}
