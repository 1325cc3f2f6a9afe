//! API error envelope.
//!
//! Every failure crossing the HTTP boundary carries a machine-readable code
//! and maps to not-found, conflict, quota, bad-request, unavailable, or an
//! internal error with the underlying kind attached.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use browser_pool::PoolError;
use cdp_client::{CdpError, DiscoveryError};
use serde_json::json;
use session_registry::RegistryError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message }
        }));
        (self.status, body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        let (status, code) = match err {
            // Session and page absence share one user-visible kind.
            RegistryError::NotFound(_) | RegistryError::PageNotFound(_) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            RegistryError::NameConflict { .. } => (StatusCode::CONFLICT, "NAME_CONFLICT"),
            RegistryError::AgentQuota(_) | RegistryError::GlobalQuota(_) => {
                (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED")
            }
            RegistryError::AgentRequired => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            RegistryError::Script(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SCRIPT_ERROR"),
            RegistryError::Cdp(cdp) => return Self::from(cdp),
            RegistryError::Discovery(discovery) => return Self::from(discovery),
            RegistryError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        Self::new(status, code, message)
    }
}

impl From<CdpError> for ApiError {
    fn from(err: CdpError) -> Self {
        let message = err.to_string();
        let code = match err {
            CdpError::Timeout(_) => "TIMEOUT",
            CdpError::Closed => "CLIENT_CLOSED",
            CdpError::Protocol { .. } => "PROTOCOL_ERROR",
            CdpError::Transport(_) | CdpError::Malformed(_) => "INTERNAL",
        };
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        let message = err.to_string();
        let code = match err {
            DiscoveryError::Unreachable(_) => "UNREACHABLE",
            DiscoveryError::BadStatus(_) => "BAD_STATUS",
            DiscoveryError::Malformed(_) => "MALFORMED",
            DiscoveryError::NoEndpoint => "NO_ENDPOINT",
        };
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let message = err.to_string();
        let (status, code) = match err {
            PoolError::NoHealthyWorker => (StatusCode::SERVICE_UNAVAILABLE, "NO_HEALTHY_WORKER"),
            PoolError::PortExhausted => (StatusCode::INTERNAL_SERVER_ERROR, "PORT_EXHAUSTED"),
            PoolError::Spawn(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WORKER_SPAWN_FAILED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        Self::new(status, code, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_errors_map_to_status_and_code() {
        let cases: Vec<(RegistryError, StatusCode, &str)> = vec![
            (
                RegistryError::NotFound("sess_x".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                RegistryError::PageNotFound("target-x".into()),
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
            ),
            (
                RegistryError::NameConflict {
                    agent_id: "a".into(),
                    name: "task".into(),
                },
                StatusCode::CONFLICT,
                "NAME_CONFLICT",
            ),
            (
                RegistryError::AgentQuota(10),
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
            ),
            (
                RegistryError::GlobalQuota(100),
                StatusCode::TOO_MANY_REQUESTS,
                "QUOTA_EXCEEDED",
            ),
            (
                RegistryError::Cdp(CdpError::Closed),
                StatusCode::INTERNAL_SERVER_ERROR,
                "CLIENT_CLOSED",
            ),
            (
                RegistryError::Cdp(CdpError::Protocol {
                    code: -32000,
                    message: "nope".into(),
                }),
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROTOCOL_ERROR",
            ),
        ];

        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn pool_errors_map_to_status_and_code() {
        let api: ApiError = PoolError::NoHealthyWorker.into();
        assert_eq!(api.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api.code(), "NO_HEALTHY_WORKER");

        let api: ApiError = PoolError::PortExhausted.into();
        assert_eq!(api.code(), "PORT_EXHAUSTED");
    }
}
