use std::sync::Arc;

use browser_pool::LoadBalancer;
use session_registry::SessionRegistry;

/// Shared state behind every handler. The balancer is optional: a registry
/// can serve caller-addressed workers (explicit `browser_port`) without a
/// local pool, which is also how the HTTP surface is exercised in tests.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub balancer: Option<Arc<LoadBalancer>>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, balancer: Option<Arc<LoadBalancer>>) -> Self {
        Self { registry, balancer }
    }
}
