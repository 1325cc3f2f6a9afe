//! Least-loaded worker selection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PoolError;
use crate::pool::ProcessPool;
use crate::process::BrowserProcess;

/// Picks the healthiest, least-loaded worker for a new session. The result
/// is advisory: the caller still verifies it can attach, and the caller owns
/// incrementing/decrementing the worker's session count.
pub struct LoadBalancer {
    pool: Arc<ProcessPool>,
}

impl LoadBalancer {
    pub fn new(pool: Arc<ProcessPool>) -> Self {
        Self { pool }
    }

    pub fn select(&self) -> Result<Arc<BrowserProcess>, PoolError> {
        let mut selected: Option<Arc<BrowserProcess>> = None;

        for process in self.pool.processes() {
            if !process.is_healthy() {
                warn!(target: "browser-pool", port = process.port(), "skipping unhealthy worker");
                continue;
            }
            // Strict less-than keeps the first worker on ties.
            let better = match &selected {
                None => true,
                Some(current) => process.session_count() < current.session_count(),
            };
            if better {
                selected = Some(process);
            }
        }

        match selected {
            Some(process) => {
                debug!(
                    target: "browser-pool",
                    port = process.port(),
                    current_sessions = process.session_count(),
                    "selected worker"
                );
                Ok(process)
            }
            None => Err(PoolError::NoHealthyWorker),
        }
    }

    pub fn port(&self) -> Result<u16, PoolError> {
        Ok(self.select()?.port())
    }

    pub fn find_by_port(&self, port: u16) -> Option<Arc<BrowserProcess>> {
        self.pool.processes().into_iter().find(|p| p.port() == port)
    }

    pub fn metrics(&self) -> crate::pool::PoolMetrics {
        self.pool.metrics()
    }
}
