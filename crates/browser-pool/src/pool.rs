//! Pool of managed browser processes.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::PoolError;
use crate::process::{BrowserProcess, ProcessMetrics};

pub const MAX_POOL_SIZE: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub total_processes: usize,
    pub total_sessions: i64,
    pub processes: Vec<ProcessMetrics>,
}

pub struct ProcessPool {
    binary: PathBuf,
    processes: RwLock<Vec<Arc<BrowserProcess>>>,
}

impl std::fmt::Debug for ProcessPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPool")
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl ProcessPool {
    /// Starts `size` workers serially. On any failure every worker started so
    /// far is stopped and the error is returned.
    pub async fn new(binary: impl Into<PathBuf>, size: usize) -> Result<Arc<Self>, PoolError> {
        if !(1..=MAX_POOL_SIZE).contains(&size) {
            return Err(PoolError::InvalidSize(size));
        }

        let pool = Arc::new(Self {
            binary: binary.into(),
            processes: RwLock::new(Vec::with_capacity(size)),
        });

        for index in 0..size {
            match BrowserProcess::launch(&pool.binary).await {
                Ok(process) => {
                    info!(target: "browser-pool", index, port = process.port(), "started browser worker");
                    pool.processes.write().push(process);
                }
                Err(err) => {
                    error!(target: "browser-pool", index, %err, "failed to start worker, cleaning up pool");
                    if let Err(shutdown_err) = pool.shutdown().await {
                        warn!(target: "browser-pool", %shutdown_err, "cleanup after failed start was incomplete");
                    }
                    return Err(err);
                }
            }
        }

        info!(target: "browser-pool", size, "process pool initialized");
        Ok(pool)
    }

    /// A stable snapshot; callers never observe concurrent mutation.
    pub fn processes(&self) -> Vec<Arc<BrowserProcess>> {
        self.processes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.read().is_empty()
    }

    /// Stops every worker, collecting failures but continuing, and clears the
    /// pool even when some workers refused to die.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let drained: Vec<Arc<BrowserProcess>> = {
            let mut guard = self.processes.write();
            guard.drain(..).collect()
        };

        let mut failures = 0usize;
        for process in drained {
            match process.stop().await {
                Ok(()) => info!(target: "browser-pool", port = process.port(), "worker stopped"),
                Err(err) => {
                    warn!(target: "browser-pool", port = process.port(), %err, "failed to stop worker");
                    failures += 1;
                }
            }
        }

        if failures > 0 {
            warn!(target: "browser-pool", failures, "shutdown completed with errors");
            return Err(PoolError::Shutdown(failures));
        }
        info!(target: "browser-pool", "all workers shut down");
        Ok(())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let processes = self.processes();
        let per_process: Vec<ProcessMetrics> = processes.iter().map(|p| p.metrics()).collect();
        PoolMetrics {
            total_processes: per_process.len(),
            total_sessions: per_process.iter().map(|m| m.session_count).sum(),
            processes: per_process,
        }
    }

    #[cfg(test)]
    pub(crate) fn stub_pool(processes: Vec<Arc<BrowserProcess>>) -> Arc<Self> {
        Arc::new(Self {
            binary: PathBuf::from("/bin/false"),
            processes: RwLock::new(processes),
        })
    }
}
