//! One managed headless browser process.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::ports;

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessMetrics {
    pub port: u16,
    pub pid: u32,
    pub status: ProcessStatus,
    pub session_count: i64,
    pub started_at: DateTime<Utc>,
    pub healthy: bool,
}

/// A headless browser bound to an allocated debug port, with a private data
/// directory for its lifetime. The port returns to the allocator and the
/// directory is deleted on teardown.
pub struct BrowserProcess {
    debug_port: u16,
    pid: u32,
    started_at: DateTime<Utc>,
    child: Mutex<Option<Child>>,
    data_dir: Mutex<Option<TempDir>>,
    status: Mutex<ProcessStatus>,
    sessions: AtomicI64,
    stopped: AtomicBool,
}

impl std::fmt::Debug for BrowserProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserProcess")
            .field("debug_port", &self.debug_port)
            .field("pid", &self.pid)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl BrowserProcess {
    /// Acquires a port, creates the data directory, and spawns the browser.
    /// On spawn failure the port is returned and the directory removed.
    pub async fn launch(binary: &Path) -> Result<Arc<Self>, PoolError> {
        let debug_port = ports::global().acquire()?;

        let data_dir = match tempfile::Builder::new().prefix("browserhive-").tempdir() {
            Ok(dir) => dir,
            Err(err) => {
                ports::global().release(debug_port);
                return Err(PoolError::Spawn(format!(
                    "failed to create user data directory: {err}"
                )));
            }
        };

        let mut command = Command::new(binary);
        command
            .args(browser_flags(debug_port, data_dir.path()))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                ports::global().release(debug_port);
                if let Err(err) = data_dir.close() {
                    warn!(target: "browser-pool", %err, "failed to remove user data directory");
                }
                return Err(PoolError::Spawn(err.to_string()));
            }
        };

        let pid = child.id().unwrap_or_default();
        info!(target: "browser-pool", port = debug_port, pid, "browser process started");

        Ok(Arc::new(Self {
            debug_port,
            pid,
            started_at: Utc::now(),
            child: Mutex::new(Some(child)),
            data_dir: Mutex::new(Some(data_dir)),
            status: Mutex::new(ProcessStatus::Running),
            sessions: AtomicI64::new(0),
            stopped: AtomicBool::new(false),
        }))
    }

    pub fn port(&self) -> u16 {
        self.debug_port
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status.lock()
    }

    /// Existence probe via signal 0.
    pub fn alive(&self) -> bool {
        if self.stopped.load(Ordering::SeqCst) || self.pid == 0 {
            return false;
        }
        unsafe { libc::kill(self.pid as i32, 0) == 0 }
    }

    pub fn is_healthy(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.alive()
    }

    pub fn session_count(&self) -> i64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn increment_sessions(&self) {
        self.sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_sessions(&self) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
    }

    /// Graceful termination: SIGTERM, wait up to 5s, then SIGKILL. The data
    /// directory is always deleted and the port always returned. Calls after
    /// the first are no-ops.
    pub async fn stop(&self) -> Result<(), PoolError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut stop_err = None;
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            unsafe {
                libc::kill(self.pid as i32, libc::SIGTERM);
            }
            match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    // Exiting on the termination signal is the expected path;
                    // any other non-zero exit is worth a warning, not a failure.
                    let terminated = status.signal() == Some(libc::SIGTERM);
                    if !terminated && !status.success() {
                        warn!(
                            target: "browser-pool",
                            port = self.debug_port,
                            %status,
                            "browser process exited abnormally"
                        );
                    }
                }
                Ok(Err(err)) => {
                    warn!(target: "browser-pool", port = self.debug_port, %err, "wait on browser process failed");
                }
                Err(_) => {
                    warn!(
                        target: "browser-pool",
                        port = self.debug_port,
                        "browser process did not exit within {GRACEFUL_STOP_TIMEOUT:?}, force killing"
                    );
                    if let Err(err) = child.kill().await {
                        stop_err = Some(PoolError::Stop(err.to_string()));
                    }
                }
            }
        }

        if let Some(dir) = self.data_dir.lock().take() {
            if let Err(err) = dir.close() {
                warn!(target: "browser-pool", port = self.debug_port, %err, "failed to remove user data directory");
            }
        }
        ports::global().release(self.debug_port);
        *self.status.lock() = ProcessStatus::Stopped;
        debug!(target: "browser-pool", port = self.debug_port, "browser process stopped");

        match stop_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn metrics(&self) -> ProcessMetrics {
        ProcessMetrics {
            port: self.debug_port,
            pid: self.pid,
            status: self.status(),
            session_count: self.session_count(),
            started_at: self.started_at,
            healthy: self.is_healthy(),
        }
    }

    /// A running-shaped record with no OS process behind it, for balancer and
    /// pool tests. `alive()` probes the test process itself.
    #[cfg(test)]
    pub(crate) fn stub(port: u16) -> Arc<Self> {
        Arc::new(Self {
            debug_port: port,
            pid: std::process::id(),
            started_at: Utc::now(),
            child: Mutex::new(None),
            data_dir: Mutex::new(None),
            status: Mutex::new(ProcessStatus::Running),
            sessions: AtomicI64::new(0),
            stopped: AtomicBool::new(false),
        })
    }
}

fn browser_flags(port: u16, data_dir: &Path) -> Vec<String> {
    vec![
        "--headless=new".to_string(),
        format!("--remote-debugging-port={port}"),
        "--no-sandbox".to_string(),
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--user-data-dir={}", data_dir.display()),
    ]
}
