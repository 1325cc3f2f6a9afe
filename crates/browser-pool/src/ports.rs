//! Debug-port allocator.
//!
//! Hands out TCP ports from a fixed half-open range for worker debug
//! endpoints. Recently released ports are reused first (LIFO). A port is in
//! the free set iff it is on the stack.

use std::collections::HashSet;
use std::net::TcpListener;
use std::ops::Range;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::PoolError;

/// Chrome's default debug port opens the range.
pub const PORT_RANGE_START: u16 = 9222;
/// Exclusive upper bound: 50 ports for browser workers.
pub const PORT_RANGE_END: u16 = 9272;

static GLOBAL: Lazy<PortAllocator> =
    Lazy::new(|| PortAllocator::new(PORT_RANGE_START..PORT_RANGE_END));

/// The process-wide allocator used by worker processes.
pub fn global() -> &'static PortAllocator {
    &GLOBAL
}

/// Serializes tests that assert on the global allocator's free count.
#[cfg(test)]
pub(crate) static GLOBAL_TEST_GUARD: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy)]
pub struct PortStats {
    pub capacity: usize,
    pub free: usize,
}

pub struct PortAllocator {
    range: Range<u16>,
    inner: Mutex<PortPool>,
}

struct PortPool {
    stack: Vec<u16>,
    free: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        let stack: Vec<u16> = range.clone().collect();
        let free: HashSet<u16> = stack.iter().copied().collect();
        debug!(target: "browser-pool", size = stack.len(), "port pool initialized");
        Self {
            range,
            inner: Mutex::new(PortPool { stack, free }),
        }
    }

    /// Pops candidates until one passes a listen-probe, or fails with
    /// `PortExhausted`. The probe runs under the lock; it is sub-millisecond
    /// and acquisition is rare relative to steady-state traffic.
    pub fn acquire(&self) -> Result<u16, PoolError> {
        let mut pool = self.inner.lock();
        while let Some(port) = pool.stack.pop() {
            pool.free.remove(&port);
            if probe(port) {
                debug!(target: "browser-pool", port, remaining = pool.stack.len(), "allocated port");
                return Ok(port);
            }
            // Held by an external process; it can come back via release().
            debug!(target: "browser-pool", port, "port in use by external process, skipping");
        }
        Err(PoolError::PortExhausted)
    }

    /// Returns a port to the pool. Out-of-range and duplicate returns are
    /// ignored with a warning.
    pub fn release(&self, port: u16) {
        if !self.range.contains(&port) {
            warn!(target: "browser-pool", port, "attempted to return port outside the pool range");
            return;
        }
        let mut pool = self.inner.lock();
        if pool.free.contains(&port) {
            warn!(target: "browser-pool", port, "port already in pool, ignoring duplicate return");
            return;
        }
        pool.stack.push(port);
        pool.free.insert(port);
        debug!(target: "browser-pool", port, available = pool.free.len(), "returned port to pool");
    }

    pub fn stats(&self) -> PortStats {
        let pool = self.inner.lock();
        PortStats {
            capacity: (self.range.end - self.range.start) as usize,
            free: pool.free.len(),
        }
    }
}

/// A port is usable if binding succeeds; the listener is dropped immediately.
fn probe(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
