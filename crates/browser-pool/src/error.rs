use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no free ports available in pool")]
    PortExhausted,
    #[error("pool size must be between 1 and 10, got {0}")]
    InvalidSize(usize),
    #[error("failed to spawn browser process: {0}")]
    Spawn(String),
    #[error("failed to stop browser process: {0}")]
    Stop(String),
    #[error("no healthy browser process in the pool")]
    NoHealthyWorker,
    #[error("failed to stop {0} browser processes")]
    Shutdown(usize),
}
