use cdp_client::{CdpError, DiscoveryError};
use session_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),
    /// Page absent from the session. Surfaces under the same user-visible
    /// code as an absent session.
    #[error("page not found in session: {0}")]
    PageNotFound(String),
    #[error("session name '{name}' already exists for agent '{agent_id}'")]
    NameConflict { agent_id: String, name: String },
    #[error("agent session limit reached ({0})")]
    AgentQuota(usize),
    #[error("global session limit reached ({0})")]
    GlobalQuota(usize),
    #[error("agent_id is required")]
    AgentRequired,
    #[error("script execution failed: {0}")]
    Script(serde_json::Value),
    #[error(transparent)]
    Cdp(#[from] CdpError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
