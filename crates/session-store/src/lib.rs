//! Durable session index.
//!
//! Persists session metadata so sessions survive agent disconnects and
//! process restarts: per-session hashes, per-agent id sets, per-agent
//! name→id reservations, and optional satellites (pages, cookies, local
//! storage). Every entry carries a TTL refreshed on activity; the TTL is the
//! idle-expiry budget.

pub mod memory;
pub mod redis;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;
pub use self::types::{Cookie, PageState, SessionState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session name '{name}' already exists for agent '{agent_id}'")]
    NameTaken { agent_id: String, name: String },
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Operations the orchestration core invokes on the durable index. All are
/// best-effort from the core's perspective except name reservation, which is
/// strictly required on create.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, state: &SessionState) -> Result<(), StoreError>;
    async fn get(&self, session_id: &str) -> Result<SessionState, StoreError>;
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<SessionState>, StoreError>;
    async fn count_by_agent(&self, agent_id: &str) -> Result<usize, StoreError>;

    async fn name_exists(&self, agent_id: &str, name: &str) -> Result<bool, StoreError>;
    /// Atomically reserves `(agent_id, name) → session_id`; concurrent
    /// reservations of the same name admit exactly one winner.
    async fn reserve_name(
        &self,
        agent_id: &str,
        name: &str,
        session_id: &str,
    ) -> Result<(), StoreError>;
    async fn release_name(&self, agent_id: &str, name: &str) -> Result<(), StoreError>;
    async fn lookup_name(&self, agent_id: &str, name: &str) -> Result<String, StoreError>;
    async fn rename(
        &self,
        session_id: &str,
        agent_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError>;

    async fn refresh_ttl(&self, session_id: &str) -> Result<(), StoreError>;
    async fn save_pages(&self, session_id: &str, pages: &[PageState]) -> Result<(), StoreError>;
}
