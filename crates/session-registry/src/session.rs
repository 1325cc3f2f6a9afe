//! The session record.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdp_client::CdpClient;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use session_store::{PageState, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Closed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Closed => "closed",
            SessionStatus::Expired => "expired",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "closed" => SessionStatus::Closed,
            "expired" => SessionStatus::Expired,
            _ => SessionStatus::Active,
        }
    }
}

/// One agent-owned browsing session backed by an isolated browser context.
///
/// Identity fields are immutable; the mutable pieces carry their own
/// synchronization so per-session operations only need the registry's read
/// lock for lookup.
pub struct Session {
    pub id: String,
    pub agent_id: String,
    pub process_port: u16,
    pub context_id: String,
    pub created_at: DateTime<Utc>,
    client: Arc<CdpClient>,
    name: RwLock<String>,
    pages: RwLock<Vec<String>>,
    last_activity_ms: AtomicI64,
    status: RwLock<SessionStatus>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("agent_id", &self.agent_id)
            .field("process_port", &self.process_port)
            .field("context_id", &self.context_id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        name: String,
        agent_id: String,
        process_port: u16,
        context_id: String,
        client: Arc<CdpClient>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            agent_id,
            process_port,
            context_id,
            created_at,
            client,
            name: RwLock::new(name),
            pages: RwLock::new(Vec::new()),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            status: RwLock::new(SessionStatus::Active),
        }
    }

    /// Rebuilds a session from durable metadata. Created-at and the context
    /// handle are preserved; last-activity restarts now. The stored page ids
    /// are advisory, the browser may no longer know them.
    pub(crate) fn resurrected(state: &SessionState, client: Arc<CdpClient>) -> Self {
        let session = Self::new(
            state.session_id.clone(),
            state.session_name.clone(),
            state.agent_id.clone(),
            state.process_port,
            state.context_id.clone(),
            client,
            state.created_at,
        );
        *session.pages.write() = state.pages.iter().map(|p| p.page_id.clone()).collect();
        *session.status.write() = SessionStatus::parse(&state.status);
        session
    }

    /// Non-owning reference to the worker's protocol client.
    pub fn client(&self) -> &Arc<CdpClient> {
        &self.client
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    pub fn pages(&self) -> Vec<String> {
        self.pages.read().clone()
    }

    pub fn contains_page(&self, page_id: &str) -> bool {
        self.pages.read().iter().any(|id| id == page_id)
    }

    pub(crate) fn add_page(&self, page_id: String) {
        self.pages.write().push(page_id);
        self.touch();
    }

    /// Order is not significant, so deletion swaps with the last entry.
    pub(crate) fn remove_page(&self, page_id: &str) {
        let mut pages = self.pages.write();
        if let Some(index) = pages.iter().position(|id| id == page_id) {
            pages.swap_remove(index);
        }
        drop(pages);
        self.touch();
    }

    /// Stamps last-activity, monotone non-decreasing.
    pub fn touch(&self) {
        self.last_activity_ms
            .fetch_max(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        let idle = Utc::now()
            .signed_duration_since(self.last_activity())
            .num_milliseconds();
        idle > idle_timeout.as_millis() as i64
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let page_ids = self.pages();
        SessionSnapshot {
            session_id: self.id.clone(),
            session_name: self.name(),
            agent_id: self.agent_id.clone(),
            context_id: self.context_id.clone(),
            process_port: self.process_port,
            page_count: page_ids.len(),
            page_ids,
            created_at: self.created_at,
            last_activity: self.last_activity(),
            status: self.status(),
        }
    }

    pub(crate) fn to_state(&self) -> SessionState {
        SessionState {
            session_id: self.id.clone(),
            session_name: self.name(),
            agent_id: self.agent_id.clone(),
            process_port: self.process_port,
            context_id: self.context_id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity(),
            status: self.status().as_str().to_string(),
            pages: self.page_states(),
            cookies: Vec::new(),
            local_storage: Default::default(),
        }
    }

    pub(crate) fn page_states(&self) -> Vec<PageState> {
        self.pages()
            .into_iter()
            .map(|page_id| PageState {
                page_id,
                url: String::new(),
                title: String::new(),
            })
            .collect()
    }
}

/// Serializable view of a session, either live or projected from durable
/// metadata without resurrecting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub session_name: String,
    pub agent_id: String,
    pub context_id: String,
    pub process_port: u16,
    pub page_ids: Vec<String>,
    pub page_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
}

impl SessionSnapshot {
    pub fn from_state(state: &SessionState) -> Self {
        let page_ids: Vec<String> = state.pages.iter().map(|p| p.page_id.clone()).collect();
        Self {
            session_id: state.session_id.clone(),
            session_name: state.session_name.clone(),
            agent_id: state.agent_id.clone(),
            context_id: state.context_id.clone(),
            process_port: state.process_port,
            page_count: page_ids.len(),
            page_ids,
            created_at: state.created_at,
            last_activity: state.last_activity,
            status: SessionStatus::parse(&state.status),
        }
    }
}
