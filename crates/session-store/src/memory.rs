//! In-memory backend.
//!
//! Same contract as the Redis backend, scoped to the process lifetime. Used
//! when no store address is configured and by tests. Entries expire lazily
//! against the configured TTL.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{PageState, SessionState};
use crate::{SessionStore, StoreError};

pub struct MemoryStore {
    ttl: Duration,
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: HashMap<String, Entry>,
    agent_sessions: HashMap<String, HashSet<String>>,
    agent_names: HashMap<String, HashMap<String, String>>,
}

struct Entry {
    state: SessionState,
    expires_at: Instant,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn purge_expired(inner: &mut MemoryInner) {
        let now = Instant::now();
        let expired: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in expired {
            Self::remove_locked(inner, &session_id);
        }
    }

    fn remove_locked(inner: &mut MemoryInner, session_id: &str) {
        let Some(entry) = inner.sessions.remove(session_id) else {
            return;
        };
        let agent_id = entry.state.agent_id;
        if let Some(ids) = inner.agent_sessions.get_mut(&agent_id) {
            ids.remove(session_id);
        }
        if let Some(names) = inner.agent_names.get_mut(&agent_id) {
            names.retain(|_, id| id != session_id);
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);

        if !state.agent_id.is_empty() {
            inner
                .agent_sessions
                .entry(state.agent_id.clone())
                .or_default()
                .insert(state.session_id.clone());
        }
        inner.sessions.insert(
            state.session_id.clone(),
            Entry {
                state: state.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<SessionState, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        inner
            .sessions
            .get(session_id)
            .map(|entry| entry.state.clone())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::remove_locked(&mut inner, session_id);
        Ok(())
    }

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<SessionState>, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        let ids = inner.agent_sessions.get(agent_id).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .map(|entry| entry.state.clone())
            .collect())
    }

    async fn count_by_agent(&self, agent_id: &str) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        Ok(inner
            .agent_sessions
            .get(agent_id)
            .map(|ids| ids.len())
            .unwrap_or(0))
    }

    async fn name_exists(&self, agent_id: &str, name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        Ok(inner
            .agent_names
            .get(agent_id)
            .is_some_and(|names| names.contains_key(name)))
    }

    async fn reserve_name(
        &self,
        agent_id: &str,
        name: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        let names = inner.agent_names.entry(agent_id.to_string()).or_default();
        if names.contains_key(name) {
            return Err(StoreError::NameTaken {
                agent_id: agent_id.to_string(),
                name: name.to_string(),
            });
        }
        names.insert(name.to_string(), session_id.to_string());
        Ok(())
    }

    async fn release_name(&self, agent_id: &str, name: &str) -> Result<(), StoreError> {
        if agent_id.is_empty() || name.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if let Some(names) = inner.agent_names.get_mut(agent_id) {
            names.remove(name);
        }
        Ok(())
    }

    async fn lookup_name(&self, agent_id: &str, name: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);
        inner
            .agent_names
            .get(agent_id)
            .and_then(|names| names.get(name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{agent_id}/{name}")))
    }

    async fn rename(
        &self,
        session_id: &str,
        agent_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::purge_expired(&mut inner);

        let names = inner.agent_names.entry(agent_id.to_string()).or_default();
        if names.contains_key(new_name) {
            return Err(StoreError::NameTaken {
                agent_id: agent_id.to_string(),
                name: new_name.to_string(),
            });
        }
        names.remove(old_name);
        names.insert(new_name.to_string(), session_id.to_string());

        if let Some(entry) = inner.sessions.get_mut(session_id) {
            entry.state.session_name = new_name.to_string();
        }
        Ok(())
    }

    async fn refresh_ttl(&self, session_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let ttl = self.ttl;
        match inner.sessions.get_mut(session_id) {
            Some(entry) => {
                entry.expires_at = Instant::now() + ttl;
                entry.state.last_activity = chrono::Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(session_id.to_string())),
        }
    }

    async fn save_pages(&self, session_id: &str, pages: &[PageState]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(session_id) {
            Some(entry) => {
                entry.state.pages = pages.to_vec();
                Ok(())
            }
            None => Err(StoreError::NotFound(session_id.to_string())),
        }
    }
}
