//! The concurrent session registry and its expiry sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use cdp_client::{discovery, CdpClient};
use chrono::{DateTime, Utc};
use rand::RngCore;
use session_store::{SessionState, SessionStore, StoreError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::session::{Session, SessionSnapshot, SessionStatus};

const SESSION_ID_PREFIX: &str = "sess_";
const AUTO_NAME_PREFIX: &str = "session";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Host workers listen on for their debug endpoints.
    pub host: String,
    pub max_sessions_per_agent: usize,
    pub max_total_sessions: usize,
    /// Idle budget before the sweeper destroys a session.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    /// First-touch discovery retry budget: workers take seconds to open
    /// their debug port after spawn.
    pub discovery_attempts: u32,
    pub discovery_backoff: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            max_sessions_per_agent: 10,
            max_total_sessions: 100,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            discovery_attempts: 10,
            discovery_backoff: Duration::from_millis(200),
        }
    }
}

struct RegistryInner {
    sessions: HashMap<String, Arc<Session>>,
    clients: HashMap<u16, Arc<CdpClient>>,
}

/// In-memory map of sessions plus the protocol clients they ride on, backed
/// by an optional durable index. Without the index the registry still works;
/// persistence features (resume, per-agent quota, name reservation) are
/// disabled or degrade to resident-only views.
pub struct SessionRegistry {
    inner: tokio::sync::RwLock<RegistryInner>,
    store: Option<Arc<dyn SessionStore>>,
    cfg: RegistryConfig,
    shutdown: CancellationToken,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(store: Option<Arc<dyn SessionStore>>, cfg: RegistryConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: tokio::sync::RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                clients: HashMap::new(),
            }),
            store,
            cfg,
            shutdown: CancellationToken::new(),
            sweeper: parking_lot::Mutex::new(None),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.cfg
    }

    /// Creates a named, isolated browsing session on the given worker.
    ///
    /// Quota and name checks run before any browser-side work. The write
    /// lock is held across the protocol calls on purpose: creations are rare
    /// relative to per-session operations, and a single creator keeps the
    /// name reservation and quota checks linearizable.
    pub async fn create_session(
        &self,
        agent_id: &str,
        session_name: Option<&str>,
        port: u16,
    ) -> Result<Arc<Session>, RegistryError> {
        if agent_id.is_empty() {
            return Err(RegistryError::AgentRequired);
        }

        {
            let inner = self.inner.read().await;
            if inner.sessions.len() >= self.cfg.max_total_sessions {
                return Err(RegistryError::GlobalQuota(self.cfg.max_total_sessions));
            }
        }

        if let Some(store) = &self.store {
            // Advisory when the index is unreachable; the global cap above is
            // always enforced.
            match store.count_by_agent(agent_id).await {
                Ok(count) if count >= self.cfg.max_sessions_per_agent => {
                    return Err(RegistryError::AgentQuota(self.cfg.max_sessions_per_agent));
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "session-registry", agent_id, %err, "agent quota check skipped")
                }
            }
            if let Some(name) = session_name {
                match store.name_exists(agent_id, name).await {
                    Ok(true) => {
                        return Err(RegistryError::NameConflict {
                            agent_id: agent_id.to_string(),
                            name: name.to_string(),
                        });
                    }
                    Ok(false) => {}
                    Err(err) => {
                        warn!(target: "session-registry", agent_id, %err, "name pre-check skipped")
                    }
                }
            }
        }

        let mut inner = self.inner.write().await;

        let session_id = generate_session_id();
        let created_at = Utc::now();
        let name = match session_name {
            Some(name) => name.to_string(),
            None => auto_session_name(&session_id, created_at),
        };

        // The reservation is the uniqueness point: losing it means the
        // session is not created.
        if let Some(store) = &self.store {
            match store.reserve_name(agent_id, &name, &session_id).await {
                Ok(()) => {}
                Err(StoreError::NameTaken { agent_id, name }) => {
                    return Err(RegistryError::NameConflict { agent_id, name });
                }
                Err(err) => return Err(err.into()),
            }
        }

        let client = match self.client_for_port(&mut inner, port).await {
            Ok(client) => client,
            Err(err) => {
                self.release_name_best_effort(agent_id, &name).await;
                return Err(err);
            }
        };
        let context_id = match client.create_browser_context().await {
            Ok(context_id) => context_id,
            Err(err) => {
                self.release_name_best_effort(agent_id, &name).await;
                return Err(err.into());
            }
        };

        let session = Arc::new(Session::new(
            session_id.clone(),
            name.clone(),
            agent_id.to_string(),
            port,
            context_id,
            client,
            created_at,
        ));
        inner.sessions.insert(session_id.clone(), Arc::clone(&session));
        drop(inner);

        if let Some(store) = &self.store {
            if let Err(err) = store.save(&session.to_state()).await {
                warn!(target: "session-registry", session_id = %session.id, %err, "failed to persist session");
            }
        }

        info!(
            target: "session-registry",
            session_id = %session.id,
            session_name = %name,
            agent_id,
            port,
            "session created"
        );
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Arc<Session>, RegistryError> {
        let inner = self.inner.read().await;
        inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))
    }

    /// Tears a session down: pages closed best-effort, context disposal
    /// propagated (a leaked context is the worst outcome), durable entry
    /// deleted, record removed.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))?;

        let client = session.client();
        for page_id in session.pages() {
            if let Err(err) = client.close_target(&page_id).await {
                warn!(target: "session-registry", session_id, page_id = %page_id, %err, "failed to close page, continuing");
            }
        }

        client.dispose_browser_context(&session.context_id).await?;

        if let Some(store) = &self.store {
            if let Err(err) = store.delete(session_id).await {
                warn!(target: "session-registry", session_id, %err, "failed to delete session from durable index");
            }
        }

        inner.sessions.remove(session_id);
        if session.status() == SessionStatus::Active {
            session.set_status(SessionStatus::Closed);
        }

        info!(
            target: "session-registry",
            session_id,
            session_name = %session.name(),
            agent_id = %session.agent_id,
            "session destroyed"
        );
        Ok(())
    }

    pub async fn resume_by_name(
        &self,
        agent_id: &str,
        session_name: &str,
    ) -> Result<Arc<Session>, RegistryError> {
        if agent_id.is_empty() {
            return Err(RegistryError::AgentRequired);
        }
        // Without a durable index there is nothing to resurrect from: the
        // session is simply not findable.
        let Some(store) = &self.store else {
            debug!(target: "session-registry", agent_id, session_name, "resume without a durable store");
            return Err(RegistryError::NotFound(format!("{agent_id}/{session_name}")));
        };
        let session_id = match store.lookup_name(agent_id, session_name).await {
            Ok(session_id) => session_id,
            Err(StoreError::NotFound(_)) => {
                return Err(RegistryError::NotFound(format!("{agent_id}/{session_name}")));
            }
            Err(err) => return Err(err.into()),
        };
        self.resume_by_id(&session_id).await
    }

    /// Prefers the resident record; otherwise resurrects from the durable
    /// index. A resident record whose client died is replaced by a fresh
    /// resurrection so the session lands on a reconnected channel.
    pub async fn resume_by_id(&self, session_id: &str) -> Result<Arc<Session>, RegistryError> {
        {
            let inner = self.inner.read().await;
            if let Some(session) = inner.sessions.get(session_id) {
                if !session.client().is_closed() {
                    let session = Arc::clone(session);
                    drop(inner);
                    session.touch();
                    self.refresh_ttl_best_effort(session_id).await;
                    debug!(target: "session-registry", session_id, "resumed resident session");
                    return Ok(session);
                }
            }
        }

        let Some(store) = &self.store else {
            debug!(target: "session-registry", session_id, "resume without a durable store");
            return Err(RegistryError::NotFound(session_id.to_string()));
        };
        let state = store.get(session_id).await.map_err(|err| match err {
            StoreError::NotFound(id) => RegistryError::NotFound(id),
            other => RegistryError::Store(other),
        })?;
        let session = self.resurrect(state).await?;
        info!(
            target: "session-registry",
            session_id,
            session_name = %session.name(),
            agent_id = %session.agent_id,
            "session resurrected from durable index"
        );
        Ok(session)
    }

    async fn resurrect(&self, state: SessionState) -> Result<Arc<Session>, RegistryError> {
        let mut inner = self.inner.write().await;

        // A racing resume may have installed a live record while this one
        // was reading the store.
        if let Some(existing) = inner.sessions.get(&state.session_id) {
            if !existing.client().is_closed() {
                let existing = Arc::clone(existing);
                existing.touch();
                return Ok(existing);
            }
            inner.sessions.remove(&state.session_id);
        }

        let client = self.client_for_port(&mut inner, state.process_port).await?;
        let session = Arc::new(Session::resurrected(&state, client));
        inner
            .sessions
            .insert(state.session_id.clone(), Arc::clone(&session));
        drop(inner);

        self.refresh_ttl_best_effort(&state.session_id).await;
        Ok(session)
    }

    pub async fn rename_session(
        &self,
        session_id: &str,
        new_name: &str,
    ) -> Result<Arc<Session>, RegistryError> {
        let session = self.get_session(session_id).await?;
        if session.agent_id.is_empty() {
            return Err(RegistryError::AgentRequired);
        }

        let old_name = session.name();
        if let Some(store) = &self.store {
            match store
                .rename(session_id, &session.agent_id, &old_name, new_name)
                .await
            {
                Ok(()) => {}
                Err(StoreError::NameTaken { agent_id, name }) => {
                    return Err(RegistryError::NameConflict { agent_id, name });
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            let inner = self.inner.read().await;
            let taken = inner.sessions.values().any(|other| {
                other.id != session_id
                    && other.agent_id == session.agent_id
                    && other.name() == new_name
            });
            if taken {
                return Err(RegistryError::NameConflict {
                    agent_id: session.agent_id.clone(),
                    name: new_name.to_string(),
                });
            }
        }

        session.set_name(new_name);
        info!(
            target: "session-registry",
            session_id,
            old_name = %old_name,
            new_name,
            "session renamed"
        );
        Ok(session)
    }

    /// Snapshots of every resident session.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.read().await;
        inner.sessions.values().map(|s| s.snapshot()).collect()
    }

    /// Per-agent listing, with the durable index as source of truth when
    /// present: resident sessions appear live, the rest as lightweight
    /// projections without resurrecting.
    pub async fn list_agent_sessions(
        &self,
        agent_id: &str,
    ) -> Result<Vec<SessionSnapshot>, RegistryError> {
        if agent_id.is_empty() {
            return Err(RegistryError::AgentRequired);
        }

        let Some(store) = &self.store else {
            let inner = self.inner.read().await;
            return Ok(inner
                .sessions
                .values()
                .filter(|s| s.agent_id == agent_id)
                .map(|s| s.snapshot())
                .collect());
        };

        let states = store.list_by_agent(agent_id).await?;
        let inner = self.inner.read().await;
        Ok(states
            .iter()
            .map(|state| match inner.sessions.get(&state.session_id) {
                Some(resident) => resident.snapshot(),
                None => SessionSnapshot::from_state(state),
            })
            .collect())
    }

    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }

    /// Starts the background expiry sweeper. Two-phase: collect expired ids
    /// under the read lock, then destroy each with its own write lock, so the
    /// registry lock is never held across worker I/O for the whole scan.
    pub fn start_sweeper(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let token = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.cfg.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                target: "session-registry",
                check_interval = ?registry.cfg.sweep_interval,
                idle_timeout = ?registry.cfg.idle_timeout,
                "expiry sweeper started"
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(target: "session-registry", "expiry sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => registry.sweep_expired().await,
                }
            }
        });
        *self.sweeper.lock() = Some(handle);
    }

    /// One sweep pass. Activity after an id is collected does not reprieve
    /// it: the idle threshold dwarfs the sweep interval.
    pub async fn sweep_expired(&self) {
        let expired: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .sessions
                .iter()
                .filter(|(_, session)| session.is_expired(self.cfg.idle_timeout))
                .map(|(session_id, _)| session_id.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }

        info!(target: "session-registry", count = expired.len(), "destroying expired sessions");
        for session_id in expired {
            if let Ok(session) = self.get_session(&session_id).await {
                session.set_status(SessionStatus::Expired);
            }
            if let Err(err) = self.destroy_session(&session_id).await {
                warn!(target: "session-registry", session_id = %session_id, %err, "failed to destroy expired session");
            }
        }
    }

    /// Shuts the registry down: sweeper cancelled, every protocol client
    /// closed, maps cleared. Resident sessions are abandoned without
    /// destruction; their durable entries survive under TTL and can be
    /// resumed later.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut inner = self.inner.write().await;
        let clients: Vec<(u16, Arc<CdpClient>)> = inner.clients.drain().collect();
        for (port, client) in clients {
            client.close().await;
            debug!(target: "session-registry", port, "protocol client closed");
        }
        inner.sessions.clear();
    }

    /// Lazily connects the worker's protocol client, replacing a cached
    /// client that has since closed.
    async fn client_for_port(
        &self,
        inner: &mut RegistryInner,
        port: u16,
    ) -> Result<Arc<CdpClient>, RegistryError> {
        if let Some(client) = inner.clients.get(&port) {
            if !client.is_closed() {
                return Ok(Arc::clone(client));
            }
            inner.clients.remove(&port);
        }

        let ws_url = discovery::browser_ws_url_with_retry(
            &self.cfg.host,
            port,
            self.cfg.discovery_attempts,
            self.cfg.discovery_backoff,
        )
        .await?;
        let client = Arc::new(CdpClient::connect(&ws_url).await?);
        inner.clients.insert(port, Arc::clone(&client));
        debug!(target: "session-registry", port, "protocol client connected");
        Ok(client)
    }

    pub(crate) async fn refresh_ttl_best_effort(&self, session_id: &str) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.refresh_ttl(session_id).await {
            warn!(target: "session-registry", session_id, %err, "failed to refresh session ttl");
        }
    }

    pub(crate) async fn persist_pages_best_effort(&self, session: &Session) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.save_pages(&session.id, &session.page_states()).await {
            warn!(target: "session-registry", session_id = %session.id, %err, "failed to persist page list");
        }
    }

    async fn release_name_best_effort(&self, agent_id: &str, name: &str) {
        let Some(store) = &self.store else { return };
        if let Err(err) = store.release_name(agent_id, name).await {
            warn!(target: "session-registry", agent_id, name, %err, "failed to release reserved name");
        }
    }
}

/// `sess_` + URL-safe base64 of 16 uniform-random bytes.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{SESSION_ID_PREFIX}{}", URL_SAFE.encode(bytes))
}

/// `session-YYYY-MM-DD-XXXXXXXX`, the 8 chars being the head of the id body.
fn auto_session_name(session_id: &str, created_at: DateTime<Utc>) -> String {
    let body = &session_id[SESSION_ID_PREFIX.len()..];
    let short = &body[..8.min(body.len())];
    format!(
        "{AUTO_NAME_PREFIX}-{}-{}",
        created_at.format("%Y-%m-%d"),
        short
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn session_ids_have_the_printable_prefixed_format() {
        for _ in 0..256 {
            let id = generate_session_id();
            let body = id.strip_prefix("sess_").expect("sess_ prefix");
            // URL-safe base64 of 16 bytes: 22 chars plus '==' padding.
            assert_eq!(body.len(), 24);
            let (payload, padding) = body.split_at(22);
            assert!(payload
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert_eq!(padding, "==");
        }
    }

    #[test]
    fn session_ids_do_not_collide() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_session_id()));
        }
    }

    #[test]
    fn auto_names_embed_date_and_id_head() {
        let created_at = "2026-08-02T10:30:00Z".parse().unwrap();
        let name = auto_session_name("sess_AbCdEfGh1234567890ABCDEF", created_at);
        assert_eq!(name, "session-2026-08-02-AbCdEfGh");
    }
}
