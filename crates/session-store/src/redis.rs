//! Redis backend for the durable index.
//!
//! Layout: a hash per session (`session:<id>`), a set of session ids per
//! agent (`agent:<id>:sessions`), a name→id hash per agent
//! (`agent:<id>:session_names`), satellite keys for pages/cookies/local
//! storage, and a global `active:sessions` set. All keys carry the
//! configured TTL.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::types::{Cookie, PageState, SessionState};
use crate::{SessionStore, StoreError};

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedisStore {
    /// Connects and verifies the server with a ping.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|err| StoreError::Backend(format!("redis client: {err}")))?;
        let mut manager = ConnectionManager::new(client)
            .await
            .map_err(|err| StoreError::Backend(format!("redis connect: {err}")))?;

        let _: () = redis::cmd("PING")
            .query_async(&mut manager)
            .await
            .map_err(|err| StoreError::Backend(format!("redis ping: {err}")))?;

        Ok(Self { manager, ttl })
    }

    fn ttl_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }

    async fn expire_best_effort(&self, key: &str) {
        let mut conn = self.manager.clone();
        if let Err(err) = conn.expire::<_, ()>(key, self.ttl_secs()).await {
            warn!(target: "session-store", key, %err, "failed to refresh ttl");
        }
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

fn pages_key(session_id: &str) -> String {
    format!("session:{session_id}:pages")
}

fn cookies_key(session_id: &str) -> String {
    format!("session:{session_id}:cookies")
}

fn local_storage_key(session_id: &str) -> String {
    format!("session:{session_id}:localStorage")
}

fn agent_sessions_key(agent_id: &str) -> String {
    format!("agent:{agent_id}:sessions")
}

fn agent_names_key(agent_id: &str) -> String {
    format!("agent:{agent_id}:session_names")
}

const ACTIVE_SESSIONS_KEY: &str = "active:sessions";

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_timestamp(raw: Option<&String>) -> DateTime<Utc> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn save(&self, state: &SessionState) -> Result<(), StoreError> {
        let key = session_key(&state.session_id);
        let fields: Vec<(&str, String)> = vec![
            ("session_id", state.session_id.clone()),
            ("session_name", state.session_name.clone()),
            ("agent_id", state.agent_id.clone()),
            ("process_port", state.process_port.to_string()),
            ("context_id", state.context_id.clone()),
            ("created_at", state.created_at.to_rfc3339()),
            ("last_activity", state.last_activity.to_rfc3339()),
            ("status", state.status.clone()),
        ];

        let mut conn = self.manager.clone();
        conn.hset_multiple::<_, _, _, ()>(&key, &fields)
            .await
            .map_err(backend)?;
        conn.expire::<_, ()>(&key, self.ttl_secs())
            .await
            .map_err(backend)?;

        if let Err(err) = conn
            .sadd::<_, _, ()>(ACTIVE_SESSIONS_KEY, &state.session_id)
            .await
        {
            warn!(target: "session-store", %err, "failed to add to active sessions set");
        }

        if !state.agent_id.is_empty() {
            let agent_key = agent_sessions_key(&state.agent_id);
            if let Err(err) = conn.sadd::<_, _, ()>(&agent_key, &state.session_id).await {
                warn!(target: "session-store", %err, "failed to add session to agent set");
            }
            self.expire_best_effort(&agent_key).await;
        }

        if !state.pages.is_empty() {
            if let Err(err) = self.save_pages(&state.session_id, &state.pages).await {
                warn!(target: "session-store", %err, "failed to save pages");
            }
        }
        if !state.cookies.is_empty() {
            let payload = serde_json::to_string(&state.cookies)
                .map_err(|err| StoreError::Backend(err.to_string()))?;
            if let Err(err) = conn
                .set_ex::<_, _, ()>(
                    cookies_key(&state.session_id),
                    payload,
                    self.ttl.as_secs(),
                )
                .await
            {
                warn!(target: "session-store", %err, "failed to save cookies");
            }
        }
        if !state.local_storage.is_empty() {
            let entries: Vec<(String, String)> = state
                .local_storage
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let ls_key = local_storage_key(&state.session_id);
            if let Err(err) = conn.hset_multiple::<_, _, _, ()>(&ls_key, &entries).await {
                warn!(target: "session-store", %err, "failed to save local storage");
            }
            self.expire_best_effort(&ls_key).await;
        }

        debug!(target: "session-store", session_id = %state.session_id, "session saved");
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<SessionState, StoreError> {
        let mut conn = self.manager.clone();
        let data: HashMap<String, String> = conn
            .hgetall(session_key(session_id))
            .await
            .map_err(backend)?;
        if data.is_empty() {
            return Err(StoreError::NotFound(session_id.to_string()));
        }

        let mut state = SessionState {
            session_id: data.get("session_id").cloned().unwrap_or_default(),
            session_name: data.get("session_name").cloned().unwrap_or_default(),
            agent_id: data.get("agent_id").cloned().unwrap_or_default(),
            process_port: data
                .get("process_port")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or_default(),
            context_id: data.get("context_id").cloned().unwrap_or_default(),
            created_at: parse_timestamp(data.get("created_at")),
            last_activity: parse_timestamp(data.get("last_activity")),
            status: data.get("status").cloned().unwrap_or_default(),
            pages: Vec::new(),
            cookies: Vec::new(),
            local_storage: HashMap::new(),
        };

        if let Ok(Some(raw)) = conn
            .get::<_, Option<String>>(pages_key(session_id))
            .await
        {
            state.pages = serde_json::from_str::<Vec<PageState>>(&raw).unwrap_or_default();
        }
        if let Ok(Some(raw)) = conn
            .get::<_, Option<String>>(cookies_key(session_id))
            .await
        {
            state.cookies = serde_json::from_str::<Vec<Cookie>>(&raw).unwrap_or_default();
        }
        if let Ok(entries) = conn
            .hgetall::<_, HashMap<String, String>>(local_storage_key(session_id))
            .await
        {
            state.local_storage = entries;
        }

        Ok(state)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let data: HashMap<String, String> = conn
            .hgetall(session_key(session_id))
            .await
            .unwrap_or_default();

        let agent_id = data.get("agent_id").cloned().unwrap_or_default();
        let session_name = data.get("session_name").cloned().unwrap_or_default();
        if !agent_id.is_empty() {
            if !session_name.is_empty() {
                if let Err(err) = self.release_name(&agent_id, &session_name).await {
                    warn!(target: "session-store", %err, "failed to release session name");
                }
            }
            if let Err(err) = conn
                .srem::<_, _, ()>(agent_sessions_key(&agent_id), session_id)
                .await
            {
                warn!(target: "session-store", %err, "failed to remove session from agent set");
            }
        }

        conn.del::<_, ()>(session_key(session_id))
            .await
            .map_err(backend)?;
        let _: Result<(), _> = conn.del(pages_key(session_id)).await;
        let _: Result<(), _> = conn.del(cookies_key(session_id)).await;
        let _: Result<(), _> = conn.del(local_storage_key(session_id)).await;
        let _: Result<(), _> = conn.srem(ACTIVE_SESSIONS_KEY, session_id).await;

        debug!(target: "session-store", session_id, "session deleted");
        Ok(())
    }

    async fn list_by_agent(&self, agent_id: &str) -> Result<Vec<SessionState>, StoreError> {
        let mut conn = self.manager.clone();
        let ids: Vec<String> = conn
            .smembers(agent_sessions_key(agent_id))
            .await
            .map_err(backend)?;

        let mut sessions = Vec::with_capacity(ids.len());
        for session_id in ids {
            match self.get(&session_id).await {
                Ok(state) => sessions.push(state),
                Err(err) => {
                    warn!(target: "session-store", session_id, %err, "failed to load session")
                }
            }
        }
        Ok(sessions)
    }

    async fn count_by_agent(&self, agent_id: &str) -> Result<usize, StoreError> {
        let mut conn = self.manager.clone();
        let count: i64 = conn
            .scard(agent_sessions_key(agent_id))
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }

    async fn name_exists(&self, agent_id: &str, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        conn.hexists(agent_names_key(agent_id), name)
            .await
            .map_err(backend)
    }

    async fn reserve_name(
        &self,
        agent_id: &str,
        name: &str,
        session_id: &str,
    ) -> Result<(), StoreError> {
        let key = agent_names_key(agent_id);
        let mut conn = self.manager.clone();
        // HSETNX makes the reservation atomic: exactly one concurrent
        // reserver wins.
        let reserved: bool = conn
            .hset_nx(&key, name, session_id)
            .await
            .map_err(backend)?;
        if !reserved {
            return Err(StoreError::NameTaken {
                agent_id: agent_id.to_string(),
                name: name.to_string(),
            });
        }
        self.expire_best_effort(&key).await;
        Ok(())
    }

    async fn release_name(&self, agent_id: &str, name: &str) -> Result<(), StoreError> {
        if agent_id.is_empty() || name.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.hdel::<_, _, ()>(agent_names_key(agent_id), name)
            .await
            .map_err(backend)
    }

    async fn lookup_name(&self, agent_id: &str, name: &str) -> Result<String, StoreError> {
        let mut conn = self.manager.clone();
        let session_id: Option<String> = conn
            .hget(agent_names_key(agent_id), name)
            .await
            .map_err(backend)?;
        session_id.ok_or_else(|| StoreError::NotFound(format!("{agent_id}/{name}")))
    }

    async fn rename(
        &self,
        session_id: &str,
        agent_id: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), StoreError> {
        self.reserve_name(agent_id, new_name, session_id).await?;
        if let Err(err) = self.release_name(agent_id, old_name).await {
            warn!(target: "session-store", %err, "failed to release old session name");
        }

        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(session_key(session_id), "session_name", new_name)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn refresh_ttl(&self, session_id: &str) -> Result<(), StoreError> {
        let key = session_key(session_id);
        let mut conn = self.manager.clone();
        conn.hset::<_, _, _, ()>(&key, "last_activity", Utc::now().to_rfc3339())
            .await
            .map_err(backend)?;
        conn.expire::<_, ()>(&key, self.ttl_secs())
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn save_pages(&self, session_id: &str, pages: &[PageState]) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(pages).map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(pages_key(session_id), payload, self.ttl.as_secs())
            .await
            .map_err(backend)?;
        Ok(())
    }
}
