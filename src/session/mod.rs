// Copyright (c) 2024-2026, Daily
// SPDX-License-Identifier: BSD-2-Clause

//! Session lifecycle management.
//!
//! Sessions move through `NEW -> ACTIVE -> IDLE -> CLOSED`. All attributes
//! live in the key-value store under `session:{id}`; the set of open sessions
//! is tracked in `sessions:active`. Chat history is stored per conversation
//! and capped; closed sessions are retained for a day for analytics.

pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub use store::{MemoryStore, RedisStore, SessionStore, StoreError};

use crate::services::ChatMessage;
use crate::turn::TurnConfig;
use crate::utils::{generate_unique_id, now_epoch_secs};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Active,
    Idle,
    Closed,
}

impl SessionState {
    /// Wire/store representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
            Self::Closed => "CLOSED",
        }
    }

    /// Parse the store representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "ACTIVE" => Some(Self::Active),
            "IDLE" => Some(Self::Idle),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Set of session ids considered open.
const ACTIVE_SET_KEY: &str = "sessions:active";

/// Retention for closed sessions, for analytics.
const CLOSED_RETENTION_SECS: i64 = 86_400;

/// Messages kept per conversation history.
const HISTORY_CAP: isize = 50;

fn session_key(id: &str) -> String {
    format!("session:{}", id)
}

fn history_key(id: &str) -> String {
    format!("conversation:{}:history", id)
}

/// Store-backed session lifecycle manager.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    idle_timeout: Duration,
    max_session_duration: Duration,
}

impl SessionManager {
    /// Create a manager over the given store.
    pub fn new(
        store: Arc<dyn SessionStore>,
        idle_timeout: Duration,
        max_session_duration: Duration,
    ) -> Self {
        Self {
            store,
            idle_timeout,
            max_session_duration,
        }
    }

    /// The store shared with other collaborators.
    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// TTL applied to session-scoped keys: the session cap plus grace.
    pub fn key_ttl_secs(&self) -> i64 {
        self.max_session_duration.as_secs() as i64 + 60
    }

    /// Create a new session and return its id.
    pub async fn create_session(&self, user_id: Option<&str>) -> Result<String, StoreError> {
        let id = generate_unique_id("sess");
        let now = now_epoch_secs().to_string();
        let key = session_key(&id);

        self.store
            .hash_set(
                &key,
                &[
                    ("session_id", id.clone()),
                    ("state", SessionState::New.as_str().to_string()),
                    ("created_at", now.clone()),
                    ("last_activity", now),
                    ("user_id", user_id.unwrap_or_default().to_string()),
                    ("metadata", "{}".to_string()),
                ],
            )
            .await?;
        self.store.set_add(ACTIVE_SET_KEY, &id).await?;
        self.store.expire(&key, self.key_ttl_secs()).await?;

        debug!(session_id = %id, "session created");
        Ok(id)
    }

    /// Fetch the full session hash, or `None` if the session is unknown.
    pub async fn get_session(
        &self,
        id: &str,
    ) -> Result<Option<HashMap<String, String>>, StoreError> {
        let data = self.store.hash_get_all(&session_key(id)).await?;
        Ok(if data.is_empty() { None } else { Some(data) })
    }

    /// Current lifecycle state, or `None` if the session is unknown.
    pub async fn get_state(&self, id: &str) -> Result<Option<SessionState>, StoreError> {
        let raw = self.store.hash_get(&session_key(id), "state").await?;
        Ok(raw.as_deref().and_then(SessionState::parse))
    }

    /// Overwrite the lifecycle state. Closing removes the id from the active
    /// set.
    pub async fn update_state(&self, id: &str, state: SessionState) -> Result<(), StoreError> {
        self.store
            .hash_set(&session_key(id), &[("state", state.as_str().to_string())])
            .await?;
        if state == SessionState::Closed {
            self.store.set_remove(ACTIVE_SET_KEY, id).await?;
        }
        Ok(())
    }

    /// Record activity: refresh `last_activity` and promote NEW/IDLE to
    /// ACTIVE. Returns `false` for unknown sessions.
    pub async fn update_activity(&self, id: &str) -> Result<bool, StoreError> {
        let Some(state) = self.get_state(id).await? else {
            return Ok(false);
        };
        self.store
            .hash_set(
                &session_key(id),
                &[("last_activity", now_epoch_secs().to_string())],
            )
            .await?;
        if matches!(state, SessionState::New | SessionState::Idle) {
            self.update_state(id, SessionState::Active).await?;
        }
        Ok(true)
    }

    /// Whether the session has seen no activity for the idle timeout.
    pub async fn check_idle(&self, id: &str) -> Result<bool, StoreError> {
        let raw = self
            .store
            .hash_get(&session_key(id), "last_activity")
            .await?;
        Ok(match raw.and_then(|s| s.parse::<u64>().ok()) {
            Some(last) => now_epoch_secs().saturating_sub(last) >= self.idle_timeout.as_secs(),
            None => false,
        })
    }

    /// Whether the session has outlived the maximum duration.
    pub async fn check_timeout(&self, id: &str) -> Result<bool, StoreError> {
        let raw = self.store.hash_get(&session_key(id), "created_at").await?;
        Ok(match raw.and_then(|s| s.parse::<u64>().ok()) {
            Some(created) => {
                now_epoch_secs().saturating_sub(created) >= self.max_session_duration.as_secs()
            }
            None => false,
        })
    }

    /// Persist per-session turn-taking timing overrides.
    pub async fn set_turn_config(&self, id: &str, config: &TurnConfig) -> Result<(), StoreError> {
        self.store
            .hash_set(
                &session_key(id),
                &[("turn_config", serde_json::to_string(config)?)],
            )
            .await
    }

    /// Read per-session turn-taking overrides, if any were set.
    pub async fn get_turn_config(&self, id: &str) -> Result<Option<TurnConfig>, StoreError> {
        let raw = self.store.hash_get(&session_key(id), "turn_config").await?;
        Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
    }

    /// Append a message to the conversation history, keeping the most recent
    /// [`HISTORY_CAP`] entries.
    pub async fn add_to_history(
        &self,
        id: &str,
        role: &str,
        content: &str,
    ) -> Result<(), StoreError> {
        let message = ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
        };
        let key = history_key(id);
        self.store
            .list_push_front(&key, serde_json::to_string(&message)?)
            .await?;
        self.store.list_trim(&key, 0, HISTORY_CAP - 1).await?;
        self.store.expire(&key, self.key_ttl_secs()).await?;
        Ok(())
    }

    /// Read up to `limit` history messages, oldest first. Records that fail
    /// to parse are skipped.
    pub async fn get_history(&self, id: &str, limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
        let raw = self
            .store
            .list_range(&history_key(id), 0, limit as isize - 1)
            .await?;
        let mut history: Vec<ChatMessage> = raw
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        history.reverse();
        Ok(history)
    }

    /// Close a session, keeping its data for a day of analytics.
    pub async fn close_session(&self, id: &str) -> Result<(), StoreError> {
        self.update_state(id, SessionState::Closed).await?;
        self.store
            .expire(&session_key(id), CLOSED_RETENTION_SECS)
            .await?;
        self.store
            .expire(&history_key(id), CLOSED_RETENTION_SECS)
            .await?;
        debug!(session_id = %id, "session closed");
        Ok(())
    }

    /// Walk the active set, idling quiet sessions and closing expired ones.
    pub async fn cleanup_idle_sessions(&self) {
        let ids = match self.store.set_members(ACTIVE_SET_KEY).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("session cleanup: failed to list active sessions: {}", e);
                return;
            }
        };

        for id in ids {
            let result = async {
                if self.check_idle(&id).await? {
                    if self.get_state(&id).await? == Some(SessionState::Active) {
                        debug!(session_id = %id, "marking session idle");
                        self.update_state(&id, SessionState::Idle).await?;
                    }
                }
                if self.check_timeout(&id).await? {
                    debug!(session_id = %id, "closing expired session");
                    self.close_session(&id).await?;
                }
                Ok::<(), StoreError>(())
            }
            .await;
            if let Err(e) = result {
                warn!(session_id = %id, "session cleanup failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("idle_timeout", &self.idle_timeout)
            .field("max_session_duration", &self.max_session_duration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
            Duration::from_secs(600),
        )
    }

    #[tokio::test]
    async fn test_create_session_initial_state() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        assert_eq!(m.get_state(&id).await.unwrap(), Some(SessionState::New));

        let data = m.get_session(&id).await.unwrap().unwrap();
        assert_eq!(data["session_id"], id);
        assert_eq!(data["user_id"], "");
        assert_eq!(data["metadata"], "{}");
        assert!(data.contains_key("created_at"));
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let m = manager();
        assert!(m.get_session("nope").await.unwrap().is_none());
        assert!(m.get_state("nope").await.unwrap().is_none());
        assert!(!m.update_activity("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_activity_promotes_to_active() {
        let m = manager();
        let id = m.create_session(Some("user-7")).await.unwrap();
        assert!(m.update_activity(&id).await.unwrap());
        assert_eq!(m.get_state(&id).await.unwrap(), Some(SessionState::Active));
    }

    #[tokio::test]
    async fn test_close_session_leaves_active_set() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        m.close_session(&id).await.unwrap();
        assert_eq!(m.get_state(&id).await.unwrap(), Some(SessionState::Closed));
        let active = m.store().set_members(ACTIVE_SET_KEY).await.unwrap();
        assert!(!active.contains(&id));
    }

    #[tokio::test]
    async fn test_fresh_session_not_idle_or_expired() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        assert!(!m.check_idle(&id).await.unwrap());
        assert!(!m.check_timeout(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_roundtrip_in_order() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        m.add_to_history(&id, "user", "hello").await.unwrap();
        m.add_to_history(&id, "assistant", "hi there").await.unwrap();

        let history = m.get_history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], ChatMessage::user("hello"));
        assert_eq!(history[1], ChatMessage::assistant("hi there"));
    }

    #[tokio::test]
    async fn test_history_cap() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        for i in 0..60 {
            m.add_to_history(&id, "user", &format!("msg {}", i))
                .await
                .unwrap();
        }
        let history = m.get_history(&id, 100).await.unwrap();
        assert_eq!(history.len(), 50);
        // The oldest surviving message is number 10.
        assert_eq!(history[0].content, "msg 10");
        assert_eq!(history[49].content, "msg 59");
    }

    #[tokio::test]
    async fn test_history_skips_malformed_records() {
        let m = manager();
        let id = m.create_session(None).await.unwrap();
        m.add_to_history(&id, "user", "good").await.unwrap();
        m.store()
            .list_push_front(&history_key(&id), "not json".to_string())
            .await
            .unwrap();
        let history = m.get_history(&id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "good");
    }

    #[tokio::test]
    async fn test_cleanup_closes_timed_out_session() {
        let m = SessionManager::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
            Duration::from_secs(0),
        );
        let id = m.create_session(None).await.unwrap();
        // Max duration of zero: the session is expired immediately.
        m.cleanup_idle_sessions().await;
        assert_eq!(m.get_state(&id).await.unwrap(), Some(SessionState::Closed));
    }

    #[tokio::test]
    async fn test_cleanup_idles_quiet_session() {
        let m = SessionManager::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(0),
            Duration::from_secs(600),
        );
        let id = m.create_session(None).await.unwrap();
        m.update_activity(&id).await.unwrap();
        // Idle timeout of zero: any active session is immediately idle.
        m.cleanup_idle_sessions().await;
        assert_eq!(m.get_state(&id).await.unwrap(), Some(SessionState::Idle));
    }

    #[test]
    fn test_session_state_parse() {
        assert_eq!(SessionState::parse("NEW"), Some(SessionState::New));
        assert_eq!(SessionState::parse("CLOSED"), Some(SessionState::Closed));
        assert_eq!(SessionState::parse("bogus"), None);
    }
}
