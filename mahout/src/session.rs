//! Per-(channel, user) sessions with persistence and an in-memory cache.
//!
//! Each channel+user pair owns exactly one session; its conversation history
//! is the agent's per-turn context and is trimmed to the most recent
//! [`MAX_CONVERSATION_HISTORY`] entries on every append. The manager also
//! hands out a per-session run lock so two chats on one session never
//! interleave.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::message::ChatMessage;
use crate::store::{Row, Store, StoreError};

/// Max conversation entries carried across turns.
pub const MAX_CONVERSATION_HISTORY: usize = 20;

/// An isolated agent session for one user on one channel.
#[derive(Clone, Debug)]
pub struct Session {
    pub session_id: String,
    pub channel: String,
    pub user_id: String,
    pub conversation_history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub metadata: Value,
}

impl Session {
    fn new(channel: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            channel: channel.into(),
            user_id: user_id.into(),
            conversation_history: Vec::new(),
            created_at: now,
            last_active: now,
            metadata: json!({}),
        }
    }

    /// Stores a user/assistant pair, trimming to the history bound.
    pub fn append_conversation_turn(&mut self, user_msg: &str, assistant_msg: &str) {
        self.conversation_history.push(ChatMessage::user(user_msg));
        self.conversation_history.push(ChatMessage::assistant(assistant_msg));
        let len = self.conversation_history.len();
        if len > MAX_CONVERSATION_HISTORY {
            self.conversation_history.drain(..len - MAX_CONVERSATION_HISTORY);
        }
    }

    /// Updates last_active.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}

/// Owns the set of sessions in memory and on disk.
pub struct SessionManager {
    store: Store,
    cache: DashMap<String, Session>,
    run_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionManager {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            run_locks: DashMap::new(),
        }
    }

    /// Creates and persists a fresh session for a channel+user pair.
    pub async fn create(&self, channel: &str, user_id: &str) -> Result<Session, StoreError> {
        let session = Session::new(channel, user_id);
        self.persist(&session).await?;
        self.cache.insert(session.session_id.clone(), session.clone());
        info!(
            session = %&session.session_id[..8.min(session.session_id.len())],
            channel, user_id, "created session"
        );
        Ok(session)
    }

    /// Fetches a session by id: cache first, then store.
    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        if let Some(s) = self.cache.get(session_id) {
            return Ok(Some(s.clone()));
        }
        let rows = self
            .store
            .execute(
                "SELECT * FROM sessions WHERE session_id = ?1",
                vec![json!(session_id)],
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let session = row_to_session(row);
        self.cache.insert(session.session_id.clone(), session.clone());
        Ok(Some(session))
    }

    /// Returns the unique session for (channel, user), creating on demand.
    pub async fn get_or_create(&self, channel: &str, user_id: &str) -> Result<Session, StoreError> {
        // Collect before mutating: inserting while iterating would contend
        // on the cache shard.
        let cached = self
            .cache
            .iter()
            .find(|entry| entry.channel == channel && entry.user_id == user_id)
            .map(|entry| entry.value().clone());
        if let Some(mut s) = cached {
            s.touch();
            self.cache.insert(s.session_id.clone(), s.clone());
            return Ok(s);
        }

        let rows = self
            .store
            .execute(
                "SELECT * FROM sessions WHERE channel = ?1 AND user_id = ?2",
                vec![json!(channel), json!(user_id)],
            )
            .await?;
        if let Some(row) = rows.first() {
            let mut session = row_to_session(row);
            session.touch();
            self.cache.insert(session.session_id.clone(), session.clone());
            return Ok(session);
        }

        self.create(channel, user_id).await
    }

    /// Upserts the session and refreshes the cache.
    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        self.persist(session).await?;
        self.cache.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    /// Most recently active sessions, newest first.
    pub async fn list_active(&self, limit: usize) -> Result<Vec<Session>, StoreError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM sessions ORDER BY last_active DESC LIMIT ?1",
                vec![json!(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_session).collect())
    }

    /// Removes sessions whose last_active is older than max_age. Returns
    /// the number removed.
    pub async fn cleanup_stale(&self, max_age: Duration) -> Result<usize, StoreError> {
        let cutoff = (Utc::now() - max_age).to_rfc3339();
        let stale = self
            .store
            .execute(
                "SELECT session_id FROM sessions WHERE last_active < ?1",
                vec![json!(cutoff)],
            )
            .await?;
        for row in &stale {
            let id = row.str("session_id");
            self.cache.remove(&id);
            self.run_locks.remove(&id);
        }
        self.store
            .execute(
                "DELETE FROM sessions WHERE last_active < ?1",
                vec![json!(cutoff)],
            )
            .await?;
        if !stale.is_empty() {
            info!(count = stale.len(), "cleaned up stale sessions");
        }
        Ok(stale.len())
    }

    /// Per-session run lock: holders serialize chat processing for one
    /// session while other sessions proceed concurrently.
    pub fn run_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.run_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn persist(&self, session: &Session) -> Result<(), StoreError> {
        let conversation = serde_json::to_string(&session.conversation_history)?;
        let metadata = serde_json::to_string(&session.metadata)?;
        self.store
            .execute_insert(
                "INSERT INTO sessions (session_id, channel, user_id, conversation_json, \
                 created_at, last_active, metadata_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(session_id) DO UPDATE SET \
                 conversation_json = excluded.conversation_json, \
                 last_active = excluded.last_active, \
                 metadata_json = excluded.metadata_json",
                vec![
                    json!(session.session_id),
                    json!(session.channel),
                    json!(session.user_id),
                    json!(conversation),
                    json!(session.created_at.to_rfc3339()),
                    json!(session.last_active.to_rfc3339()),
                    json!(metadata),
                ],
            )
            .await?;
        Ok(())
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_session(row: &Row) -> Session {
    Session {
        session_id: row.str("session_id"),
        channel: row.str("channel"),
        user_id: row.str("user_id"),
        conversation_history: serde_json::from_str(&row.str("conversation_json"))
            .unwrap_or_default(),
        created_at: parse_time(&row.str("created_at")),
        last_active: parse_time(&row.str("last_active")),
        metadata: serde_json::from_str(&row.str("metadata_json")).unwrap_or_else(|_| json!({})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (SessionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        (SessionManager::new(store), dir)
    }

    /// **Scenario**: get_or_create returns the same session id for the same
    /// (channel, user) pair, from cache and from a cold store.
    #[tokio::test]
    async fn get_or_create_is_unique_per_pair() {
        let (mgr, dir) = manager().await;
        let a = mgr.get_or_create("telegram", "u1").await.unwrap();
        let b = mgr.get_or_create("telegram", "u1").await.unwrap();
        assert_eq!(a.session_id, b.session_id);
        let other = mgr.get_or_create("discord", "u1").await.unwrap();
        assert_ne!(a.session_id, other.session_id);

        // Cold start: fresh manager over the same file resolves the same id.
        let cold = SessionManager::new(Store::open(dir.path().join("t.db")).unwrap());
        let c = cold.get_or_create("telegram", "u1").await.unwrap();
        assert_eq!(a.session_id, c.session_id);
    }

    /// **Scenario**: History stays bounded at the limit and keeps the most
    /// recent entries, alternating user/assistant.
    #[tokio::test]
    async fn history_is_trimmed_to_bound() {
        let (mgr, _dir) = manager().await;
        let mut s = mgr.get_or_create("cli", "u1").await.unwrap();
        for i in 0..30 {
            s.append_conversation_turn(&format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(s.conversation_history.len(), MAX_CONVERSATION_HISTORY);
        assert_eq!(s.conversation_history.last().unwrap().content, "a29");
        mgr.save(&s).await.unwrap();

        let back = mgr.get(&s.session_id).await.unwrap().unwrap();
        assert_eq!(back.conversation_history.len(), MAX_CONVERSATION_HISTORY);
    }

    /// **Scenario**: cleanup_stale removes only sessions older than max_age.
    #[tokio::test]
    async fn cleanup_stale_removes_old_sessions() {
        let (mgr, _dir) = manager().await;
        let mut old = mgr.get_or_create("cli", "old").await.unwrap();
        old.last_active = Utc::now() - Duration::hours(48);
        mgr.save(&old).await.unwrap();
        mgr.cache.remove(&old.session_id);
        let fresh = mgr.get_or_create("cli", "fresh").await.unwrap();

        let removed = mgr.cleanup_stale(Duration::hours(24)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(mgr.get(&old.session_id).await.unwrap().is_none());
        assert!(mgr.get(&fresh.session_id).await.unwrap().is_some());
    }

    /// **Scenario**: run_lock returns the same lock for the same session.
    #[tokio::test]
    async fn run_lock_is_shared_per_session() {
        let (mgr, _dir) = manager().await;
        let a = mgr.run_lock("s1");
        let b = mgr.run_lock("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &mgr.run_lock("s2")));
    }
}
