//! Approvals: the persistent queue and the in-flight wait registry.
//!
//! [`ApprovalQueue`] records every approval decision in the store so history
//! survives restarts and can be inspected from any channel. `PendingApprovals`
//! is the live side: one oneshot per outstanding request id, resolved exactly
//! once: by a matching `approval_response`, by timeout (denied), or by
//! shutdown (denied).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::warn;

use crate::store::{Row, Store, StoreError};

/// One persisted approval record.
#[derive(Clone, Debug)]
pub struct ApprovalRecord {
    pub id: i64,
    pub tool_name: String,
    pub description: String,
    pub params: Value,
    pub status: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

fn row_to_record(row: &Row) -> ApprovalRecord {
    ApprovalRecord {
        id: row.i64("id"),
        tool_name: row.str("tool_name"),
        description: row.str("description"),
        params: serde_json::from_str(&row.str("params_json")).unwrap_or_else(|_| json!({})),
        status: row.str("status"),
        created_at: row.str("created_at"),
        resolved_at: row.opt_str("resolved_at"),
    }
}

/// Persistent approval history.
pub struct ApprovalQueue {
    store: Store,
}

impl ApprovalQueue {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records a new pending request; returns its row id.
    pub async fn enqueue(
        &self,
        tool_name: &str,
        description: &str,
        params: &Value,
    ) -> Result<i64, StoreError> {
        self.store
            .execute_insert(
                "INSERT INTO approval_queue (tool_name, description, params_json, status, created_at) \
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                vec![
                    json!(tool_name),
                    json!(description),
                    json!(serde_json::to_string(params)?),
                    json!(Utc::now().to_rfc3339()),
                ],
            )
            .await
    }

    /// Resolves a pending record as approved or denied.
    pub async fn resolve(&self, approval_id: i64, approved: bool) -> Result<(), StoreError> {
        let status = if approved { "approved" } else { "denied" };
        self.store
            .execute(
                "UPDATE approval_queue SET status = ?1, resolved_at = ?2 \
                 WHERE id = ?3 AND status = 'pending'",
                vec![json!(status), json!(Utc::now().to_rfc3339()), json!(approval_id)],
            )
            .await?;
        Ok(())
    }

    /// Outstanding requests, newest first.
    pub async fn pending(&self, limit: usize) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM approval_queue WHERE status = 'pending' \
                 ORDER BY created_at DESC LIMIT ?1",
                vec![json!(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Recent history across all statuses.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ApprovalRecord>, StoreError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM approval_queue ORDER BY created_at DESC LIMIT ?1",
                vec![json!(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }
}

/// Live registry of in-flight approval futures, keyed by request id.
///
/// Single producer (the awaiting task registers), single consumer (whoever
/// resolves). The oneshot guarantees exactly-once resolution; `remove` on
/// the timeout path prevents dangling senders.
#[derive(Default)]
pub struct PendingApprovals {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh request id and returns the receiver to await.
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request_id.to_string(), tx);
        }
        rx
    }

    /// Resolves a pending request. Returns false when the id is unknown
    /// (already resolved, timed out, or never registered).
    pub fn resolve(&self, request_id: &str, approved: bool) -> bool {
        let sender = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(request_id));
        match sender {
            Some(tx) => tx.send(approved).is_ok(),
            None => {
                warn!(request_id, "no pending approval for id");
                false
            }
        }
    }

    /// Drops a request without resolving (timeout path: the receiver side
    /// already gave up).
    pub fn remove(&self, request_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(request_id);
        }
    }

    /// Resolves everything outstanding as denied (shutdown path).
    pub fn deny_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, tx) in pending.drain() {
                let _ = tx.send(false);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: A registered approval resolves exactly once; a second
    /// resolve on the same id reports unknown.
    #[tokio::test]
    async fn resolve_exactly_once() {
        let reg = PendingApprovals::new();
        let rx = reg.register("r1");
        assert_eq!(reg.len(), 1);
        assert!(reg.resolve("r1", true));
        assert!(!reg.resolve("r1", true));
        assert_eq!(rx.await, Ok(true));
        assert!(reg.is_empty());
    }

    /// **Scenario**: deny_all resolves every outstanding future as false.
    #[tokio::test]
    async fn deny_all_on_shutdown() {
        let reg = PendingApprovals::new();
        let rx1 = reg.register("a");
        let rx2 = reg.register("b");
        reg.deny_all();
        assert_eq!(rx1.await, Ok(false));
        assert_eq!(rx2.await, Ok(false));
    }

    /// **Scenario**: The queue persists pending entries and marks them
    /// resolved once.
    #[tokio::test]
    async fn queue_persists_and_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let queue = ApprovalQueue::new(store);

        let id = queue
            .enqueue("shell_execute", "Run shell command: ls", &json!({"command": "ls"}))
            .await
            .unwrap();
        let pending = queue.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_name, "shell_execute");

        queue.resolve(id, true).await.unwrap();
        assert!(queue.pending(10).await.unwrap().is_empty());
        let recent = queue.recent(10).await.unwrap();
        assert_eq!(recent[0].status, "approved");
        assert!(recent[0].resolved_at.is_some());
    }
}
