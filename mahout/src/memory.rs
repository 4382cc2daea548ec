//! Working memory (per-task) and durable task memory.
//!
//! Working memory accumulates knowledge hits retrieved in the background
//! during a run and is formatted into the system prompt of the *next* turn.
//! Task memory is the persistent record of finished tasks, searched by
//! keyword when a new goal arrives.

use chrono::Utc;
use serde_json::json;

use crate::knowledge::KnowledgeHit;
use crate::store::{Row, Store, StoreError};

fn estimate_tokens(text: &str) -> usize {
    (text.len() / 4).max(1)
}

/// In-task context that accumulates relevant knowledge chunks.
#[derive(Debug, Default)]
pub struct WorkingMemory {
    chunks: Vec<KnowledgeHit>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds hits, skipping duplicates by (source, heading).
    pub fn add_chunks(&mut self, hits: Vec<KnowledgeHit>) {
        for hit in hits {
            let duplicate = self
                .chunks
                .iter()
                .any(|c| c.source == hit.source && c.heading == hit.heading);
            if !duplicate {
                self.chunks.push(hit);
            }
        }
    }

    /// Formats accumulated chunks as a markdown context block bounded by a
    /// token budget; empty string when nothing was retrieved.
    pub fn format_context(&self, max_tokens: usize) -> String {
        if self.chunks.is_empty() {
            return String::new();
        }
        let mut lines = vec!["## Relevant Knowledge".to_string(), String::new()];
        let mut total = 0usize;
        for chunk in &self.chunks {
            let cost = estimate_tokens(&chunk.content);
            if total + cost > max_tokens {
                break;
            }
            let mut header = format!("### From: {}", chunk.source);
            if !chunk.heading.is_empty() {
                header.push_str(&format!(" > {}", chunk.heading));
            }
            lines.push(header);
            lines.push(chunk.content.clone());
            lines.push(String::new());
            total += cost;
        }
        lines.join("\n").trim_end().to_string()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// One remembered task.
#[derive(Clone, Debug)]
pub struct TaskMemory {
    pub goal: String,
    pub summary: String,
    pub outcome: String,
    pub tools_used: Vec<String>,
    pub created_at: String,
}

fn row_to_memory(row: &Row) -> TaskMemory {
    TaskMemory {
        goal: row.str("task_goal"),
        summary: row.str("task_summary"),
        outcome: row.str("outcome"),
        tools_used: serde_json::from_str(&row.str("tools_used")).unwrap_or_default(),
        created_at: row.str("created_at"),
    }
}

/// Durable task memory in the store.
pub struct MemoryManager {
    store: Store,
}

impl MemoryManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Stores a finished task's summary for future recall.
    pub async fn store_task_memory(
        &self,
        session_id: &str,
        goal: &str,
        summary: &str,
        outcome: &str,
        tools_used: &[String],
    ) -> Result<i64, StoreError> {
        self.store
            .execute_insert(
                "INSERT INTO memory (session_id, task_goal, task_summary, outcome, tools_used, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                vec![
                    json!(session_id),
                    json!(goal),
                    json!(summary),
                    json!(outcome),
                    json!(serde_json::to_string(tools_used)?),
                    json!(Utc::now().to_rfc3339()),
                ],
            )
            .await
    }

    /// Keyword search over goal and summary: OR of LIKE terms, newest first.
    pub async fn search_memory(&self, query: &str, limit: usize) -> Result<Vec<TaskMemory>, StoreError> {
        let words: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .take(5)
            .map(String::from)
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for word in &words {
            conditions.push("(LOWER(task_goal) LIKE ? OR LOWER(task_summary) LIKE ?)");
            let pattern = format!("%{word}%");
            params.push(json!(pattern));
            params.push(json!(pattern));
        }
        params.push(json!(limit as i64));

        let sql = format!(
            "SELECT * FROM memory WHERE {} ORDER BY created_at DESC LIMIT ?",
            conditions.join(" OR ")
        );
        let rows = self.store.execute(&sql, params).await?;
        Ok(rows.iter().map(row_to_memory).collect())
    }

    /// Most recent task memories.
    pub async fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskMemory>, StoreError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM memory ORDER BY created_at DESC LIMIT ?1",
                vec![json!(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_memory).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(source: &str, heading: &str, content: &str) -> KnowledgeHit {
        KnowledgeHit {
            source: source.to_string(),
            heading: heading.to_string(),
            content: content.to_string(),
            score: 1.0,
        }
    }

    /// **Scenario**: Duplicate (source, heading) pairs are kept once; clear
    /// empties the memory.
    #[test]
    fn working_memory_dedupes() {
        let mut wm = WorkingMemory::new();
        wm.add_chunks(vec![hit("a.md", "Intro", "one"), hit("a.md", "Intro", "two")]);
        wm.add_chunks(vec![hit("a.md", "Usage", "three")]);
        assert_eq!(wm.len(), 2);
        wm.clear();
        assert!(wm.is_empty());
    }

    /// **Scenario**: format_context respects the token budget and renders
    /// source > heading headers.
    #[test]
    fn format_context_bounded() {
        let mut wm = WorkingMemory::new();
        wm.add_chunks(vec![
            hit("guide.md", "Setup", &"x".repeat(400)),
            hit("guide.md", "Teardown", &"y".repeat(400)),
        ]);
        let ctx = wm.format_context(120);
        assert!(ctx.contains("### From: guide.md > Setup"));
        assert!(!ctx.contains("Teardown"));
        assert!(wm.format_context(10_000).contains("Teardown"));
        assert_eq!(WorkingMemory::new().format_context(100), "");
    }

    /// **Scenario**: Stored memories come back through keyword search with
    /// any of the query words matching.
    #[tokio::test]
    async fn store_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = MemoryManager::new(Store::open(dir.path().join("t.db")).unwrap());
        mgr.store_task_memory("s1", "Summarize the quarterly report", "Found 3 key points", "completed", &["file_read".to_string()])
            .await
            .unwrap();
        mgr.store_task_memory("s1", "Book a flight", "Booked", "completed", &[])
            .await
            .unwrap();

        let hits = mgr.search_memory("quarterly numbers", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tools_used, vec!["file_read"]);

        assert!(mgr.search_memory("", 5).await.unwrap().is_empty());
        assert_eq!(mgr.recent_tasks(10).await.unwrap().len(), 2);
    }
}
