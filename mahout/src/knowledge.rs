//! Knowledge chunk storage and retrieval.
//!
//! Chunks arrive from an external indexer (the Markdown parser is not this
//! crate's concern); this module owns their storage contract: PII-redacted
//! content in `knowledge_chunks`, optional embeddings in the vector sidecar,
//! and search that prefers vectors and falls back to keywords.

use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::store::{Row, Store, StoreError};

/// One chunk of indexed knowledge.
#[derive(Clone, Debug)]
pub struct KnowledgeChunk {
    pub file_path: String,
    pub heading_path: String,
    pub content: String,
    pub tags: Vec<String>,
    pub scope: String,
    pub token_count: usize,
    pub file_updated_at: String,
}

/// One search hit.
#[derive(Clone, Debug)]
pub struct KnowledgeHit {
    pub source: String,
    pub heading: String,
    pub content: String,
    /// Higher is better; vector hits convert distance to 1/(1+d).
    pub score: f64,
}

/// One-way PII redaction applied before chunk content is persisted.
///
/// Emails, phone-like sequences, and long digit runs are replaced with
/// fixed placeholders; the original text is never stored.
pub fn redact_pii(text: &str) -> String {
    use std::sync::OnceLock;
    static EMAIL: OnceLock<regex::Regex> = OnceLock::new();
    static PHONE: OnceLock<regex::Regex> = OnceLock::new();
    static DIGITS: OnceLock<regex::Regex> = OnceLock::new();

    let email = EMAIL.get_or_init(|| {
        regex::Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
    });
    let phone = PHONE.get_or_init(|| {
        regex::Regex::new(r"\+?\d[\d\s().-]{7,}\d").unwrap()
    });
    let digits = DIGITS.get_or_init(|| regex::Regex::new(r"\d{12,}").unwrap());

    let out = email.replace_all(text, "[redacted-email]");
    let out = phone.replace_all(&out, "[redacted-phone]");
    digits.replace_all(&out, "[redacted-number]").into_owned()
}

/// Store-backed knowledge chunk access.
pub struct KnowledgeStore {
    store: Store,
}

impl KnowledgeStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Persists a chunk (content redacted first) and its embedding when one
    /// is provided and the vector sidecar is available. Returns the chunk id.
    pub async fn upsert_chunk(
        &self,
        chunk: &KnowledgeChunk,
        embedding: Option<Vec<f32>>,
    ) -> Result<i64, StoreError> {
        // Replace any previous chunk at the same (file, heading) position.
        let old = self
            .store
            .execute(
                "SELECT id FROM knowledge_chunks WHERE file_path = ?1 AND heading_path = ?2",
                vec![json!(chunk.file_path), json!(chunk.heading_path)],
            )
            .await?;
        for row in &old {
            self.store
                .execute(
                    "DELETE FROM knowledge_chunks WHERE id = ?1",
                    vec![json!(row.i64("id"))],
                )
                .await?;
        }

        let content = redact_pii(&chunk.content);
        let id = self
            .store
            .execute_insert(
                "INSERT INTO knowledge_chunks \
                 (file_path, heading_path, content, tags, scope, token_count, file_updated_at, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                vec![
                    json!(chunk.file_path),
                    json!(chunk.heading_path),
                    json!(content),
                    json!(serde_json::to_string(&chunk.tags)?),
                    json!(chunk.scope),
                    json!(chunk.token_count as i64),
                    json!(chunk.file_updated_at),
                    json!(Utc::now().to_rfc3339()),
                ],
            )
            .await?;

        if let Some(vector) = embedding {
            self.store.vec_upsert(id, vector).await?;
        }
        Ok(id)
    }

    /// Searches chunks: vector KNN when an embedding is given and the
    /// sidecar exists, keyword LIKE otherwise.
    pub async fn search(
        &self,
        query: &str,
        embedding: Option<Vec<f32>>,
        limit: usize,
    ) -> Result<Vec<KnowledgeHit>, StoreError> {
        if let Some(vector) = embedding {
            if self.store.vec_available() {
                let hits = self.vector_search(vector, limit).await?;
                if !hits.is_empty() {
                    return Ok(hits);
                }
                debug!("vector search empty, falling back to keywords");
            }
        }
        self.keyword_search(query, limit).await
    }

    async fn vector_search(
        &self,
        embedding: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<KnowledgeHit>, StoreError> {
        let pairs = self.store.vec_search(embedding, limit).await?;
        let mut hits = Vec::with_capacity(pairs.len());
        for (chunk_id, distance) in pairs {
            let rows = self
                .store
                .execute(
                    "SELECT * FROM knowledge_chunks WHERE id = ?1",
                    vec![json!(chunk_id)],
                )
                .await?;
            if let Some(row) = rows.first() {
                hits.push(row_to_hit(row, 1.0 / (1.0 + distance)));
            }
        }
        Ok(hits)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<KnowledgeHit>, StoreError> {
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
            conditions.push("(LOWER(content) LIKE ? OR LOWER(heading_path) LIKE ?)");
            let pattern = format!("%{word}%");
            params.push(json!(pattern));
            params.push(json!(pattern));
        }
        params.push(json!(limit as i64));
        let sql = format!(
            "SELECT * FROM knowledge_chunks WHERE {} ORDER BY indexed_at DESC LIMIT ?",
            conditions.join(" OR ")
        );
        let rows = self.store.execute(&sql, params).await?;
        Ok(rows.iter().map(|r| row_to_hit(r, 0.0)).collect())
    }

    /// Total indexed chunk count.
    pub async fn chunk_count(&self) -> Result<i64, StoreError> {
        let rows = self
            .store
            .execute("SELECT COUNT(*) AS cnt FROM knowledge_chunks", vec![])
            .await?;
        Ok(rows.first().map(|r| r.i64("cnt")).unwrap_or(0))
    }
}

fn row_to_hit(row: &Row, score: f64) -> KnowledgeHit {
    KnowledgeHit {
        source: row.str("file_path"),
        heading: row.str("heading_path"),
        content: row.str("content"),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, heading: &str, content: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            file_path: path.to_string(),
            heading_path: heading.to_string(),
            content: content.to_string(),
            tags: vec![],
            scope: "system".to_string(),
            token_count: content.len() / 4,
            file_updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    /// **Scenario**: Emails, phone numbers, and long digit runs are replaced
    /// before persistence; ordinary prose passes through.
    #[test]
    fn pii_redaction_is_one_way() {
        let raw = "Contact jane.doe@example.com or +1 (555) 123-4567, card 4111111111111111.";
        let redacted = redact_pii(raw);
        assert!(!redacted.contains("example.com"));
        assert!(!redacted.contains("555"));
        assert!(!redacted.contains("4111111111111111"));
        assert!(redacted.contains("[redacted-email]"));
        assert_eq!(redact_pii("plain text, no secrets"), "plain text, no secrets");
    }

    /// **Scenario**: Upsert replaces the chunk at the same (file, heading)
    /// and keyword search finds content case-insensitively.
    #[tokio::test]
    async fn upsert_and_keyword_search() {
        let dir = tempfile::tempdir().unwrap();
        let ks = KnowledgeStore::new(Store::open(dir.path().join("t.db")).unwrap());

        ks.upsert_chunk(&chunk("ops.md", "Deploy", "Use the blue-green strategy"), None)
            .await
            .unwrap();
        ks.upsert_chunk(&chunk("ops.md", "Deploy", "Use canary releases now"), None)
            .await
            .unwrap();
        assert_eq!(ks.chunk_count().await.unwrap(), 1);

        let hits = ks.search("CANARY", None, 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "ops.md");
        assert!(hits[0].content.contains("canary"));

        // Redaction applies on the write path.
        ks.upsert_chunk(&chunk("team.md", "Contacts", "Mail boss@corp.io"), None)
            .await
            .unwrap();
        let redacted = ks.search("mail", None, 5).await.unwrap();
        assert!(redacted[0].content.contains("[redacted-email]"));
    }
}
