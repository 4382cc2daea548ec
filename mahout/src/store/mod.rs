//! SQLite store with an optional sqlite-vec vector sidecar.
//!
//! One connection behind a process-wide mutex is the single serialization
//! point for writes; the database runs in WAL mode with foreign keys on.
//! All calls hop to the blocking pool so the event loop never stalls on
//! disk I/O.
//!
//! **Interaction**: Every manager (sessions, schedules, goals, swarm,
//! memory, knowledge, identity, approvals) talks to the database through
//! this type only.

mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, Once};

use rusqlite::Connection;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

static SQLITE_VEC_INIT: Once = Once::new();

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Storage(format!("blocking task failed: {e}"))
    }
}

/// One result row: column name → JSON value.
#[derive(Clone, Debug, Default)]
pub struct Row(pub serde_json::Map<String, Value>);

impl Row {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Text column; empty string for NULL or missing.
    pub fn str(&self, key: &str) -> String {
        self.opt_str(key).unwrap_or_default()
    }

    /// Text column; None for NULL or missing.
    pub fn opt_str(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn i64(&self, key: &str) -> i64 {
        self.0.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
    }

    pub fn opt_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| v.as_i64())
    }

    pub fn f64(&self, key: &str) -> f64 {
        self.0.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
    }

    /// Integer column interpreted as boolean (SQLite convention).
    pub fn bool(&self, key: &str) -> bool {
        self.i64(key) != 0
    }
}

fn to_sql_values(params: &[Value]) -> Vec<rusqlite::types::Value> {
    params
        .iter()
        .map(|v| match v {
            Value::Null => rusqlite::types::Value::Null,
            Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    rusqlite::types::Value::Integer(i)
                } else {
                    rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => rusqlite::types::Value::Text(s.clone()),
            other => rusqlite::types::Value::Text(other.to_string()),
        })
        .collect()
}

fn value_ref_to_json(v: rusqlite::types::ValueRef<'_>) -> Value {
    match v {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::from(i),
        rusqlite::types::ValueRef::Real(f) => {
            serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        rusqlite::types::ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        rusqlite::types::ValueRef::Blob(_) => Value::Null,
    }
}

/// Formats an embedding for sqlite-vec (e.g. "[0.1,0.2,0.3]").
fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// SQLite-backed store. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    vec_available: bool,
}

impl Store {
    /// Opens (or creates) the database, applies schema and migrations, and
    /// probes for the sqlite-vec extension.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        SQLITE_VEC_INIT.call_once(|| unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(format!("create data dir: {e}")))?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(schema::SCHEMA)?;

        for migration in schema::MIGRATIONS {
            if let Err(e) = conn.execute(migration, []) {
                let msg = e.to_string();
                if !msg.contains("duplicate column name") {
                    return Err(StoreError::Storage(msg));
                }
            }
        }

        let vec_available = conn
            .query_row("SELECT vec_version()", [], |r| r.get::<_, String>(0))
            .is_ok();
        if vec_available {
            info!("sqlite-vec extension available");
        } else {
            warn!("sqlite-vec not available, knowledge search falls back to keywords");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            vec_available,
        })
    }

    /// Whether the vector sidecar can be used.
    pub fn vec_available(&self) -> bool {
        self.vec_available
    }

    /// Runs one statement. SELECTs return rows; other statements return an
    /// empty vec.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            let mut stmt = conn.prepare(&sql)?;
            let sql_params = to_sql_values(&params);
            if stmt.column_count() == 0 {
                stmt.execute(rusqlite::params_from_iter(sql_params))?;
                return Ok(Vec::new());
            }
            let names: Vec<String> =
                stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(sql_params))?;
            let mut out = Vec::new();
            while let Some(r) = rows.next()? {
                let mut obj = serde_json::Map::new();
                for (i, name) in names.iter().enumerate() {
                    obj.insert(name.clone(), value_ref_to_json(r.get_ref(i)?));
                }
                out.push(Row(obj));
            }
            Ok(out)
        })
        .await?
    }

    /// Runs an INSERT/UPDATE/DELETE and returns the last insert rowid.
    pub async fn execute_insert(&self, sql: &str, params: Vec<Value>) -> Result<i64, StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            let sql_params = to_sql_values(&params);
            conn.execute(&sql, rusqlite::params_from_iter(sql_params))?;
            Ok(conn.last_insert_rowid())
        })
        .await?
    }

    /// Runs one statement for each parameter set inside a single transaction.
    pub async fn execute_many(
        &self,
        sql: &str,
        params_list: Vec<Vec<Value>>,
    ) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for params in &params_list {
                    let sql_params = to_sql_values(params);
                    stmt.execute(rusqlite::params_from_iter(sql_params))?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    /// Runs a multi-statement SQL script.
    pub async fn execute_script(&self, sql: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await?
    }

    /// Creates the `vec_chunks` virtual table for `dims`-dimensional
    /// embeddings. No-op when the table already exists with matching
    /// dimensions (or exists empty); otherwise drop and recreate.
    pub async fn create_vector_index(&self, dims: usize) -> Result<(), StoreError> {
        if !self.vec_available {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;

            let existing: Option<i64> = conn
                .query_row("SELECT COUNT(*) FROM vec_chunks", [], |r| r.get(0))
                .ok();
            if let Some(count) = existing {
                if count == 0 {
                    return Ok(());
                }
                let sample: Option<i64> = conn
                    .query_row(
                        "SELECT length(embedding) / 4 FROM vec_chunks LIMIT 1",
                        [],
                        |r| r.get(0),
                    )
                    .ok();
                if sample == Some(dims as i64) {
                    return Ok(());
                }
            }

            conn.execute("DROP TABLE IF EXISTS vec_chunks", [])?;
            conn.execute(
                &format!(
                    "CREATE VIRTUAL TABLE vec_chunks USING vec0(\
                     chunk_id INTEGER PRIMARY KEY, embedding float[{dims}])"
                ),
                [],
            )?;
            Ok(())
        })
        .await?
    }

    /// Stores (or replaces) the embedding for a knowledge chunk.
    pub async fn vec_upsert(&self, chunk_id: i64, embedding: Vec<f32>) -> Result<(), StoreError> {
        if !self.vec_available {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            conn.execute(
                "DELETE FROM vec_chunks WHERE chunk_id = ?1",
                rusqlite::params![chunk_id],
            )?;
            conn.execute(
                "INSERT INTO vec_chunks (chunk_id, embedding) VALUES (?1, ?2)",
                rusqlite::params![chunk_id, vector_to_json(&embedding)],
            )?;
            Ok(())
        })
        .await?
    }

    /// KNN search over chunk embeddings; returns (chunk_id, distance) pairs
    /// nearest-first.
    pub async fn vec_search(
        &self,
        embedding: Vec<f32>,
        k: usize,
    ) -> Result<Vec<(i64, f64)>, StoreError> {
        if !self.vec_available {
            return Ok(Vec::new());
        }
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::Storage("connection lock poisoned".to_string()))?;
            let mut stmt = conn.prepare(
                "SELECT chunk_id, distance FROM vec_chunks \
                 WHERE embedding MATCH ?1 AND k = ?2 ORDER BY distance",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![vector_to_json(&embedding), k as i64],
                |r| Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?)),
            )?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await?
    }
}
