//! Identity: the single evolvable self-description row and its journal.
//!
//! The row id is fixed (`self`); `creator` never changes after creation.
//! Every field change is journaled to `identity_evolution` with trigger,
//! old/new value, reason, and confidence, so the identity's drift stays
//! auditable.

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use crate::store::{Row, Store, StoreError};

const IDENTITY_ID: &str = "self";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("immutable field: {0}")]
    Immutable(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// The agent's self-description.
#[derive(Clone, Debug)]
pub struct Identity {
    pub creator: String,
    pub display_name: String,
    pub purpose: Option<String>,
    pub values: Vec<String>,
    pub beliefs: Value,
    pub curiosities: Vec<String>,
    pub boundaries: Vec<String>,
    pub capabilities: Vec<String>,
    pub personality: Value,
    pub communication_style: String,
    pub version: i64,
}

/// One journal entry.
#[derive(Clone, Debug)]
pub struct EvolutionEntry {
    pub trigger: String,
    pub field_changed: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub reason: String,
    pub confidence: f64,
    pub created_at: String,
}

pub struct IdentityManager {
    store: Store,
}

impl IdentityManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Loads the identity row, creating the default one on first run.
    pub async fn load_or_create(&self) -> Result<Identity, IdentityError> {
        if let Some(identity) = self.get().await? {
            return Ok(identity);
        }
        let now = Utc::now().to_rfc3339();
        self.store
            .execute_insert(
                "INSERT INTO identity (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
                vec![json!(IDENTITY_ID), json!(now), json!(now)],
            )
            .await?;
        info!("created default identity");
        self.get().await?.ok_or_else(|| {
            IdentityError::Store(StoreError::Storage("identity row missing after insert".to_string()))
        })
    }

    pub async fn get(&self) -> Result<Option<Identity>, IdentityError> {
        let rows = self
            .store
            .execute("SELECT * FROM identity WHERE id = ?1", vec![json!(IDENTITY_ID)])
            .await?;
        Ok(rows.first().map(row_to_identity))
    }

    /// Updates one evolvable field and journals the change. `creator` is
    /// immutable; unknown fields are rejected.
    pub async fn update_field(
        &self,
        trigger: &str,
        field: &str,
        new_value: &Value,
        reason: &str,
        confidence: f64,
    ) -> Result<(), IdentityError> {
        if field == "creator" {
            return Err(IdentityError::Immutable(field.to_string()));
        }
        let column = match field {
            "display_name" => "display_name",
            "purpose" => "purpose",
            "values" => "values_json",
            "beliefs" => "beliefs_json",
            "curiosities" => "curiosities_json",
            "boundaries" => "boundaries_json",
            "capabilities" => "capabilities_json",
            "personality" => "personality_json",
            "communication_style" => "communication_style",
            other => return Err(IdentityError::UnknownField(other.to_string())),
        };

        let rows = self
            .store
            .execute(
                &format!("SELECT {column} AS old FROM identity WHERE id = ?1"),
                vec![json!(IDENTITY_ID)],
            )
            .await?;
        let old_value = rows.first().and_then(|r| r.opt_str("old"));

        let stored = match new_value {
            Value::String(s) if !column.ends_with("_json") => s.clone(),
            other => serde_json::to_string(other)?,
        };

        let now = Utc::now().to_rfc3339();
        self.store
            .execute(
                &format!(
                    "UPDATE identity SET {column} = ?1, version = version + 1, updated_at = ?2 \
                     WHERE id = ?3"
                ),
                vec![json!(stored), json!(now), json!(IDENTITY_ID)],
            )
            .await?;
        self.log_evolution(trigger, field, old_value.as_deref(), Some(&stored), reason, confidence)
            .await?;
        Ok(())
    }

    /// Journals a post-task observation without changing any field.
    pub async fn reflect_on_task(
        &self,
        goal: &str,
        outcome: &str,
        tools_used: &[String],
    ) -> Result<(), IdentityError> {
        let detail = format!(
            "goal: {} | outcome: {} | tools: {}",
            truncate(goal, 120),
            truncate(outcome, 200),
            tools_used.join(",")
        );
        self.log_evolution("task_reflection", "none", None, Some(&detail), "post-task reflection", 0.3)
            .await
    }

    /// Structured identity block for the system prompt; empty when no
    /// identity row exists yet.
    pub async fn build_identity_context(&self) -> Result<String, IdentityError> {
        let Some(identity) = self.get().await? else {
            return Ok(String::new());
        };
        let mut parts = vec![
            "<identity>".to_string(),
            format!("  <name>{}</name>", identity.display_name),
        ];
        if let Some(purpose) = &identity.purpose {
            parts.push(format!("  <purpose>{purpose}</purpose>"));
        }
        if !identity.values.is_empty() {
            parts.push(format!("  <values>{}</values>", identity.values.join(", ")));
        }
        if !identity.boundaries.is_empty() {
            parts.push(format!("  <boundaries>{}</boundaries>", identity.boundaries.join(", ")));
        }
        if !identity.communication_style.is_empty() {
            parts.push(format!("  <style>{}</style>", identity.communication_style));
        }
        parts.push("</identity>".to_string());
        Ok(parts.join("\n"))
    }

    /// Recent journal entries, newest first.
    pub async fn evolution_history(&self, limit: usize) -> Result<Vec<EvolutionEntry>, IdentityError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM identity_evolution ORDER BY id DESC LIMIT ?1",
                vec![json!(limit as i64)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|r| EvolutionEntry {
                trigger: r.str("trigger"),
                field_changed: r.str("field_changed"),
                old_value: r.opt_str("old_value"),
                new_value: r.opt_str("new_value"),
                reason: r.str("reason"),
                confidence: r.f64("confidence"),
                created_at: r.str("created_at"),
            })
            .collect())
    }

    async fn log_evolution(
        &self,
        trigger: &str,
        field: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
        reason: &str,
        confidence: f64,
    ) -> Result<(), IdentityError> {
        self.store
            .execute_insert(
                "INSERT INTO identity_evolution \
                 (trigger, field_changed, old_value, new_value, reason, confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                vec![
                    json!(trigger),
                    json!(field),
                    old_value.map(|v| json!(v)).unwrap_or(Value::Null),
                    new_value.map(|v| json!(v)).unwrap_or(Value::Null),
                    json!(reason),
                    json!(confidence),
                    json!(Utc::now().to_rfc3339()),
                ],
            )
            .await?;
        Ok(())
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn row_to_identity(row: &Row) -> Identity {
    Identity {
        creator: row.str("creator"),
        display_name: row.str("display_name"),
        purpose: row.opt_str("purpose"),
        values: serde_json::from_str(&row.str("values_json")).unwrap_or_default(),
        beliefs: serde_json::from_str(&row.str("beliefs_json")).unwrap_or_else(|_| json!({})),
        curiosities: serde_json::from_str(&row.str("curiosities_json")).unwrap_or_default(),
        boundaries: serde_json::from_str(&row.str("boundaries_json")).unwrap_or_default(),
        capabilities: serde_json::from_str(&row.str("capabilities_json")).unwrap_or_default(),
        personality: serde_json::from_str(&row.str("personality_json")).unwrap_or_else(|_| json!({})),
        communication_style: row.str("communication_style"),
        version: row.i64("version"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (IdentityManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        (IdentityManager::new(store), dir)
    }

    /// **Scenario**: load_or_create is idempotent and the creator field is
    /// immutable.
    #[tokio::test]
    async fn create_once_and_protect_creator() {
        let (mgr, _dir) = manager().await;
        let first = mgr.load_or_create().await.unwrap();
        let second = mgr.load_or_create().await.unwrap();
        assert_eq!(first.version, second.version);

        let err = mgr
            .update_field("test", "creator", &json!("someone else"), "takeover", 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Immutable(_)));
    }

    /// **Scenario**: A field update bumps the version and journals old/new
    /// values with the trigger.
    #[tokio::test]
    async fn update_field_journals_change() {
        let (mgr, _dir) = manager().await;
        mgr.load_or_create().await.unwrap();
        mgr.update_field(
            "deep_reflection",
            "values",
            &json!(["curiosity", "honesty"]),
            "observed repeated research tasks",
            0.8,
        )
        .await
        .unwrap();

        let identity = mgr.get().await.unwrap().unwrap();
        assert_eq!(identity.values, vec!["curiosity", "honesty"]);
        assert_eq!(identity.version, 2);

        let history = mgr.evolution_history(5).await.unwrap();
        assert_eq!(history[0].field_changed, "values");
        assert_eq!(history[0].trigger, "deep_reflection");
        assert_eq!(history[0].old_value.as_deref(), Some("[]"));
        assert!((history[0].confidence - 0.8).abs() < 1e-9);
    }

    /// **Scenario**: The identity context renders set fields only.
    #[tokio::test]
    async fn context_block_renders_set_fields() {
        let (mgr, _dir) = manager().await;
        mgr.load_or_create().await.unwrap();
        mgr.update_field("setup", "purpose", &json!("keep the garden growing"), "init", 1.0)
            .await
            .unwrap();
        let ctx = mgr.build_identity_context().await.unwrap();
        assert!(ctx.contains("<purpose>keep the garden growing</purpose>"));
        assert!(!ctx.contains("<boundaries>"));
    }
}
