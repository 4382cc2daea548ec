//! Durable cron/one-shot scheduler.
//!
//! Tasks persist in `scheduled_tasks`; each execution appends a
//! `schedule_runs` row. A supervised tick loop scans for due tasks, runs
//! their goal through the agent loop, and applies the retry contract:
//! failures increment `retry_count`, and a task whose retries are exhausted
//! is disabled. One-shot (`once@<ISO8601>`) tasks are deleted after their
//! single run regardless of outcome; their run rows remain as history.

pub mod parse;

pub use parse::{next_cron_occurrence, parse_schedule, ParsedSchedule, ScheduleParseError};

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use wire::EventType;

use crate::bus::EventSink;
use crate::store::{Row, Store, StoreError};
use crate::task::Supervised;

const ONCE_PREFIX: &str = "once@";
const RESULT_LIMIT: usize = 5000;
const SUMMARY_LIMIT: usize = 1000;
const ERROR_LIMIT: usize = 2000;

/// Outcome of one executed task goal.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub content: String,
    pub steps_taken: u32,
}

/// Executes a stored task goal (the agent loop in production, a stub in
/// tests).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, goal: &str) -> Result<TaskOutcome, String>;
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Parse(#[from] ScheduleParseError),
    #[error("schedule not found: {0}")]
    NotFound(String),
}

/// One scheduled task definition.
#[derive(Clone, Debug)]
pub struct ScheduleEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cron_expression: String,
    pub task_goal: String,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub next_run_at: Option<String>,
    pub last_status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl ScheduleEntry {
    /// Whether this is a one-shot (`once@`) schedule.
    pub fn is_once(&self) -> bool {
        self.cron_expression.starts_with(ONCE_PREFIX)
    }
}

/// One recorded execution.
#[derive(Clone, Debug)]
pub struct ScheduleRun {
    pub id: i64,
    pub schedule_id: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub steps_taken: i64,
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn row_to_entry(row: &Row) -> ScheduleEntry {
    ScheduleEntry {
        id: row.str("id"),
        name: row.str("name"),
        description: row.str("description"),
        cron_expression: row.str("cron_expression"),
        task_goal: row.str("task_goal"),
        enabled: row.bool("enabled"),
        last_run_at: row.opt_str("last_run_at"),
        next_run_at: row.opt_str("next_run_at"),
        last_status: row.str("last_status"),
        retry_count: row.i64("retry_count") as u32,
        max_retries: row.i64("max_retries") as u32,
        created_at: row.str("created_at"),
        updated_at: row.str("updated_at"),
    }
}

fn row_to_run(row: &Row) -> ScheduleRun {
    ScheduleRun {
        id: row.i64("id"),
        schedule_id: row.str("schedule_id"),
        started_at: row.str("started_at"),
        completed_at: row.opt_str("completed_at"),
        status: row.str("status"),
        result: row.opt_str("result"),
        error: row.opt_str("error"),
        steps_taken: row.i64("steps_taken"),
    }
}

/// Maintains the durable set of scheduled tasks and runs them when due.
pub struct Scheduler {
    store: Store,
    runner: Arc<dyn TaskRunner>,
    sink: Arc<dyn EventSink>,
    config: config::SchedulerConfig,
    tick_task: Mutex<Option<Arc<Supervised>>>,
}

impl Scheduler {
    pub fn new(
        store: Store,
        runner: Arc<dyn TaskRunner>,
        sink: Arc<dyn EventSink>,
        config: config::SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            runner,
            sink,
            config,
            tick_task: Mutex::new(None),
        })
    }

    /// Starts the tick loop. Persisted schedules need no re-registration:
    /// the loop reads due tasks straight from the store.
    pub async fn start(self: &Arc<Self>) -> Result<(), ScheduleError> {
        let schedules = self.list_schedules().await?;
        info!(count = schedules.len(), "scheduler started");

        let scheduler = Arc::clone(self);
        let interval = StdDuration::from_secs(self.config.tick_seconds.max(1));
        let task = Supervised::spawn("scheduler-tick", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(e) = scheduler.tick().await {
                    warn!(error = %e, "scheduler tick failed");
                }
            }
        });
        if let Ok(mut slot) = self.tick_task.lock() {
            *slot = Some(Arc::new(task));
        }
        Ok(())
    }

    /// Stops the tick loop and drains it.
    pub async fn stop(&self) {
        let task = self.tick_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.cancel().await;
        }
    }

    /// Creates a recurring schedule; the cron expression is validated and
    /// `next_run_at` precomputed.
    pub async fn create_schedule(
        &self,
        name: &str,
        task_goal: &str,
        cron_expression: &str,
        description: &str,
        max_retries: u32,
    ) -> Result<ScheduleEntry, ScheduleError> {
        let now = Utc::now();
        let next = next_cron_occurrence(cron_expression, now)?;
        let id = short_id();
        let now_iso = now.to_rfc3339();

        self.store
            .execute_insert(
                "INSERT INTO scheduled_tasks \
                 (id, name, description, cron_expression, task_goal, enabled, next_run_at, \
                  max_retries, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9)",
                vec![
                    json!(id),
                    json!(name),
                    json!(description),
                    json!(cron_expression),
                    json!(task_goal),
                    json!(next.to_rfc3339()),
                    json!(max_retries as i64),
                    json!(now_iso),
                    json!(now_iso),
                ],
            )
            .await?;
        self.get_schedule(&id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id))
    }

    /// Schedules a one-time task at `run_at`.
    pub async fn schedule_once(
        &self,
        name: &str,
        task_goal: &str,
        run_at: DateTime<Utc>,
        description: &str,
    ) -> Result<ScheduleEntry, ScheduleError> {
        let id = short_id();
        let now_iso = Utc::now().to_rfc3339();
        self.store
            .execute_insert(
                "INSERT INTO scheduled_tasks \
                 (id, name, description, cron_expression, task_goal, enabled, next_run_at, \
                  max_retries, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, 1, ?7, ?8)",
                vec![
                    json!(id),
                    json!(name),
                    json!(description),
                    json!(format!("{ONCE_PREFIX}{}", run_at.to_rfc3339())),
                    json!(task_goal),
                    json!(run_at.to_rfc3339()),
                    json!(now_iso),
                    json!(now_iso),
                ],
            )
            .await?;
        self.get_schedule(&id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(id))
    }

    pub async fn enable_schedule(&self, schedule_id: &str) -> Result<(), ScheduleError> {
        // Recompute next_run_at so a long-disabled task doesn't fire for
        // every missed slot.
        let entry = self
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| ScheduleError::NotFound(schedule_id.to_string()))?;
        let next = if entry.is_once() {
            entry.cron_expression[ONCE_PREFIX.len()..].to_string()
        } else {
            next_cron_occurrence(&entry.cron_expression, Utc::now())?.to_rfc3339()
        };
        self.store
            .execute(
                "UPDATE scheduled_tasks SET enabled = 1, next_run_at = ?1, updated_at = ?2 \
                 WHERE id = ?3",
                vec![json!(next), json!(Utc::now().to_rfc3339()), json!(schedule_id)],
            )
            .await?;
        Ok(())
    }

    pub async fn disable_schedule(&self, schedule_id: &str) -> Result<(), ScheduleError> {
        self.store
            .execute(
                "UPDATE scheduled_tasks SET enabled = 0, updated_at = ?1 WHERE id = ?2",
                vec![json!(Utc::now().to_rfc3339()), json!(schedule_id)],
            )
            .await?;
        Ok(())
    }

    pub async fn delete_schedule(&self, schedule_id: &str) -> Result<(), ScheduleError> {
        self.store
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", vec![json!(schedule_id)])
            .await?;
        Ok(())
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleEntry>, ScheduleError> {
        let rows = self
            .store
            .execute("SELECT * FROM scheduled_tasks ORDER BY created_at", vec![])
            .await?;
        Ok(rows.iter().map(row_to_entry).collect())
    }

    pub async fn get_schedule(&self, schedule_id: &str) -> Result<Option<ScheduleEntry>, ScheduleError> {
        let rows = self
            .store
            .execute("SELECT * FROM scheduled_tasks WHERE id = ?1", vec![json!(schedule_id)])
            .await?;
        Ok(rows.first().map(row_to_entry))
    }

    /// Execution history for one schedule, newest first.
    pub async fn get_run_history(
        &self,
        schedule_id: &str,
        limit: usize,
    ) -> Result<Vec<ScheduleRun>, ScheduleError> {
        let rows = self
            .store
            .execute(
                "SELECT * FROM schedule_runs WHERE schedule_id = ?1 \
                 ORDER BY started_at DESC LIMIT ?2",
                vec![json!(schedule_id), json!(limit as i64)],
            )
            .await?;
        Ok(rows.iter().map(row_to_run).collect())
    }

    /// One scan: run every enabled task whose next_run_at has passed.
    pub async fn tick(&self) -> Result<(), ScheduleError> {
        let now = Utc::now();
        let due: Vec<ScheduleEntry> = self
            .list_schedules()
            .await?
            .into_iter()
            .filter(|entry| {
                entry.enabled
                    && entry
                        .next_run_at
                        .as_deref()
                        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                        .map(|t| t.with_timezone(&Utc) <= now)
                        .unwrap_or(false)
            })
            .collect();

        for entry in due {
            self.execute_schedule(&entry.id).await?;
        }
        Ok(())
    }

    /// Runs one schedule now, applying the full execution contract.
    pub async fn execute_schedule(&self, schedule_id: &str) -> Result<(), ScheduleError> {
        let Some(entry) = self.get_schedule(schedule_id).await? else {
            return Err(ScheduleError::NotFound(schedule_id.to_string()));
        };
        if !entry.enabled {
            return Ok(());
        }

        let started = Utc::now().to_rfc3339();
        let run_id = self
            .store
            .execute_insert(
                "INSERT INTO schedule_runs (schedule_id, started_at, status) \
                 VALUES (?1, ?2, 'running')",
                vec![json!(entry.id), json!(started)],
            )
            .await?;

        let outcome = self.runner.run_task(&entry.task_goal).await;
        let completed = Utc::now().to_rfc3339();

        match outcome {
            Ok(result) => {
                self.store
                    .execute(
                        "UPDATE schedule_runs SET completed_at = ?1, status = 'completed', \
                         result = ?2, steps_taken = ?3 WHERE id = ?4",
                        vec![
                            json!(completed),
                            json!(truncate(&result.content, RESULT_LIMIT)),
                            json!(result.steps_taken as i64),
                            json!(run_id),
                        ],
                    )
                    .await?;
                self.store
                    .execute(
                        "UPDATE scheduled_tasks SET last_run_at = ?1, last_status = 'completed', \
                         last_result = ?2, updated_at = ?1 WHERE id = ?3",
                        vec![
                            json!(completed),
                            json!(truncate(&result.content, SUMMARY_LIMIT)),
                            json!(entry.id),
                        ],
                    )
                    .await?;
                info!(schedule = %entry.name, "scheduled task completed");
                self.finish_run(&entry, "completed", Some(&result.content)).await?;
            }
            Err(e) => {
                self.store
                    .execute(
                        "UPDATE schedule_runs SET completed_at = ?1, status = 'failed', error = ?2 \
                         WHERE id = ?3",
                        vec![json!(completed), json!(truncate(&e, ERROR_LIMIT)), json!(run_id)],
                    )
                    .await?;
                self.store
                    .execute(
                        "UPDATE scheduled_tasks SET last_run_at = ?1, last_status = 'failed', \
                         retry_count = retry_count + 1, updated_at = ?1 WHERE id = ?2",
                        vec![json!(completed), json!(entry.id)],
                    )
                    .await?;
                error!(schedule = %entry.name, error = %e, "scheduled task failed");

                if let Some(updated) = self.get_schedule(&entry.id).await? {
                    if updated.retry_count >= updated.max_retries {
                        warn!(schedule = %entry.name, "schedule exceeded max retries, disabling");
                        self.disable_schedule(&entry.id).await?;
                    }
                }
                self.finish_run(&entry, "failed", None).await?;
            }
        }
        Ok(())
    }

    /// Post-run bookkeeping shared by both outcomes: advance or delete the
    /// schedule and broadcast the result notification.
    async fn finish_run(
        &self,
        entry: &ScheduleEntry,
        status: &str,
        result: Option<&str>,
    ) -> Result<(), ScheduleError> {
        if entry.is_once() {
            // One-shot tasks are purged after their run; schedule_runs rows
            // keep the history.
            self.delete_schedule(&entry.id).await?;
        } else if let Ok(next) = next_cron_occurrence(&entry.cron_expression, Utc::now()) {
            self.store
                .execute(
                    "UPDATE scheduled_tasks SET next_run_at = ?1 WHERE id = ?2",
                    vec![json!(next.to_rfc3339()), json!(entry.id)],
                )
                .await?;
        }

        self.sink
            .broadcast_event(
                None,
                EventType::Notification,
                json!({
                    "kind": "scheduled_task",
                    "schedule_id": entry.id,
                    "name": entry.name,
                    "status": status,
                    "result": result.map(|r| truncate(r, 200)),
                }),
            )
            .await;
        Ok(())
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NullSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubRunner {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl TaskRunner for StubRunner {
        async fn run_task(&self, goal: &str) -> Result<TaskOutcome, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("runner exploded".to_string())
            } else {
                Ok(TaskOutcome {
                    content: format!("did: {goal}"),
                    steps_taken: 2,
                })
            }
        }
    }

    async fn scheduler(fail: bool) -> (Arc<Scheduler>, Arc<StubRunner>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let runner = Arc::new(StubRunner {
            calls: AtomicUsize::new(0),
            fail,
        });
        let s = Scheduler::new(
            store,
            runner.clone(),
            Arc::new(NullSink),
            config::SchedulerConfig::default(),
        );
        (s, runner, dir)
    }

    /// **Scenario**: A created schedule validates its cron, persists, and
    /// lists; an invalid expression is rejected with a typed error.
    #[tokio::test]
    async fn create_validates_and_persists() {
        let (s, _r, _dir) = scheduler(false).await;
        let entry = s
            .create_schedule("morning", "check the news", "0 9 * * *", "daily check", 3)
            .await
            .unwrap();
        assert!(entry.enabled);
        assert!(entry.next_run_at.is_some());
        assert_eq!(s.list_schedules().await.unwrap().len(), 1);

        assert!(matches!(
            s.create_schedule("bad", "x", "99 99 * * *", "", 3).await,
            Err(ScheduleError::Parse(_))
        ));
    }

    /// **Scenario**: Executing a schedule records a completed run with the
    /// result and advances next_run_at.
    #[tokio::test]
    async fn execution_records_run_and_advances() {
        let (s, runner, _dir) = scheduler(false).await;
        let entry = s
            .create_schedule("news", "check the news", "*/5 * * * *", "", 3)
            .await
            .unwrap();
        let before_next = entry.next_run_at.clone().unwrap();

        s.execute_schedule(&entry.id).await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        let runs = s.get_run_history(&entry.id, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].result.as_deref(), Some("did: check the news"));
        assert_eq!(runs[0].steps_taken, 2);

        let updated = s.get_schedule(&entry.id).await.unwrap().unwrap();
        assert_eq!(updated.last_status, "completed");
        assert_eq!(updated.retry_count, 0);
        assert!(updated.next_run_at.unwrap() >= before_next);
    }

    /// **Scenario**: Failures increment retry_count; hitting max_retries
    /// disables the task (and only then).
    #[tokio::test]
    async fn failures_disable_after_max_retries() {
        let (s, _r, _dir) = scheduler(true).await;
        let entry = s
            .create_schedule("flaky", "do the thing", "*/5 * * * *", "", 2)
            .await
            .unwrap();

        s.execute_schedule(&entry.id).await.unwrap();
        let after_one = s.get_schedule(&entry.id).await.unwrap().unwrap();
        assert_eq!(after_one.retry_count, 1);
        assert!(after_one.enabled);

        s.execute_schedule(&entry.id).await.unwrap();
        let after_two = s.get_schedule(&entry.id).await.unwrap().unwrap();
        assert_eq!(after_two.retry_count, 2);
        assert!(!after_two.enabled, "disabled once retry_count >= max_retries");

        // Disabled tasks no longer execute.
        s.execute_schedule(&entry.id).await.unwrap();
        assert_eq!(s.get_run_history(&entry.id, 10).await.unwrap().len(), 2);
    }

    /// **Scenario**: One-shot tasks run once via tick when due and are
    /// deleted afterwards, keeping their run history.
    #[tokio::test]
    async fn one_shot_runs_and_purges() {
        let (s, runner, _dir) = scheduler(false).await;
        let entry = s
            .schedule_once("reminder", "ping the user", Utc::now() - chrono::Duration::seconds(1), "")
            .await
            .unwrap();
        assert!(entry.is_once());

        s.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert!(s.get_schedule(&entry.id).await.unwrap().is_none());
        assert_eq!(s.get_run_history(&entry.id, 10).await.unwrap().len(), 1);

        // Nothing due: tick is a no-op.
        s.tick().await.unwrap();
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }
}
