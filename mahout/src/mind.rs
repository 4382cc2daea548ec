//! Autonomous mind: a purpose-driven background loop between user
//! interactions.
//!
//! Each wakeup cycle builds a prompt from the priority stack, the persisted
//! scratchpad, injected events, and budget figures, then runs the agent
//! loop on a detached history under a per-cycle timeout. The loop pauses on
//! user interaction, resumes on task completion, and backs off
//! geometrically when its share of the daily LLM budget is spent.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{error, info, warn};
use wire::EventType;

use crate::agent::{Agent, RunHooks};
use crate::bus::EventSink;
use crate::task::Supervised;
use crate::tools::{ApprovalFn, ApprovalRequest, ToolHookFn};

const WARMUP_SECONDS: f64 = 10.0;
const MAX_PENDING_EVENTS: usize = 20;
const MAX_RECENT_ACTIONS: usize = 50;
const SCRATCHPAD_PROMPT_LIMIT: usize = 6000;
const MIND_APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

const MIND_PROMPT: &str = "\
You are running in autonomous mode. You are not reflecting; you are working.

RULES:
1. Every wakeup must produce value. If nothing needs doing, sleep longer.
2. Active goals come first, then revenue work that funds your existence.
3. Never message the owner unless it matters. Silence is professionalism.
4. Update your scratchpad with what you did and what's next via update_scratchpad.
5. Set your next wakeup based on urgency using set_next_wakeup. Don't waste compute.
6. You have {max_rounds} tool rounds. Use them efficiently.
7. If a task needs more than {max_rounds} rounds, create a goal for it.

PRIORITY STACK:
{priority_stack}

SCRATCHPAD (your working memory, update it before finishing):
{scratchpad}

RECENT EVENTS:
{events}

BUDGET: ${budget_remaining} remaining (${budget_spent} spent today)
LAST WAKEUP: {last_wakeup} ({last_action})
UTC NOW: {utc_now}

What is the highest-value action right now? Do it.";

const PRIORITY_STACK: &str = "\
1. Active goals: resume any pending checkpoint
2. Revenue: find and execute on money-making opportunities
3. Pending tasks: self-scheduled work from previous cycles
4. Capability gaps: build tools you've needed
5. Knowledge maintenance: re-index, update stale info
6. Opportunity scanning: search for new work";

// --- Scratchpad and action log files ---------------------------------------

pub(crate) fn scratchpad_path(data_dir: &Path) -> PathBuf {
    data_dir.join("scratchpad.md")
}

fn actions_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("mind_actions.log")
}

pub fn read_scratchpad(data_dir: &Path) -> String {
    std::fs::read_to_string(scratchpad_path(data_dir)).unwrap_or_default()
}

pub fn write_scratchpad(data_dir: &Path, content: &str) -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    std::fs::write(scratchpad_path(data_dir), content)
}

pub(crate) fn clear_scratchpad(data_dir: &Path) {
    let path = scratchpad_path(data_dir);
    if path.exists() {
        if let Err(e) = std::fs::write(&path, "") {
            warn!(error = %e, "failed to clear scratchpad");
        } else {
            info!("scratchpad cleared");
        }
    }
}

fn append_action_log(data_dir: &Path, entry: &str) {
    use std::io::Write;
    if std::fs::create_dir_all(data_dir).is_err() {
        return;
    }
    let ts = Utc::now().format("%H:%M");
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(actions_log_path(data_dir))
    {
        let _ = writeln!(file, "{ts}  {entry}");
    }
}

// --- Shared state -----------------------------------------------------------

#[derive(Clone, Debug)]
struct ActionEntry {
    ts: String,
    summary: String,
}

struct MindShared {
    next_wakeup_secs: Mutex<f64>,
    max_wakeup_secs: f64,
    paused: AtomicBool,
    pending_events: Mutex<Vec<String>>,
    spent_today_usd: Mutex<f64>,
    budget_reset_date: Mutex<String>,
    last_action: Mutex<String>,
    last_wakeup: Mutex<String>,
    recent_actions: Mutex<Vec<ActionEntry>>,
    cycle_count: AtomicU64,
    wake: tokio::sync::Notify,
}

/// Handle given to the mind's own tools and to external event injectors.
#[derive(Clone)]
pub struct MindHandle {
    shared: Arc<MindShared>,
    data_dir: PathBuf,
}

impl MindHandle {
    /// Sets the next wakeup interval, clamped to [10s, max_wakeup_seconds].
    pub fn set_next_wakeup(&self, seconds: f64) -> f64 {
        let clamped = seconds.clamp(WARMUP_SECONDS, self.shared.max_wakeup_secs);
        if let Ok(mut next) = self.shared.next_wakeup_secs.lock() {
            *next = clamped;
        }
        clamped
    }

    /// Rewrites the persisted scratchpad.
    pub fn update_scratchpad(&self, content: &str) -> std::io::Result<()> {
        write_scratchpad(&self.data_dir, content)
    }

    /// Pushes an external event for the mind to see next cycle (bounded).
    pub fn inject_event(&self, text: &str) {
        if let Ok(mut events) = self.shared.pending_events.lock() {
            events.push(text.to_string());
            let len = events.len();
            if len > MAX_PENDING_EVENTS {
                events.drain(..len - MAX_PENDING_EVENTS);
            }
        }
    }
}

/// Outcome of one wakeup evaluation, mostly for tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Paused,
    BudgetExhausted,
    Ran,
}

/// The autonomous mind loop.
pub struct AutonomousMind {
    agent: Arc<Agent>,
    sink: Arc<dyn EventSink>,
    config: config::MindConfig,
    budget: config::LlmBudgetConfig,
    data_dir: PathBuf,
    shared: Arc<MindShared>,
    task: Mutex<Option<Arc<Supervised>>>,
}

impl AutonomousMind {
    /// Builds the mind and registers its tools (`set_next_wakeup`,
    /// `update_scratchpad`) in the agent's registry.
    pub fn new(
        agent: Arc<Agent>,
        sink: Arc<dyn EventSink>,
        config: config::MindConfig,
        budget: config::LlmBudgetConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let data_dir = data_dir.into();
        let shared = Arc::new(MindShared {
            next_wakeup_secs: Mutex::new(config.wakeup_seconds as f64),
            max_wakeup_secs: config.max_wakeup_seconds as f64,
            paused: AtomicBool::new(false),
            pending_events: Mutex::new(Vec::new()),
            spent_today_usd: Mutex::new(0.0),
            budget_reset_date: Mutex::new(String::new()),
            last_action: Mutex::new("(not started)".to_string()),
            last_wakeup: Mutex::new("never".to_string()),
            recent_actions: Mutex::new(Vec::new()),
            cycle_count: AtomicU64::new(0),
            wake: tokio::sync::Notify::new(),
        });

        let mind = Arc::new(Self {
            agent,
            sink,
            config,
            budget,
            data_dir,
            shared,
            task: Mutex::new(None),
        });

        let handle = mind.handle();
        mind.agent
            .registry()
            .register(Arc::new(crate::tools::mind::SetNextWakeupTool::new(handle.clone())));
        mind.agent
            .registry()
            .register(Arc::new(crate::tools::mind::UpdateScratchpadTool::new(handle)));
        mind
    }

    pub fn handle(&self) -> MindHandle {
        MindHandle {
            shared: Arc::clone(&self.shared),
            data_dir: self.data_dir.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .ok()
            .and_then(|t| t.as_ref().map(|t| t.is_running()))
            .unwrap_or(false)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Launches the background loop; first wakeup after a short warmup.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_running() {
            warn!("autonomous mind already running");
            return false;
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        if let Ok(mut next) = self.shared.next_wakeup_secs.lock() {
            *next = WARMUP_SECONDS;
        }

        let mind = Arc::clone(self);
        let task = Supervised::spawn("autonomous-mind", move |token| async move {
            mind.run_loop(token).await;
        });
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(Arc::new(task));
        }
        info!(
            warmup = WARMUP_SECONDS,
            interval = self.config.wakeup_seconds,
            "autonomous mind started"
        );
        true
    }

    /// Starts on process startup when enabled.
    pub async fn resume_on_startup(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        info!("starting autonomous mind on startup");
        self.start();
    }

    pub async fn cancel(&self) {
        self.shared.wake.notify_one();
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.cancel().await;
        }
    }

    /// Pauses thinking while the user is interacting.
    pub fn notify_user_interaction(&self) {
        if self.is_running() && !self.is_paused() {
            info!("user interaction, pausing autonomous mind");
            self.shared.paused.store(true, Ordering::SeqCst);
        }
    }

    /// Resumes after a user task completes and wakes the loop immediately.
    pub async fn notify_task_complete(&self) {
        if !self.is_running() || !self.is_paused() {
            return;
        }
        info!("user task complete, resuming autonomous mind");
        self.shared.paused.store(false, Ordering::SeqCst);
        let pending = self.shared.pending_events.lock().map(|e| e.len()).unwrap_or(0);
        self.sink
            .broadcast_event(
                None,
                EventType::MindResumed,
                json!({ "pending_events": pending }),
            )
            .await;
        self.shared.wake.notify_one();
    }

    /// Pushes an external event for the next cycle.
    pub fn inject_event(&self, text: &str) {
        self.handle().inject_event(text);
    }

    /// Current state snapshot for status commands.
    pub fn status(&self) -> serde_json::Value {
        let daily = self.daily_budget();
        let spent = self.shared.spent_today_usd.lock().map(|s| *s).unwrap_or(0.0);
        let recent: Vec<serde_json::Value> = self
            .shared
            .recent_actions
            .lock()
            .map(|actions| {
                actions
                    .iter()
                    .rev()
                    .take(10)
                    .map(|a| json!({ "ts": a.ts, "summary": a.summary }))
                    .collect()
            })
            .unwrap_or_default();
        json!({
            "running": self.is_running(),
            "paused": self.is_paused(),
            "cycle_count": self.shared.cycle_count.load(Ordering::SeqCst),
            "next_wakeup_sec": self.shared.next_wakeup_secs.lock().map(|n| *n).unwrap_or(0.0),
            "last_wakeup": self.shared.last_wakeup.lock().map(|l| l.clone()).unwrap_or_default(),
            "last_action": self.shared.last_action.lock().map(|l| l.clone()).unwrap_or_default(),
            "budget_spent": spent,
            "budget_total": daily,
            "budget_remaining": (daily - spent).max(0.0),
            "pending_events": self.shared.pending_events.lock().map(|e| e.len()).unwrap_or(0),
            "recent_actions": recent,
            "scratchpad": read_scratchpad(&self.data_dir).chars().take(2000).collect::<String>(),
        })
    }

    async fn run_loop(self: Arc<Self>, token: tokio_util::sync::CancellationToken) {
        loop {
            let wait = self
                .shared
                .next_wakeup_secs
                .lock()
                .map(|n| *n)
                .unwrap_or(self.config.wakeup_seconds as f64);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs_f64(wait)) => {}
            }
            if token.is_cancelled() {
                break;
            }
            self.cycle().await;
        }
    }

    /// One wakeup evaluation: skip while paused, back off when the daily
    /// mind budget is spent, otherwise think.
    pub(crate) async fn cycle(&self) -> CycleOutcome {
        if self.is_paused() {
            let last = self.shared.last_action.lock().map(|l| l.clone()).unwrap_or_default();
            self.sink
                .broadcast_event(None, EventType::MindPaused, json!({ "will_resume": last }))
                .await;
            return CycleOutcome::Paused;
        }

        if !self.check_budget() {
            let next = self.backoff(2.0);
            info!(next_wakeup = next as u64, "mind budget exhausted, sleeping");
            return CycleOutcome::BudgetExhausted;
        }

        match self.think().await {
            Ok(()) => {
                let cycles = self.shared.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
                // After the warmup cycle, restore the configured interval
                // unless the LLM already chose one.
                if cycles == 1 {
                    if let Ok(mut next) = self.shared.next_wakeup_secs.lock() {
                        if *next <= WARMUP_SECONDS {
                            *next = self.config.wakeup_seconds as f64;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "mind think cycle error");
                self.sink
                    .broadcast_event(
                        None,
                        EventType::MindError,
                        json!({
                            "error": e.chars().take(200).collect::<String>(),
                            "recovery": "will retry next cycle",
                        }),
                    )
                    .await;
                self.backoff(1.5);
            }
        }
        CycleOutcome::Ran
    }

    /// One think cycle: build context, run the agent, broadcast results.
    async fn think(&self) -> Result<(), String> {
        if let Ok(mut last) = self.shared.last_wakeup.lock() {
            *last = Utc::now().format("%H:%M UTC").to_string();
        }
        let cycle_start = Instant::now();
        let prompt = self.build_prompt();

        let daily = self.daily_budget();
        let spent = self.shared.spent_today_usd.lock().map(|s| *s).unwrap_or(0.0);
        let scratchpad_preview: String = read_scratchpad(&self.data_dir)
            .chars()
            .take(200)
            .collect::<String>()
            .trim()
            .to_string();
        let cycles = self.shared.cycle_count.load(Ordering::SeqCst);
        self.sink
            .broadcast_event(
                None,
                EventType::MindWakeup,
                json!({
                    "cycle": cycles + 1,
                    "budget_remaining": format!("${:.4}", (daily - spent).max(0.0)),
                    "budget_total": format!("${daily:.4}"),
                    "scratchpad_preview": if scratchpad_preview.is_empty() {
                        "(empty)".to_string()
                    } else {
                        scratchpad_preview
                    },
                    "last_action": self.shared.last_action.lock().map(|l| l.clone()).unwrap_or_default(),
                    "total_cycles_today": cycles,
                }),
            )
            .await;

        let tool_uses = Arc::new(Mutex::new(Vec::<String>::new()));
        let hooks = RunHooks {
            approval: Some(self.mind_approval()),
            on_tool: Some(self.mind_tool_hook(Arc::clone(&tool_uses))),
            ..Default::default()
        };

        let run = tokio::time::timeout(
            Duration::from_secs(self.config.cycle_timeout_seconds),
            self.agent.run_detached(&prompt, hooks),
        )
        .await;

        let response = match run {
            Ok(r) => r,
            Err(_) => {
                if let Ok(mut last) = self.shared.last_action.lock() {
                    *last = "(timed out)".to_string();
                }
                return Err(format!(
                    "think cycle timed out ({}s)",
                    self.config.cycle_timeout_seconds
                ));
            }
        };

        let cost = self.agent.router().cost_tracker().task_cost();
        if let Ok(mut spent) = self.shared.spent_today_usd.lock() {
            *spent += cost;
        }

        let content: String = response.content.chars().take(500).collect();
        let action_summary: String = if content.is_empty() {
            "(no output)".to_string()
        } else {
            content.lines().next().unwrap_or("").chars().take(120).collect()
        };
        if let Ok(mut last) = self.shared.last_action.lock() {
            *last = action_summary.clone();
        }
        if let Ok(mut recent) = self.shared.recent_actions.lock() {
            recent.push(ActionEntry {
                ts: Utc::now().format("%H:%M").to_string(),
                summary: action_summary.clone(),
            });
            let len = recent.len();
            if len > MAX_RECENT_ACTIONS {
                recent.drain(..len - MAX_RECENT_ACTIONS);
            }
        }
        append_action_log(&self.data_dir, &action_summary);

        let elapsed = cycle_start.elapsed().as_secs_f64();
        let used = tool_uses.lock().map(|t| t.clone()).unwrap_or_default();
        let daily = self.daily_budget();
        let spent = self.shared.spent_today_usd.lock().map(|s| *s).unwrap_or(0.0);
        self.sink
            .broadcast_event(
                None,
                EventType::MindAction,
                json!({
                    "summary": action_summary,
                    "cost": format!("${cost:.4}"),
                    "elapsed": format!("{elapsed:.1}s"),
                    "tools_used": used,
                    "tool_count": used.len(),
                }),
            )
            .await;
        self.sink
            .broadcast_event(
                None,
                EventType::MindSleep,
                json!({
                    "next_wakeup_seconds": self
                        .shared
                        .next_wakeup_secs
                        .lock()
                        .map(|n| *n as u64)
                        .unwrap_or(0),
                    "cycle_cost": format!("${cost:.4}"),
                    "total_spent": format!("${spent:.4}"),
                    "budget_remaining": format!("${:.4}", (daily - spent).max(0.0)),
                    "tools_used": used.len(),
                }),
            )
            .await;
        Ok(())
    }

    fn build_prompt(&self) -> String {
        let scratchpad = {
            let raw = read_scratchpad(&self.data_dir);
            if raw.is_empty() {
                "(empty; initialize your working memory)".to_string()
            } else {
                raw.chars().take(SCRATCHPAD_PROMPT_LIMIT).collect()
            }
        };

        // Drain pending events on read.
        let events_text = {
            let drained: Vec<String> = self
                .shared
                .pending_events
                .lock()
                .map(|mut events| events.drain(..).collect())
                .unwrap_or_default();
            if drained.is_empty() {
                "(none)".to_string()
            } else {
                drained
                    .iter()
                    .rev()
                    .take(10)
                    .rev()
                    .map(|e| format!("- {e}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        let daily = self.daily_budget();
        let spent = self.shared.spent_today_usd.lock().map(|s| *s).unwrap_or(0.0);
        MIND_PROMPT
            .replace("{max_rounds}", &self.config.max_rounds_per_wakeup.to_string())
            .replace("{priority_stack}", PRIORITY_STACK)
            .replace("{scratchpad}", &scratchpad)
            .replace("{events}", &events_text)
            .replace("{budget_remaining}", &format!("{:.4}", (daily - spent).max(0.0)))
            .replace("{budget_spent}", &format!("{spent:.4}"))
            .replace(
                "{last_wakeup}",
                &self.shared.last_wakeup.lock().map(|l| l.clone()).unwrap_or_default(),
            )
            .replace(
                "{last_action}",
                &self.shared.last_action.lock().map(|l| l.clone()).unwrap_or_default(),
            )
            .replace("{utc_now}", &Utc::now().format("%Y-%m-%d %H:%M UTC").to_string())
    }

    fn daily_budget(&self) -> f64 {
        self.budget.daily_limit_usd * (self.config.budget_pct / 100.0)
    }

    /// True while today's mind spend is under its budget share; resets the
    /// tally on date change.
    fn check_budget(&self) -> bool {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if let Ok(mut reset_date) = self.shared.budget_reset_date.lock() {
            if *reset_date != today {
                *reset_date = today;
                if let Ok(mut spent) = self.shared.spent_today_usd.lock() {
                    *spent = 0.0;
                }
            }
        }
        let spent = self.shared.spent_today_usd.lock().map(|s| *s).unwrap_or(0.0);
        spent < self.daily_budget()
    }

    fn backoff(&self, factor: f64) -> f64 {
        let mut next = self.config.wakeup_seconds as f64;
        if let Ok(mut slot) = self.shared.next_wakeup_secs.lock() {
            *slot = (*slot * factor).min(self.shared.max_wakeup_secs);
            next = *slot;
        }
        next
    }

    /// Approval policy for autonomous cycles: broadcast for visibility with
    /// a shorter timeout; headless sinks auto-approve.
    fn mind_approval(&self) -> ApprovalFn {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |req: ApprovalRequest| -> BoxFuture<'static, bool> {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.request_approval(
                    None,
                    &req.tool_name,
                    &format!("[Mind] {}", req.description),
                    req.params,
                    MIND_APPROVAL_TIMEOUT,
                )
                .await
            })
        })
    }

    /// Tool hook broadcasting mind_tool_use events in real time.
    fn mind_tool_hook(&self, tool_uses: Arc<Mutex<Vec<String>>>) -> ToolHookFn {
        let sink = Arc::clone(&self.sink);
        Arc::new(move |name: &str, params: &serde_json::Value, error: Option<&str>| {
            if let Ok(mut uses) = tool_uses.lock() {
                uses.push(name.to_string());
            }
            let param_str = params
                .as_object()
                .map(|obj| {
                    obj.iter()
                        .take(3)
                        .map(|(k, v)| {
                            let sv = v.to_string();
                            let clipped: String = sv.chars().take(60).collect();
                            format!("{k}={clipped}")
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let payload = json!({
                "tool": name,
                "params": param_str,
                "status": if error.is_some() { "error" } else { "ok" },
                "error": error.unwrap_or(""),
            });
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                sink.broadcast_event(None, EventType::MindToolUse, payload).await;
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NullSink;
    use crate::knowledge::KnowledgeStore;
    use crate::llm::ScriptedRouter;
    use crate::memory::MemoryManager;
    use crate::store::Store;
    use crate::tools::{Executor, ToolContext, ToolRegistry};

    fn build_mind(cost_per_call: f64, dir: &tempfile::TempDir) -> (Arc<AutonomousMind>, Arc<ScriptedRouter>) {
        let store = Store::open(dir.path().join("t.db")).unwrap();
        let router = Arc::new(ScriptedRouter::always_text("scanned the queue").with_cost_per_call(cost_per_call));
        let registry = Arc::new(ToolRegistry::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            config::PermissionMode::SmartAuto,
            &config::PermissionsConfig::default(),
            ToolContext::default(),
        ));
        let agent = Arc::new(Agent::new(
            router.clone(),
            registry,
            executor,
            Arc::new(MemoryManager::new(store.clone())),
            Arc::new(KnowledgeStore::new(store)),
            config::AgentConfig::default(),
        ));
        let mind_config = config::MindConfig {
            enabled: true,
            wakeup_seconds: 60,
            max_wakeup_seconds: 240,
            budget_pct: 10.0,
            max_rounds_per_wakeup: 5,
            cycle_timeout_seconds: 30,
        };
        let budget = config::LlmBudgetConfig { daily_limit_usd: 1.0 };
        let mind = AutonomousMind::new(agent, Arc::new(NullSink), mind_config, budget, dir.path().join("data"));
        (mind, router)
    }

    /// **Scenario**: With a $1.00 daily cap and 10% mind share, cycles run
    /// until the tally passes $0.10, then the next wakeup doubles (up to the
    /// ceiling) and no further LLM call is issued.
    #[tokio::test]
    async fn budget_backoff_doubles_and_stops_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (mind, router) = build_mind(0.06, &dir);

        assert_eq!(mind.cycle().await, CycleOutcome::Ran);
        assert_eq!(mind.cycle().await, CycleOutcome::Ran);
        let calls_after_two = router.calls();
        assert!(calls_after_two >= 2);

        // Tally is now 0.12 > 0.10: budget gate trips before any LLM call.
        assert_eq!(mind.cycle().await, CycleOutcome::BudgetExhausted);
        assert_eq!(router.calls(), calls_after_two);
        let next = mind.status()["next_wakeup_sec"].as_f64().unwrap();
        assert!((next - 120.0).abs() < 1e-6, "60s doubled to 120s, got {next}");

        // Repeated exhaustion keeps doubling up to the ceiling.
        mind.cycle().await;
        mind.cycle().await;
        let capped = mind.status()["next_wakeup_sec"].as_f64().unwrap();
        assert!((capped - 240.0).abs() < 1e-6, "capped at max, got {capped}");
    }

    /// **Scenario**: A paused mind emits mind_paused and issues no LLM call;
    /// resume wakes it again.
    #[tokio::test]
    async fn paused_cycles_skip_thinking() {
        let dir = tempfile::tempdir().unwrap();
        let (mind, router) = build_mind(0.0, &dir);
        mind.shared.paused.store(true, Ordering::SeqCst);
        assert_eq!(mind.cycle().await, CycleOutcome::Paused);
        assert_eq!(router.calls(), 0);
    }

    /// **Scenario**: Injected events appear in the next prompt and are
    /// drained on read; the scratchpad tool persists content.
    #[tokio::test]
    async fn events_drain_and_scratchpad_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mind, _router) = build_mind(0.0, &dir);
        mind.inject_event("new email from the accountant");

        let prompt = mind.build_prompt();
        assert!(prompt.contains("- new email from the accountant"));
        let second = mind.build_prompt();
        assert!(second.contains("(none)"), "events drained on read");

        let handle = mind.handle();
        handle.update_scratchpad("## plan\n- follow up").unwrap();
        assert!(mind.build_prompt().contains("## plan"));
        assert_eq!(handle.set_next_wakeup(10_000.0), 240.0);
    }
}
