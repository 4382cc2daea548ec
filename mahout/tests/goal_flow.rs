//! Goal decomposition through background completion, with events observed
//! on a recording sink.

mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use mahout::goal::{GoalManager, GoalRunner, GoalStatus};
use mahout::llm::{Completion, ScriptedRouter};
use mahout::tools::ToolRegistry;
use wire::EventType;

use support::{build_agent, RecordingSink};

fn plan_json(n: usize) -> String {
    let items: Vec<Value> = (1..=n)
        .map(|i| {
            json!({
                "order": i,
                "title": format!("Checkpoint {i}"),
                "description": format!("Do part {i} of the work"),
                "success_criteria": format!("Part {i} verifiably done"),
            })
        })
        .collect();
    serde_json::to_string(&items).unwrap()
}

fn fast_goals_config() -> config::GoalsConfig {
    config::GoalsConfig {
        pause_between_checkpoints_seconds: 0,
        max_time_per_checkpoint_seconds: 30,
        ..Default::default()
    }
}

async fn wait_until_idle(runner: &Arc<GoalRunner>) {
    for _ in 0..200 {
        if !runner.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("goal runner did not finish in time");
}

/// **Scenario**: A goal decomposed into three checkpoints runs to
/// completion in the background: the goal ends `completed`, a
/// goal_completed event carries the goal id, and exactly three
/// goal_checkpoint_complete events are broadcast in order.
#[tokio::test]
async fn three_checkpoint_goal_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    // First completion is the plan; everything after (checkpoint runs,
    // summaries, evaluations) falls back to plain text.
    let router = Arc::new(ScriptedRouter::new(vec![Completion::text(plan_json(3))]));
    let registry = Arc::new(ToolRegistry::new());
    let (agent, store) = build_agent(
        router.clone(),
        registry,
        config::AgentConfig::default(),
        &dir,
    );

    let gm = Arc::new(GoalManager::new(store, router, fast_goals_config()));
    let sink = RecordingSink::new();
    let runner = GoalRunner::new(
        Arc::clone(&agent),
        Arc::clone(&gm),
        sink.clone(),
        fast_goals_config(),
        dir.path().join("data"),
    );

    let mut goal = gm.create_goal("Write a short report on X", None).await.unwrap();
    let checkpoints = gm.decompose(&mut goal).await.unwrap();
    assert_eq!(checkpoints.len(), 3);

    assert!(runner.start_goal(&goal.goal_id).await.unwrap());
    // A second start while running is refused.
    assert!(!runner.start_goal(&goal.goal_id).await.unwrap());
    wait_until_idle(&runner).await;

    let finished = gm.get_goal(&goal.goal_id).await.unwrap().unwrap();
    assert_eq!(finished.status, GoalStatus::Completed);
    assert!(gm.get_next_checkpoint(&goal.goal_id).await.unwrap().is_none());

    let started = sink.events_of(EventType::GoalStarted);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0]["goal_id"], json!(goal.goal_id));

    let checkpoint_events = sink.events_of(EventType::GoalCheckpointComplete);
    assert_eq!(checkpoint_events.len(), 3);
    let orders: Vec<i64> = checkpoint_events
        .iter()
        .map(|e| e["checkpoint_order"].as_i64().unwrap())
        .collect();
    assert_eq!(orders, vec![1, 2, 3]);

    let completed = sink.events_of(EventType::GoalCompleted);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["goal_id"], json!(goal.goal_id));
}

/// **Scenario**: notify_user_interaction makes the runner yield after the
/// current checkpoint; the goal pauses and can be resumed to completion.
#[tokio::test]
async fn user_interaction_pauses_then_resume_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let router = Arc::new(ScriptedRouter::new(vec![Completion::text(plan_json(3))]));
    let registry = Arc::new(ToolRegistry::new());
    let (agent, store) = build_agent(
        router.clone(),
        registry,
        config::AgentConfig::default(),
        &dir,
    );

    // A long pause between checkpoints gives us a window to interrupt.
    let slow_config = config::GoalsConfig {
        pause_between_checkpoints_seconds: 1,
        ..fast_goals_config()
    };
    let gm = Arc::new(GoalManager::new(store, router, slow_config.clone()));
    let sink = RecordingSink::new();
    let runner = GoalRunner::new(
        Arc::clone(&agent),
        Arc::clone(&gm),
        sink.clone(),
        slow_config,
        dir.path().join("data"),
    );

    let mut goal = gm.create_goal("long job", None).await.unwrap();
    gm.decompose(&mut goal).await.unwrap();

    assert!(runner.start_goal(&goal.goal_id).await.unwrap());
    tokio::time::sleep(Duration::from_millis(100)).await;
    runner.notify_user_interaction();
    wait_until_idle(&runner).await;

    let paused = gm.get_goal(&goal.goal_id).await.unwrap().unwrap();
    assert_eq!(paused.status, GoalStatus::Paused);
    assert!(!sink.events_of(EventType::GoalPaused).is_empty());

    // Resume picks the goal back up and finishes the remaining checkpoints.
    assert!(runner.resume(&goal.goal_id).await.unwrap());
    wait_until_idle(&runner).await;
    let finished = gm.get_goal(&goal.goal_id).await.unwrap().unwrap();
    assert_eq!(finished.status, GoalStatus::Completed);
    assert!(!sink.events_of(EventType::GoalResumed).is_empty());
}
