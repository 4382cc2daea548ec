//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use mahout::bus::EventSink;
use mahout::knowledge::KnowledgeStore;
use mahout::memory::MemoryManager;
use mahout::store::Store;
use mahout::tools::{Executor, ToolContext, ToolRegistry};
use mahout::{Agent, LlmRouter};
use wire::EventType;

/// Sink that records every broadcast and auto-approves approvals.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(Option<String>, EventType, Value)>>,
    pub approvals: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events_of(&self, event: EventType) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e, _)| *e == event)
            .map(|(_, _, d)| d.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn broadcast_event(&self, session_id: Option<&str>, event: EventType, data: Value) {
        self.events
            .lock()
            .unwrap()
            .push((session_id.map(String::from), event, data));
    }

    async fn request_approval(
        &self,
        _session_id: Option<&str>,
        tool_name: &str,
        _description: &str,
        _params: Value,
        _timeout: Duration,
    ) -> bool {
        self.approvals.lock().unwrap().push(tool_name.to_string());
        true
    }
}

/// Builds an agent over a fresh temp store with the given router and
/// registry contents.
pub fn build_agent(
    router: Arc<dyn LlmRouter>,
    registry: Arc<ToolRegistry>,
    agent_config: config::AgentConfig,
    dir: &tempfile::TempDir,
) -> (Arc<Agent>, Store) {
    let store = Store::open(dir.path().join("test.db")).unwrap();
    let executor = Arc::new(Executor::new(
        Arc::clone(&registry),
        agent_config.permission_mode,
        &config::PermissionsConfig::default(),
        ToolContext {
            session_id: None,
            store: Some(store.clone()),
        },
    ));
    let agent = Arc::new(Agent::new(
        router,
        registry,
        executor,
        Arc::new(MemoryManager::new(store.clone())),
        Arc::new(KnowledgeStore::new(store.clone())),
        agent_config,
    ));
    (agent, store)
}
