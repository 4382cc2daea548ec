//! Gateway state: client registry, session subscriptions, pending
//! approvals, and the EventSink the background activities publish through.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use mahout::approval::{ApprovalQueue, PendingApprovals};
use mahout::bus::EventSink;
use mahout::{Agent, AutonomousMind, GoalRunner, SessionManager};
use wire::{EventType, GatewayMessage};

/// Everything the gateway drives, wired at startup.
pub struct GatewayRuntime {
    pub sessions: Arc<SessionManager>,
    pub agent: Arc<Agent>,
    pub goal_runner: Option<Arc<GoalRunner>>,
    pub mind: Option<Arc<AutonomousMind>>,
    /// Persistent approval history; live waits go through the registry.
    pub approval_queue: Option<Arc<ApprovalQueue>>,
    pub config: config::GatewayConfig,
}

/// One connected channel adapter.
#[derive(Clone, Debug, Default)]
pub(crate) struct ClientInfo {
    pub channel: String,
    pub user_id: String,
    pub session_id: String,
}

/// The control plane shared by all connections.
pub struct Gateway {
    runtime: GatewayRuntime,
    clients: Mutex<HashMap<String, (ClientInfo, mpsc::UnboundedSender<GatewayMessage>)>>,
    /// session_id → subscribed client ids.
    session_clients: Mutex<HashMap<String, HashSet<String>>>,
    pending: PendingApprovals,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Gateway {
    pub fn new(runtime: GatewayRuntime) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            clients: Mutex::new(HashMap::new()),
            session_clients: Mutex::new(HashMap::new()),
            pending: PendingApprovals::new(),
            shutdown_tx: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &config::GatewayConfig {
        &self.runtime.config
    }

    pub(crate) fn runtime(&self) -> &GatewayRuntime {
        &self.runtime
    }

    pub(crate) fn pending(&self) -> &PendingApprovals {
        &self.pending
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn pending_approvals(&self) -> usize {
        self.pending.len()
    }

    // --- Connection registry ------------------------------------------------

    pub(crate) fn register_client(
        &self,
        client_id: &str,
        tx: mpsc::UnboundedSender<GatewayMessage>,
    ) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.insert(client_id.to_string(), (ClientInfo::default(), tx));
        }
        info!(client = %short(client_id), "client connected");
    }

    pub(crate) fn drop_client(&self, client_id: &str) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(client_id);
        }
        if let Ok(mut subs) = self.session_clients.lock() {
            for clients in subs.values_mut() {
                clients.remove(client_id);
            }
            subs.retain(|_, clients| !clients.is_empty());
        }
        info!(client = %short(client_id), "client disconnected");

        // Once mode: the first connection to close shuts the server down.
        let tx = self.shutdown_tx.lock().ok().and_then(|mut t| t.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
    }

    pub(crate) fn client_info(&self, client_id: &str) -> ClientInfo {
        self.clients
            .lock()
            .ok()
            .and_then(|c| c.get(client_id).map(|(info, _)| info.clone()))
            .unwrap_or_default()
    }

    pub(crate) fn update_client(&self, client_id: &str, info: ClientInfo) {
        if let Ok(mut clients) = self.clients.lock() {
            if let Some((slot, _)) = clients.get_mut(client_id) {
                *slot = info;
            }
        }
    }

    /// Subscribes a client to a session's event stream. Fails when the soft
    /// session cap would be exceeded by a new session.
    pub(crate) fn subscribe(&self, client_id: &str, session_id: &str) -> bool {
        let Ok(mut subs) = self.session_clients.lock() else {
            return false;
        };
        if !subs.contains_key(session_id) && subs.len() >= self.runtime.config.max_sessions {
            return false;
        }
        subs.entry(session_id.to_string())
            .or_default()
            .insert(client_id.to_string());
        true
    }

    pub(crate) fn tracked_sessions(&self) -> usize {
        self.session_clients.lock().map(|s| s.len()).unwrap_or(0)
    }

    // --- Delivery -----------------------------------------------------------

    /// Sends one message to one client; best-effort.
    pub(crate) fn send_to(&self, client_id: &str, msg: &GatewayMessage) {
        let tx = self
            .clients
            .lock()
            .ok()
            .and_then(|c| c.get(client_id).map(|(_, tx)| tx.clone()));
        if let Some(tx) = tx {
            if tx.send(msg.clone()).is_err() {
                debug!(client = %short(client_id), "send failed (client gone)");
            }
        }
    }

    /// Sends to all clients, or to one session's subscribers, optionally
    /// excluding the originator. Best-effort per client.
    pub(crate) fn broadcast(
        &self,
        msg: &GatewayMessage,
        session_id: Option<&str>,
        exclude_client: Option<&str>,
    ) {
        let targets: Vec<String> = match session_id {
            Some(sid) => self
                .session_clients
                .lock()
                .map(|subs| subs.get(sid).map(|c| c.iter().cloned().collect()).unwrap_or_default())
                .unwrap_or_default(),
            None => self
                .clients
                .lock()
                .map(|c| c.keys().cloned().collect())
                .unwrap_or_default(),
        };
        for cid in targets {
            if Some(cid.as_str()) == exclude_client {
                continue;
            }
            self.send_to(&cid, msg);
        }
    }

    // --- Shutdown -----------------------------------------------------------

    pub(crate) fn arm_shutdown(&self, tx: oneshot::Sender<()>) {
        if let Ok(mut slot) = self.shutdown_tx.lock() {
            *slot = Some(tx);
        }
    }

    /// Resolves all pending approvals as denied.
    pub async fn shutdown(&self) {
        self.pending.deny_all();
        info!("gateway shut down, pending approvals denied");
    }
}

#[async_trait]
impl EventSink for Gateway {
    async fn broadcast_event(&self, session_id: Option<&str>, event: EventType, data: Value) {
        let msg = GatewayMessage::event(session_id.unwrap_or(""), event, data);
        self.broadcast(&msg, session_id, None);
    }

    async fn request_approval(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        description: &str,
        params: Value,
        timeout: Duration,
    ) -> bool {
        if self.pending.len() >= self.runtime.config.max_pending_approvals {
            warn!(tool = tool_name, "approval cap reached, denying");
            return false;
        }

        let msg = GatewayMessage::approval_request(
            session_id.unwrap_or(""),
            tool_name,
            description,
            params.clone(),
        );
        let request_id = msg.id.clone();
        let rx = self.pending.register(&request_id);

        // Durable record; resolved below once the decision lands.
        let record_id = match &self.runtime.approval_queue {
            Some(queue) => queue.enqueue(tool_name, description, &params).await.ok(),
            None => None,
        };

        self.broadcast(&msg, session_id, None);

        let approved = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(tool = tool_name, "approval timed out, denying");
                self.pending.remove(&request_id);
                false
            }
        };

        if let (Some(queue), Some(id)) = (&self.runtime.approval_queue, record_id) {
            let _ = queue.resolve(id, approved).await;
        }
        approved
    }
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}
