//! Event sink: how core components reach connected clients without
//! depending on the gateway crate.
//!
//! The gateway implements [`EventSink`] over its client registry; background
//! activities (scheduler, goal runner, mind, swarm, email monitor) hold an
//! `Arc<dyn EventSink>` and stay ignorant of sockets. [`NullSink`] stands in
//! when no gateway is attached: events go to the log and approvals
//! auto-approve, matching headless autonomous operation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use wire::EventType;

/// Outbound side of the gateway as seen from the core.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Broadcasts an event: to one session's subscribers when `session_id`
    /// is set, to every client otherwise. Delivery is best-effort.
    async fn broadcast_event(&self, session_id: Option<&str>, event: EventType, data: Value);

    /// Publishes an approval request to subscribed clients and awaits the
    /// decision; resolves as denied on timeout.
    async fn request_approval(
        &self,
        session_id: Option<&str>,
        tool_name: &str,
        description: &str,
        params: Value,
        timeout: Duration,
    ) -> bool;
}

/// Sink for headless operation: logs events, auto-approves.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn broadcast_event(&self, session_id: Option<&str>, event: EventType, data: Value) {
        info!(event = %event, session = session_id.unwrap_or(""), %data, "event (no gateway)");
    }

    async fn request_approval(
        &self,
        _session_id: Option<&str>,
        tool_name: &str,
        _description: &str,
        _params: Value,
        _timeout: Duration,
    ) -> bool {
        info!(tool = tool_name, "no gateway attached, auto-approving");
        true
    }
}
