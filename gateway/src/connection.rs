//! Connection lifecycle: per-client writer task, recv loop, and message
//! routing (chat, approval_response, command, status).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use mahout::agent::{RunHooks, StepProgress};
use mahout::tools::{ApprovalFn, ApprovalRequest};
use wire::{EventType, GatewayMessage, MessageType};

use crate::state::{ClientInfo, Gateway};

pub(crate) async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let client_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound path: everything for this client funnels through one queue so
    // event order per client matches publish order.
    let (tx, mut rx) = mpsc::unbounded_channel::<GatewayMessage>();
    gateway.register_client(&client_id, tx);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(Message::Text(msg.to_wire())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    gateway.send_to(
        &client_id,
        &GatewayMessage::status("connected", json!({ "client_id": client_id })),
    );

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "read error (client closed?)");
                break;
            }
        };
        let text = match frame {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let msg = match GatewayMessage::from_wire(&text) {
            Ok(m) => m,
            Err(e) => {
                gateway.send_to(
                    &client_id,
                    &GatewayMessage::error(format!("parse error: {e}"), "", ""),
                );
                continue;
            }
        };
        route_message(&gateway, &client_id, msg).await;
    }

    gateway.drop_client(&client_id);
    writer.abort();
}

async fn route_message(gateway: &Arc<Gateway>, client_id: &str, msg: GatewayMessage) {
    match msg.msg_type {
        MessageType::Chat => handle_chat(gateway, client_id, msg).await,
        MessageType::ApprovalResponse => {
            let approved = msg
                .data
                .get("approved")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !gateway.pending().resolve(&msg.id, approved) {
                debug!(request = %msg.id, "approval response for unknown request");
            }
        }
        MessageType::Command => handle_command(gateway, client_id, msg).await,
        MessageType::Status => {
            gateway.send_to(
                client_id,
                &GatewayMessage::status("ok", json!({ "client_id": client_id })),
            );
        }
        other => {
            gateway.send_to(
                client_id,
                &GatewayMessage::error(format!("unsupported message type: {other:?}"), "", msg.id),
            );
        }
    }
}

/// Chat: resolve the session, run the agent under the session's run lock,
/// reply to the sender, broadcast task_complete to the session's other
/// clients.
async fn handle_chat(gateway: &Arc<Gateway>, client_id: &str, msg: GatewayMessage) {
    let runtime = gateway.runtime();
    let mut info = gateway.client_info(client_id);

    let channel = first_non_empty(&[&msg.channel, &info.channel, "unknown"]);
    let user_id = first_non_empty(&[&msg.user_id, &info.user_id, client_id]);

    // Resolve or create the session.
    let session = if msg.session_id.is_empty() {
        runtime.sessions.get_or_create(&channel, &user_id).await
    } else {
        match runtime.sessions.get(&msg.session_id).await {
            Ok(Some(s)) => Ok(s),
            _ => runtime.sessions.get_or_create(&channel, &user_id).await,
        }
    };
    let session = match session {
        Ok(s) => s,
        Err(e) => {
            gateway.send_to(
                client_id,
                &GatewayMessage::error(format!("session error: {e}"), "", msg.id),
            );
            return;
        }
    };
    let session_id = session.session_id.clone();

    info.channel = channel;
    info.user_id = user_id;
    info.session_id = session_id.clone();
    gateway.update_client(client_id, info);

    if !gateway.subscribe(client_id, &session_id) {
        gateway.send_to(
            client_id,
            &GatewayMessage::error("session limit reached, try again later", session_id.as_str(), msg.id),
        );
        return;
    }

    let content = msg
        .data
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    if content.is_empty() {
        gateway.send_to(client_id, &GatewayMessage::error("empty message", session_id.as_str(), msg.id));
        return;
    }

    // A user is talking: background activities yield.
    if let Some(runner) = &runtime.goal_runner {
        runner.notify_user_interaction();
    }
    if let Some(mind) = &runtime.mind {
        mind.notify_user_interaction();
    }

    let hooks = RunHooks {
        approval: Some(session_approval(gateway, &session_id)),
        on_step: Some(step_broadcaster(gateway, &session_id)),
        ..Default::default()
    };

    // Per-session serialization: a second chat for the same session waits
    // here; other sessions run concurrently.
    let run_lock = runtime.sessions.run_lock(&session_id);
    let _guard = run_lock.lock().await;

    // Re-read inside the lock so concurrent turns see each other's history.
    let mut session = match runtime.sessions.get(&session_id).await {
        Ok(Some(s)) => s,
        _ => session,
    };

    let response = runtime.agent.run_session(&content, &mut session, hooks).await;

    if let Err(e) = runtime.sessions.save(&session).await {
        warn!(error = %e, "failed to persist session");
    }

    gateway.send_to(
        client_id,
        &GatewayMessage::response(session_id.as_str(), response.content.as_str(), true, msg.id.as_str()),
    );

    gateway.broadcast(
        &GatewayMessage::event(
            session_id.as_str(),
            EventType::TaskComplete,
            json!({
                "goal": content.chars().take(100).collect::<String>(),
                "steps": response.steps_taken,
                "tools": response.tool_calls_made,
            }),
        ),
        Some(&session_id),
        Some(client_id),
    );

    if let Some(mind) = &runtime.mind {
        mind.notify_task_complete().await;
    }
}

/// Slash commands with local handlers.
async fn handle_command(gateway: &Arc<Gateway>, client_id: &str, msg: GatewayMessage) {
    let runtime = gateway.runtime();
    let session_id = if msg.session_id.is_empty() {
        gateway.client_info(client_id).session_id
    } else {
        msg.session_id.clone()
    };
    let command = msg.data.get("command").and_then(|v| v.as_str()).unwrap_or("");

    match command {
        "status" => {
            let active = runtime.sessions.list_active(5).await.map(|s| s.len()).unwrap_or(0);
            let body = json!({
                "sessions": active,
                "tracked_sessions": gateway.tracked_sessions(),
                "clients": gateway.client_count(),
                "pending_approvals": gateway.pending_approvals(),
            });
            gateway.send_to(
                client_id,
                &GatewayMessage::response(session_id.as_str(), format!("Status: {body}"), true, msg.id.as_str()),
            );
        }
        "sessions" => {
            let lines = match runtime.sessions.list_active(10).await {
                Ok(sessions) if !sessions.is_empty() => sessions
                    .iter()
                    .map(|s| {
                        format!(
                            "- {}/{} ({}) last active: {}",
                            s.channel,
                            s.user_id,
                            &s.session_id[..8.min(s.session_id.len())],
                            s.last_active.to_rfc3339(),
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                _ => "No active sessions".to_string(),
            };
            gateway.send_to(
                client_id,
                &GatewayMessage::response(session_id.as_str(), format!("Active sessions:\n{lines}"), true, msg.id.as_str()),
            );
        }
        other => {
            gateway.send_to(
                client_id,
                &GatewayMessage::error(format!("unknown command: {other}"), session_id.as_str(), msg.id.clone()),
            );
        }
    }
}

/// Approval callback bound to one session: broadcast to its subscribers and
/// await the decision.
fn session_approval(gateway: &Arc<Gateway>, session_id: &str) -> ApprovalFn {
    let gateway = Arc::clone(gateway);
    let session_id = session_id.to_string();
    let timeout = std::time::Duration::from_secs(gateway.config().approval_timeout_seconds);
    Arc::new(move |req: ApprovalRequest| -> BoxFuture<'static, bool> {
        let gateway = Arc::clone(&gateway);
        let session_id = session_id.clone();
        Box::pin(async move {
            use mahout::bus::EventSink;
            gateway
                .request_approval(
                    Some(&session_id),
                    &req.tool_name,
                    &req.description,
                    req.params,
                    timeout,
                )
                .await
        })
    })
}

/// Step-progress hook: broadcast to the session's subscribers.
fn step_broadcaster(gateway: &Arc<Gateway>, session_id: &str) -> mahout::agent::StepFn {
    let gateway = Arc::clone(gateway);
    let session_id = session_id.to_string();
    Arc::new(move |progress: StepProgress| -> BoxFuture<'static, ()> {
        let gateway = Arc::clone(&gateway);
        let session_id = session_id.clone();
        Box::pin(async move {
            let msg = GatewayMessage::event(
                session_id.as_str(),
                EventType::StepProgress,
                json!({
                    "step": progress.step,
                    "tool_name": progress.tool_name,
                    "thought": progress.thought.chars().take(200).collect::<String>(),
                }),
            );
            gateway.broadcast(&msg, Some(&session_id), None);
        })
    })
}

fn first_non_empty(candidates: &[&str]) -> String {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| c.to_string())
        .unwrap_or_default()
}
