//! WebSocket gateway: the control plane every channel adapter connects to.
//!
//! One duplex connection per client; messages are [`wire::GatewayMessage`]
//! JSON frames. The gateway resolves sessions, drives the agent, routes
//! approvals back to the requesting session's clients, and broadcasts
//! background-activity events.
//!
//! **Public API**: [`Gateway`], [`GatewayRuntime`], [`run_gateway`],
//! [`run_on_listener`].

mod connection;
mod state;

pub use state::{Gateway, GatewayRuntime};

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use connection::handle_socket;

fn router(gateway: Arc<Gateway>) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(gateway)
}

async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Arc<Gateway>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Runs the gateway on an existing listener. Used by tests (bind to
/// 127.0.0.1:0, then pass the listener). When `once` is true, the server
/// exits after its first connection closes.
pub async fn run_on_listener(
    listener: TcpListener,
    gateway: Arc<Gateway>,
    once: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway listening on ws://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    if once {
        gateway.arm_shutdown(shutdown_tx);
    }

    let app = router(Arc::clone(&gateway));
    if once {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await?;
        info!("connection done, exiting (once mode)");
    } else {
        axum::serve(listener, app).await?;
    }

    // Drain: resolve anything still waiting as denied.
    gateway.shutdown().await;
    Ok(())
}

/// Binds the configured address and runs the gateway until the listener
/// fails.
pub async fn run_gateway(
    gateway: Arc<Gateway>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", gateway.config().host, gateway.config().port);
    let listener = TcpListener::bind(&addr).await?;
    run_on_listener(listener, gateway, false).await
}
