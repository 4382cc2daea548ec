//! Named supervised background tasks.
//!
//! Every background loop (scheduler tick, goal runner, mind, swarm monitor,
//! email poll) runs as a [`Supervised`] task: it owns a cancellation token,
//! logs its own exit, and can be awaited to quiescence in tests. No
//! fire-and-forget spawns.

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A named background task with cooperative cancellation.
pub struct Supervised {
    name: String,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Supervised {
    /// Spawns `make_future(token)` as a named task. The future should poll
    /// the token at its suspension points and return promptly once
    /// cancelled.
    pub fn spawn<F, Fut>(name: impl Into<String>, make_future: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let fut = make_future(token.clone());
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            fut.await;
            debug!(task = %task_name, "background task finished");
        });
        Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the task is still running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .ok()
            .and_then(|h| h.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Cancels the task: cooperative first, then a hard abort after a
    /// short grace window. Panics inside the task are logged, never
    /// propagated.
    pub async fn cancel(&self) {
        const GRACE: std::time::Duration = std::time::Duration::from_secs(5);

        self.token.cancel();
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(mut handle) = handle {
            match tokio::time::timeout(GRACE, &mut handle).await {
                Ok(Err(e)) if !e.is_cancelled() => {
                    error!(task = %self.name, error = %e, "background task panicked");
                }
                Ok(_) => {}
                Err(_) => {
                    debug!(task = %self.name, "grace window elapsed, aborting");
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// **Scenario**: A supervised loop exits at its next suspension point
    /// after cancel, and is_running flips accordingly.
    #[tokio::test]
    async fn cancel_drains_the_loop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = stopped.clone();
        let task = Supervised::spawn("test-loop", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
                }
            }
            stopped_clone.store(true, Ordering::SeqCst);
        });
        assert!(task.is_running());
        task.cancel().await;
        assert!(stopped.load(Ordering::SeqCst));
        assert!(!task.is_running());
    }
}
