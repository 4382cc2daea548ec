//! Email monitor: polls a mailbox and surfaces unseen messages as
//! notifications and mind events.
//!
//! The mailbox itself is an external collaborator behind the [`Mailbox`]
//! trait; this loop only tracks which message ids were already seen
//! (persisted as JSON in the data directory) and broadcasts the new ones.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};
use wire::EventType;

use crate::bus::EventSink;
use crate::mind::MindHandle;
use crate::task::Supervised;

/// One inbox message summary.
#[derive(Clone, Debug)]
pub struct EmailSummary {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub preview: String,
}

/// External mailbox access.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Most recent messages, newest first.
    async fn fetch_recent(&self) -> Result<Vec<EmailSummary>, String>;
}

fn seen_ids_path(data_dir: &Path) -> PathBuf {
    data_dir.join("seen_emails.json")
}

/// Supervised poll loop over a mailbox.
pub struct EmailMonitor {
    mailbox: Arc<dyn Mailbox>,
    sink: Arc<dyn EventSink>,
    mind: Option<MindHandle>,
    config: config::EmailConfig,
    data_dir: PathBuf,
    seen: Mutex<HashSet<String>>,
    task: Mutex<Option<Arc<Supervised>>>,
}

impl EmailMonitor {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        sink: Arc<dyn EventSink>,
        mind: Option<MindHandle>,
        config: config::EmailConfig,
        data_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let data_dir = data_dir.into();
        let seen = load_seen_ids(&data_dir);
        Arc::new(Self {
            mailbox,
            sink,
            mind,
            config,
            data_dir,
            seen: Mutex::new(seen),
            task: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .ok()
            .and_then(|t| t.as_ref().map(|t| t.is_running()))
            .unwrap_or(false)
    }

    /// Starts the poll loop.
    pub fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }
        let monitor = Arc::clone(self);
        let interval = Duration::from_secs(self.config.poll_interval_minutes.max(1) * 60);
        let task = Supervised::spawn("email-monitor", move |token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                monitor.check_inbox().await;
            }
        });
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(Arc::new(task));
        }
        info!(
            interval_minutes = self.config.poll_interval_minutes,
            "email monitor started"
        );
    }

    pub async fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.cancel().await;
        }
    }

    /// One poll: broadcast every unseen message and remember its id.
    pub async fn check_inbox(&self) {
        let messages = match self.mailbox.fetch_recent().await {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "inbox fetch failed, retrying next tick");
                return;
            }
        };

        let mut fresh = Vec::new();
        if let Ok(mut seen) = self.seen.lock() {
            for msg in messages {
                if seen.insert(msg.message_id.clone()) {
                    fresh.push(msg);
                }
            }
        }
        if fresh.is_empty() {
            return;
        }

        for msg in &fresh {
            self.sink
                .broadcast_event(
                    None,
                    EventType::Notification,
                    json!({
                        "kind": "email",
                        "from": msg.sender,
                        "subject": msg.subject,
                        "preview": msg.preview,
                    }),
                )
                .await;
            if let Some(mind) = &self.mind {
                mind.inject_event(&format!("New email from {}: {}", msg.sender, msg.subject));
            }
        }
        self.save_seen_ids();
    }

    fn save_seen_ids(&self) {
        let ids: Vec<String> = self
            .seen
            .lock()
            .map(|seen| seen.iter().cloned().collect())
            .unwrap_or_default();
        if std::fs::create_dir_all(&self.data_dir).is_err() {
            return;
        }
        if let Ok(raw) = serde_json::to_string(&ids) {
            if let Err(e) = std::fs::write(seen_ids_path(&self.data_dir), raw) {
                warn!(error = %e, "failed to persist seen email ids");
            }
        }
    }
}

fn load_seen_ids(data_dir: &Path) -> HashSet<String> {
    std::fs::read_to_string(seen_ids_path(data_dir))
        .ok()
        .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
        .map(|ids| ids.into_iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubMailbox {
        messages: Mutex<Vec<EmailSummary>>,
    }

    #[async_trait]
    impl Mailbox for StubMailbox {
        async fn fetch_recent(&self) -> Result<Vec<EmailSummary>, String> {
            Ok(self.messages.lock().unwrap().clone())
        }
    }

    fn email(id: &str, subject: &str) -> EmailSummary {
        EmailSummary {
            message_id: id.to_string(),
            sender: "ada@example.test".to_string(),
            subject: subject.to_string(),
            preview: "…".to_string(),
        }
    }

    /// **Scenario**: Already-seen messages are not re-broadcast, and seen
    /// ids survive a monitor restart via the JSON file.
    #[tokio::test]
    async fn seen_ids_dedupe_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mailbox = Arc::new(StubMailbox {
            messages: Mutex::new(vec![email("m1", "invoice")]),
        });
        let monitor = EmailMonitor::new(
            mailbox.clone(),
            Arc::new(crate::bus::NullSink),
            None,
            config::EmailConfig::default(),
            dir.path(),
        );

        monitor.check_inbox().await;
        monitor.check_inbox().await;
        assert_eq!(monitor.seen.lock().unwrap().len(), 1);

        mailbox.messages.lock().unwrap().push(email("m2", "receipt"));
        monitor.check_inbox().await;
        assert_eq!(monitor.seen.lock().unwrap().len(), 2);

        // Restart: a fresh monitor over the same data dir loads both ids.
        let restarted = EmailMonitor::new(
            mailbox,
            Arc::new(crate::bus::NullSink),
            None,
            config::EmailConfig::default(),
            dir.path(),
        );
        assert_eq!(restarted.seen.lock().unwrap().len(), 2);
    }
}
