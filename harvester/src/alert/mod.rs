pub mod commands;
pub mod telegram;

use async_trait::async_trait;
use harvester_core::Result;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use commands::CommandListener;
pub use telegram::TelegramBot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub destination: i64,
    pub text: String,
}

/// Delivery mechanism for alerts.
#[async_trait]
pub trait AlertBackend: Send + Sync {
    async fn send_message(&self, destination: i64, text: &str) -> Result<()>;
}

/// Fire-and-forget alert handle. Cloning is cheap; `notify` never blocks and
/// never fails.
#[derive(Clone)]
pub struct Alerter {
    inner: Option<AlerterInner>,
}

#[derive(Clone)]
struct AlerterInner {
    tx: mpsc::Sender<Alert>,
    destination: i64,
    tag: String,
}

impl Alerter {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Alerter plus the receiving end of its queue. Messages are prefixed with
    /// `[tag]` for attribution.
    pub fn channel(
        destination: i64,
        tag: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity);
        let alerter = Self {
            inner: Some(AlerterInner {
                tx,
                destination,
                tag: tag.into(),
            }),
        };
        (alerter, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn notify(&self, message: impl AsRef<str>) {
        let Some(inner) = &self.inner else {
            debug!(message = message.as_ref(), "Alerting disabled, dropping alert");
            return;
        };

        let alert = Alert {
            destination: inner.destination,
            text: format!("[{}] {}", inner.tag, message.as_ref()),
        };

        match inner.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                counter!("harvester_alerts_dropped", "reason" => "full").increment(1);
                warn!(text = %alert.text, "Alert queue full, dropping alert");
            }
            Err(TrySendError::Closed(alert)) => {
                counter!("harvester_alerts_dropped", "reason" => "closed").increment(1);
                warn!(text = %alert.text, "Alert worker gone, dropping alert");
            }
        }
    }
}

/// Drain the queue into the backend. Delivery failures are logged and
/// swallowed.
pub fn spawn_delivery(
    mut rx: mpsc::Receiver<Alert>,
    backend: Arc<dyn AlertBackend>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(alert) = rx.recv().await {
            if let Err(e) = backend.send_message(alert.destination, &alert.text).await {
                counter!("harvester_alert_delivery_failures").increment(1);
                warn!(error = %e, destination = alert.destination, "Failed to deliver alert");
            }
        }
        info!("Alert delivery worker shutting down");
    })
}

/// Waits, at most `limit`, for the delivery worker to empty its queue. The
/// worker only finishes once every `Alerter` clone has been dropped.
pub async fn drain_delivery(worker: JoinHandle<()>, limit: Duration) {
    match tokio::time::timeout(limit, worker).await {
        Ok(Ok(())) => debug!("Alert queue drained"),
        Ok(Err(e)) => warn!(error = %e, "Alert delivery worker failed"),
        Err(_) => warn!(
            timeout_ms = limit.as_millis() as u64,
            "Gave up waiting for queued alerts"
        ),
    }
}
