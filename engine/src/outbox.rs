//! Bounded notification outbox.
//!
//! The engine writes with `try_send` and never waits. A full or closed outbox
//! drops the notification, logs it and counts it.

use crate::metrics;
use boxoffice_core::notification::{Notification, NotificationSink};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Sending half of the outbox.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Notification>,
}

impl Outbox {
    /// Creates an outbox holding at most `capacity` undelivered notifications.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues `notification` without waiting.
    pub fn emit(&self, notification: Notification) {
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                metrics::record_notification_dropped();
                tracing::warn!(
                    kind = ?dropped.kind,
                    subject = %dropped.subject,
                    "Notification outbox full, dropping"
                );
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                metrics::record_notification_dropped();
                tracing::debug!(
                    kind = ?dropped.kind,
                    subject = %dropped.subject,
                    "Notification outbox closed, dropping"
                );
            }
        }
    }
}

/// Forwards notifications to `sink` until the outbox closes or shutdown is
/// signalled. Delivery failures are logged and forgotten.
pub async fn dispatch(
    mut rx: mpsc::Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Notification dispatcher started");
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(notification) = maybe else { break };
                let kind = notification.kind;
                if let Err(error) = sink.deliver(notification).await {
                    tracing::warn!(?kind, %error, "Notification delivery failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    // Flush whatever was already queued.
    while let Ok(notification) = rx.try_recv() {
        let kind = notification.kind;
        if let Err(error) = sink.deliver(notification).await {
            tracing::warn!(?kind, %error, "Notification delivery failed");
        }
    }
    tracing::debug!("Notification dispatcher stopped");
}

/// Sink that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(
        &self,
        notification: Notification,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>> {
        Box::pin(async move {
            tracing::info!(
                kind = ?notification.kind,
                subject = %notification.subject,
                summary = %notification.summary,
                "Notification"
            );
            Ok(())
        })
    }
}
