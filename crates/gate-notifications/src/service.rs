//! Notification service
//!
//! Authenticators hand notifications to a [`Notifier`] and move on. The
//! queue-backed implementation never awaits delivery; a separate
//! [`NotificationDispatcher`] task renders and sends the emails.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::email::{EmailRenderer, EmailSender};
use crate::notification::SecurityNotification;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification queue closed")]
    QueueClosed,
    #[error("Delivery error: {0}")]
    Delivery(String),
}

/// Fire-and-forget notification capability
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Must not block on delivery
    fn notify(&self, notification: SecurityNotification) -> Result<(), NotifyError>;
}

/// Hand a notification over and swallow any error.
///
/// A broken notification channel must never change an authentication
/// decision.
pub fn notify_quietly(notifier: &dyn Notifier, notification: SecurityNotification) {
    let event = notification.event;
    let user_id = notification.user_id;
    if let Err(e) = notifier.notify(notification) {
        tracing::warn!(
            event = event.as_str(),
            user_id,
            error = %e,
            "Failed to enqueue security notification"
        );
    }
}

/// Notifier backed by an unbounded channel
#[derive(Clone)]
pub struct QueuedNotifier {
    tx: mpsc::UnboundedSender<SecurityNotification>,
}

impl QueuedNotifier {
    /// Create the notifier together with the receiving end for a dispatcher
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SecurityNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for QueuedNotifier {
    fn notify(&self, notification: SecurityNotification) -> Result<(), NotifyError> {
        self.tx
            .send(notification)
            .map_err(|_| NotifyError::QueueClosed)
    }
}

/// Drains the queue and delivers each notification by email
pub struct NotificationDispatcher {
    rx: mpsc::UnboundedReceiver<SecurityNotification>,
    renderer: EmailRenderer,
    sender: Arc<dyn EmailSender>,
}

impl NotificationDispatcher {
    pub fn new(
        rx: mpsc::UnboundedReceiver<SecurityNotification>,
        renderer: EmailRenderer,
        sender: Arc<dyn EmailSender>,
    ) -> Self {
        Self {
            rx,
            renderer,
            sender,
        }
    }

    /// Run until every `QueuedNotifier` handle is dropped. Returns the
    /// number of messages delivered.
    pub async fn run(mut self) -> usize {
        let mut delivered = 0;
        while let Some(notification) = self.rx.recv().await {
            let message = self.renderer.render(&notification);
            match self.sender.send(&message).await {
                Ok(message_id) => {
                    delivered += 1;
                    tracing::debug!(
                        message_id = %message_id,
                        event = notification.event.as_str(),
                        user_id = notification.user_id,
                        "Security notification sent"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        event = notification.event.as_str(),
                        user_id = notification.user_id,
                        error = %e,
                        "Security notification delivery failed"
                    );
                }
            }
        }
        tracing::info!(delivered, "Notification dispatcher stopped");
        delivered
    }
}

/// Keeps every notification in memory (development/testing)
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SecurityNotification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SecurityNotification> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: SecurityNotification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification);
        Ok(())
    }
}
