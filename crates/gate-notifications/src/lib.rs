//! # gate-notifications
//!
//! Security notifications for Gate.
//!
//! ## Features
//!
//! - Security events (failed second factor, account locked, cloned credential)
//! - Fire-and-forget [`Notifier`] capability used by the authenticators
//! - Queue-backed notifier with a background email dispatcher

pub mod email;
pub mod notification;
pub mod service;

pub use email::{EmailAddress, EmailError, EmailMessage, EmailRenderer, EmailSender, LogEmailSender};
pub use notification::{SecurityEvent, SecurityNotification};
pub use service::{
    notify_quietly, NotificationDispatcher, Notifier, NotifyError, QueuedNotifier,
    RecordingNotifier,
};
