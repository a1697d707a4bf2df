//! Ready-made sinks and counters for the notification channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::channel::{CounterStore, NotificationSink};

/// What the user should be told about one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    Broadcast {
        message: String,
    },
    Targeted {
        target_type: String,
        target_action: String,
    },
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Broadcast { message } => {
                write!(f, "New mass-notification\n{}", message)
            }
            NotificationKind::Targeted {
                target_type,
                target_action,
            } => write!(f, "{} has been {}", target_type, target_action),
        }
    }
}

/// A notification as emitted to the UI layer.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub received_at: DateTime<Local>,
    pub kind: NotificationKind,
}

impl NotificationEvent {
    fn now(kind: NotificationKind) -> Self {
        Self {
            received_at: Local::now(),
            kind,
        }
    }
}

/// Renders notifications through the `log` facade at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify_broadcast(&self, message: &str) {
        log::info!(
            "{}",
            NotificationKind::Broadcast {
                message: message.to_string()
            }
        );
    }

    fn notify_targeted(&self, target_type: &str, target_action: &str) {
        log::info!(
            "{}",
            NotificationKind::Targeted {
                target_type: target_type.to_string(),
                target_action: target_action.to_string(),
            }
        );
    }
}

/// Emits each notification as a [`NotificationEvent`] on an unbounded channel. Never blocks;
/// events are dropped (with a debug log) once the receiver is gone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<NotificationEvent>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, kind: NotificationKind) {
        if self.tx.send(NotificationEvent::now(kind)).is_err() {
            log::debug!("notification event receiver dropped");
        }
    }
}

impl NotificationSink for EventSink {
    fn notify_broadcast(&self, message: &str) {
        self.emit(NotificationKind::Broadcast {
            message: message.to_string(),
        });
    }

    fn notify_targeted(&self, target_type: &str, target_action: &str) {
        self.emit(NotificationKind::Targeted {
            target_type: target_type.to_string(),
            target_action: target_action.to_string(),
        });
    }
}

/// Counter readable and writable by the UI while the channel increments it.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

impl CounterStore for AtomicCounter {
    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
