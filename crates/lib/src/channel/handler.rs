//! The notification channel handler: reacts to transport lifecycle events and user requests.
//!
//! The handler does no I/O of its own. Frames go out through a [`Transport`], decoded
//! notifications go to a [`NotificationSink`], and every processed frame bumps a
//! [`CounterStore`]. The tokio driver in `driver.rs` feeds it events from a real socket.

use std::sync::Arc;

use serde::Serialize;

use super::protocol::{
    decode_frame, ActionRequestFrame, Credential, LoginFrame, Notification, ProtocolError,
};
use crate::config::MassPredicate;

/// Connection lifecycle. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
    #[error("channel is not open (state: {0:?})")]
    NotOpen(ChannelState),
}

/// Outbound half of the connection. `send` queues a text frame and never waits for the peer.
pub trait Transport: Send {
    fn send(&self, text: String) -> Result<(), TransportError>;
}

/// Presents notifications to the user. Implementations must not block the caller.
pub trait NotificationSink: Send + Sync {
    fn notify_broadcast(&self, message: &str);
    fn notify_targeted(&self, target_type: &str, target_action: &str);
}

/// Externally owned notification counter.
pub trait CounterStore: Send + Sync {
    fn increment(&self);
}

pub struct NotificationChannel {
    credential: Credential,
    state: ChannelState,
    predicate: MassPredicate,
    transport: Box<dyn Transport>,
    sink: Arc<dyn NotificationSink>,
    counter: Arc<dyn CounterStore>,
}

impl NotificationChannel {
    /// New handler in `Connecting`. Nothing is sent until [`Self::on_open`].
    pub fn new(
        credential: Credential,
        predicate: MassPredicate,
        transport: Box<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
        counter: Arc<dyn CounterStore>,
    ) -> Self {
        Self {
            credential,
            state: ChannelState::Connecting,
            predicate,
            transport,
            sink,
            counter,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Transport is established: move to Open and send the login frame. Fires once; later calls are ignored.
    pub fn on_open(&mut self) {
        if self.state != ChannelState::Connecting {
            log::debug!("ignoring open event in state {:?}", self.state);
            return;
        }
        self.state = ChannelState::Open;
        log::info!("notification channel open, sending login");
        let frame = LoginFrame::new(&self.credential);
        self.send_frame(&frame);
    }

    /// Transport terminated (either peer or the network). No reconnect.
    pub fn on_close(&mut self) {
        if self.state == ChannelState::Closed {
            return;
        }
        log::info!("notification channel closed (was {:?})", self.state);
        self.state = ChannelState::Closed;
    }

    /// One inbound text frame. Returns the decoded notification, `Ok(None)` when the
    /// channel is not open, or the parse error (no sink call, no increment).
    pub fn on_message(&mut self, raw: &str) -> Result<Option<Notification>, ProtocolError> {
        if self.state != ChannelState::Open {
            log::debug!("dropping frame received in state {:?}", self.state);
            return Ok(None);
        }
        let notification = decode_frame(raw, self.predicate)?;
        match &notification {
            Notification::Broadcast { message } => {
                self.sink.notify_broadcast(message);
            }
            Notification::Targeted {
                target_type,
                target_action,
                ..
            } => {
                self.sink.notify_targeted(target_type, target_action);
            }
        }
        self.counter.increment();
        Ok(Some(notification))
    }

    /// Send one `{ "jwt" }` action request. The server answers, if at all, with a later push.
    pub fn request_mass_notification(&mut self) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen(self.state));
        }
        let frame = ActionRequestFrame::new(&self.credential);
        self.send_frame(&frame);
        Ok(())
    }

    /// Serialize and hand to the transport. Failures are logged and otherwise unobserved.
    fn send_frame<T: Serialize>(&self, frame: &T) {
        let text = match serde_json::to_string(frame) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("encoding outbound frame failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.transport.send(text) {
            log::warn!("notification channel send failed: {}", e);
        }
    }
}
