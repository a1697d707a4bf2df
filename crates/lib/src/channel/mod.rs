//! Notification channel: one persistent WebSocket to a notification endpoint.
//!
//! On open the client logs in with its credential; every inbound frame is decoded,
//! handed to a sink and counted. Closed is terminal; see `crate::reconnect` for a
//! wrapping layer that reopens.

mod driver;
mod handler;
mod protocol;

pub use driver::{open, ChannelHandle};
pub use handler::{
    ChannelError, ChannelState, CounterStore, NotificationChannel, NotificationSink, Transport,
    TransportError,
};
pub use protocol::{
    decode_frame, ActionRequestFrame, Credential, InboundMessage, LoginFrame, Notification,
    ProtocolError, MASS_NOTIFICATION_ACTION, MASS_NOTIFICATION_MARKER,
};
