//! Development relay: a local notification endpoint speaking the channel's wire protocol.
//!
//! Single port serves HTTP and WebSocket. Sockets on `/notifications` join the mass group on
//! connect, and their user's group (plus their university's mass group) when they present a
//! token listed in `relay.users`. `POST /notify` and `POST /mass-notify` push frames to those
//! groups.

mod groups;
mod protocol;
mod server;

pub use groups::{university_mass_group, user_group, GroupRegistry, MASS_GROUP};
pub use protocol::{
    mass_frame, targeted_frame, ClientFrame, DeliveryReport, MassNotifyParams, NotifyParams,
};
pub use server::{router, run_relay, RelayState};
