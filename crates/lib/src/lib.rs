//! notichan core library — notification channel client, sinks, reconnect supervisor,
//! configuration, and the development relay used by the CLI.

pub mod channel;
pub mod config;
pub mod init;
pub mod reconnect;
pub mod relay;
pub mod sink;
