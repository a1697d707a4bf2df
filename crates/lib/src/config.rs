//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.notichan/config.json`) and environment.
//! A missing file yields the defaults, which point the client at a loopback relay.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Notification endpoint the client connects to.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Client credential.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Inbound frame handling.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Optional reconnect supervisor around the channel.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Development relay server settings.
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// WebSocket URL (default "ws://127.0.0.1:8765/notifications").
    #[serde(default = "default_endpoint_url")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Bearer token sent in the login and action-request frames. Overridden by NOTICHAN_TOKEN env.
    pub token: Option<String>,
}

/// How a frame is recognised as a mass notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MassPredicate {
    /// `target_action == "mass_notification"` on the parsed frame.
    #[default]
    ParsedField,
    /// Raw frame text contains `target_action:mass_notification`.
    RawSubstring,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default)]
    pub mass_predicate: MassPredicate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// When false (default) a closed channel stays closed.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Give up after this many reopen attempts. None = retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Relay bind, port, and the static token table used to resolve logins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Port for HTTP and WebSocket (default 8765).
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1"). Only loopback binds are accepted.
    #[serde(default = "default_relay_bind")]
    pub bind: String,

    /// Bearer token -> user. Frames carrying an unknown token are ignored.
    #[serde(default)]
    pub users: HashMap<String, RelayUser>,
}

/// A user known to the relay. In the config file either a bare user id string or
/// `{ "userId", "universityId" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RelayUserEntry")]
pub struct RelayUser {
    pub user_id: String,
    /// Sockets of this user also receive the university's mass notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
}

impl RelayUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            university_id: None,
        }
    }

    pub fn with_university(mut self, university_id: impl Into<String>) -> Self {
        self.university_id = Some(university_id.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelayUserEntry {
    Id(String),
    #[serde(rename_all = "camelCase")]
    Full {
        user_id: String,
        #[serde(default)]
        university_id: Option<String>,
    },
}

impl From<RelayUserEntry> for RelayUser {
    fn from(entry: RelayUserEntry) -> Self {
        match entry {
            RelayUserEntry::Id(user_id) => RelayUser::new(user_id),
            RelayUserEntry::Full {
                user_id,
                university_id,
            } => RelayUser {
                user_id,
                university_id: university_id
                    .map(|u| u.trim().to_string())
                    .filter(|u| !u.is_empty()),
            },
        }
    }
}

fn default_endpoint_url() -> String {
    format!("ws://127.0.0.1:{}/notifications", default_relay_port())
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_relay_port() -> u16 {
    8765
}

fn default_relay_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_endpoint_url(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: None,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            bind: default_relay_bind(),
            users: HashMap::new(),
        }
    }
}

/// Resolve the client token: env NOTICHAN_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    std::env::var("NOTICHAN_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .auth
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("NOTICHAN_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".notichan").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or NOTICHAN_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
