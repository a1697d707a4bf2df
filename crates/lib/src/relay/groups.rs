//! Delivery groups: named sets of connected sockets that share a push stream.
//!
//! Every socket joins the mass group on connect. Once it presents a known token it also joins
//! its user's group and, when the user has one, its university's mass group. Disconnect
//! removes it from all of them.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Group every connected socket belongs to.
pub const MASS_GROUP: &str = "mass-notifications";

/// Mass group scoped to one university's users.
pub fn university_mass_group(university_id: &str) -> String {
    format!("{}:{}", MASS_GROUP, university_id)
}

/// Group for one user's sockets.
pub fn user_group(user_id: &str) -> String {
    format!("notifications:{}", user_id)
}

type Members = HashMap<String, mpsc::UnboundedSender<String>>;

/// Group name -> (socket id -> outbound queue). Shared across the relay.
pub struct GroupRegistry {
    inner: Arc<RwLock<HashMap<String, Members>>>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a socket to a group. Re-adding replaces the queue.
    pub async fn add(&self, group: &str, socket_id: &str, tx: mpsc::UnboundedSender<String>) {
        let mut g = self.inner.write().await;
        g.entry(group.to_string())
            .or_default()
            .insert(socket_id.to_string(), tx);
    }

    pub async fn discard(&self, group: &str, socket_id: &str) {
        let mut g = self.inner.write().await;
        if let Some(members) = g.get_mut(group) {
            members.remove(socket_id);
            if members.is_empty() {
                g.remove(group);
            }
        }
    }

    /// Remove a socket from every group (on disconnect).
    pub async fn discard_all(&self, socket_id: &str) {
        let mut g = self.inner.write().await;
        g.retain(|_, members| {
            members.remove(socket_id);
            !members.is_empty()
        });
    }

    /// Queue `text` for every member of `group`. Returns how many sockets accepted it.
    pub async fn send(&self, group: &str, text: &str) -> usize {
        let g = self.inner.read().await;
        let Some(members) = g.get(group) else {
            return 0;
        };
        members
            .values()
            .filter(|tx| tx.send(text.to_string()).is_ok())
            .count()
    }

    pub async fn len(&self, group: &str) -> usize {
        self.inner.read().await.get(group).map_or(0, |m| m.len())
    }
}
