//! Relay HTTP bodies and outbound frame builders.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::channel::MASS_NOTIFICATION_ACTION;

/// What the relay reads from a client frame. Both the login frame and the action
/// request carry `jwt`; anything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub login: bool,
    #[serde(default)]
    pub jwt: Option<String>,
}

/// Body of `POST /notify`: push a targeted notification to one user's sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyParams {
    pub user_id: String,
    pub target_type: String,
    pub target_action: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

/// Body of `POST /mass-notify`: push a mass notification to every socket, or only to the
/// sockets of one university's users when `universityId` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassNotifyParams {
    pub message: String,
    #[serde(default)]
    pub university_id: Option<String>,
}

/// Response of both push endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub delivered: usize,
}

/// `{"target_type","target_action","target_id"}`; `target_id` is a string on the wire and
/// omitted when unknown.
pub fn targeted_frame(params: &NotifyParams) -> String {
    let mut frame = json!({
        "target_type": params.target_type,
        "target_action": params.target_action,
    });
    if let Some(ref id) = params.target_id {
        frame["target_id"] = json!(id);
    }
    frame.to_string()
}

/// `{"target_action":"mass_notification","message"}`.
pub fn mass_frame(message: &str) -> String {
    json!({
        "target_action": MASS_NOTIFICATION_ACTION,
        "message": message,
    })
    .to_string()
}
