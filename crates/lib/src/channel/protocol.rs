//! Notification channel wire protocol (login, action request, inbound notifications).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::MassPredicate;

/// `target_action` value the server uses for mass notifications.
pub const MASS_NOTIFICATION_ACTION: &str = "mass_notification";

/// Literal searched for in the raw frame under [`MassPredicate::RawSubstring`].
pub const MASS_NOTIFICATION_MARKER: &str = "target_action:mass_notification";

/// Bearer token identifying the session to the endpoint. Never mutated after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Outbound login frame: `{ "login": true, "jwt" }`. Sent once, right after the channel opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginFrame {
    pub login: bool,
    pub jwt: String,
}

impl LoginFrame {
    pub fn new(credential: &Credential) -> Self {
        Self {
            login: true,
            jwt: credential.as_str().to_string(),
        }
    }
}

/// Outbound action-request frame: `{ "jwt" }` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequestFrame {
    pub jwt: String,
}

impl ActionRequestFrame {
    pub fn new(credential: &Credential) -> Self {
        Self {
            jwt: credential.as_str().to_string(),
        }
    }
}

/// Inbound notification frame. Targeted frames carry target_*; mass frames carry
/// `target_action: "mass_notification"` and `message`.
///
/// Field values are taken as text whatever their JSON type: numbers and booleans are
/// rendered as JSON, `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, deserialize_with = "text_or_empty")]
    pub target_type: String,
    #[serde(default, deserialize_with = "text_or_empty")]
    pub target_action: String,
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
}

fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn text_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_text(deserializer)?.unwrap_or_default())
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Broadcast {
        message: String,
    },
    Targeted {
        target_type: String,
        target_action: String,
        target_id: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed notification frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),
}

/// Parse a raw text frame and decide whether it is a mass or a targeted notification.
/// The raw text is what `RawSubstring` inspects; `ParsedField` looks at the decoded field.
pub fn decode_frame(raw: &str, predicate: MassPredicate) -> Result<Notification, ProtocolError> {
    let msg: InboundMessage = serde_json::from_str(raw)?;
    let is_mass = match predicate {
        MassPredicate::ParsedField => msg.target_action == MASS_NOTIFICATION_ACTION,
        MassPredicate::RawSubstring => raw.contains(MASS_NOTIFICATION_MARKER),
    };
    if is_mass {
        Ok(Notification::Broadcast {
            message: msg.message.unwrap_or_default(),
        })
    } else {
        Ok(Notification::Targeted {
            target_type: msg.target_type,
            target_action: msg.target_action,
            target_id: msg.target_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_frame_wire_shape() {
        let frame = LoginFrame::new(&Credential::new("tok123"));
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"login":true,"jwt":"tok123"}"#
        );
    }

    #[test]
    fn action_request_has_only_jwt() {
        let frame = ActionRequestFrame::new(&Credential::new("tok123"));
        assert_eq!(serde_json::to_string(&frame).unwrap(), r#"{"jwt":"tok123"}"#);
    }

    #[test]
    fn credential_debug_is_redacted() {
        assert_eq!(format!("{:?}", Credential::new("secret")), "Credential(***)");
    }

    #[test]
    fn targeted_frame_decodes_type_action_and_id() {
        let raw = r#"{"target_id":"12","target_type":"comment","target_action":"liked"}"#;
        let n = decode_frame(raw, MassPredicate::ParsedField).unwrap();
        assert_eq!(
            n,
            Notification::Targeted {
                target_type: "comment".into(),
                target_action: "liked".into(),
                target_id: Some("12".into()),
            }
        );
    }

    #[test]
    fn mass_frame_by_parsed_field() {
        let raw = r#"{"target_action":"mass_notification","message":"Server maintenance"}"#;
        let n = decode_frame(raw, MassPredicate::ParsedField).unwrap();
        assert_eq!(
            n,
            Notification::Broadcast {
                message: "Server maintenance".into()
            }
        );
    }

    #[test]
    fn raw_substring_needs_the_literal_marker() {
        // Quoted JSON does not contain the unquoted marker.
        let quoted = r#"{"target_action":"mass_notification","message":"m"}"#;
        assert!(matches!(
            decode_frame(quoted, MassPredicate::RawSubstring).unwrap(),
            Notification::Targeted { .. }
        ));

        // Marker anywhere in the frame text counts, even inside a field value.
        let marked = r#"{"target_type":"x","target_action":"y","message":"target_action:mass_notification"}"#;
        assert_eq!(
            decode_frame(marked, MassPredicate::RawSubstring).unwrap(),
            Notification::Broadcast {
                message: "target_action:mass_notification".into()
            }
        );
        assert!(matches!(
            decode_frame(marked, MassPredicate::ParsedField).unwrap(),
            Notification::Targeted { .. }
        ));
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let n = decode_frame("{}", MassPredicate::ParsedField).unwrap();
        assert_eq!(
            n,
            Notification::Targeted {
                target_type: String::new(),
                target_action: String::new(),
                target_id: None,
            }
        );
    }

    #[test]
    fn non_string_fields_are_rendered_as_text() {
        let raw = r#"{"target_id":12,"target_type":"comment","target_action":"liked"}"#;
        assert_eq!(
            decode_frame(raw, MassPredicate::ParsedField).unwrap(),
            Notification::Targeted {
                target_type: "comment".into(),
                target_action: "liked".into(),
                target_id: Some("12".into()),
            }
        );

        let raw = r#"{"target_id":null,"target_type":null,"target_action":true}"#;
        assert_eq!(
            decode_frame(raw, MassPredicate::ParsedField).unwrap(),
            Notification::Targeted {
                target_type: String::new(),
                target_action: "true".into(),
                target_id: None,
            }
        );
    }

    #[test]
    fn mass_frame_with_numeric_or_null_message() {
        let raw = r#"{"target_action":"mass_notification","message":42}"#;
        assert_eq!(
            decode_frame(raw, MassPredicate::ParsedField).unwrap(),
            Notification::Broadcast {
                message: "42".into()
            }
        );
        let raw = r#"{"target_action":"mass_notification","message":null}"#;
        assert_eq!(
            decode_frame(raw, MassPredicate::ParsedField).unwrap(),
            Notification::Broadcast {
                message: String::new()
            }
        );
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            decode_frame("not json", MassPredicate::ParsedField),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
