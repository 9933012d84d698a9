//! Inbound work orders
//!
//! Clients send `{"order": <name>, "details": <payload>}`. The payload shape
//! depends on the order; orders without a payload may omit `details`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Client-to-server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOrder {
    /// Create a media session for this visitor
    MediaRequest,
    /// Present a stored access token
    ValidateAccessToken(String),
    /// Remote connectivity candidate (serialized JSON)
    Candidate(String),
    /// Remote answer (serialized session description)
    Answer(String),
    /// Chat message, optionally direct
    UserMessage(UserMessage),
    /// Set or replace the identity's password
    SetUserPassword(SetPassword),
    /// Change the identity's display name
    SetUserName(SetName),
    /// Log in with name and password
    ValidateUserNamePassword(Credentials),
    /// Resolve the display name behind a stream identifier
    IdentifyStreamid(IdentifyStream),
    /// List identified visitors in the room
    GetCurrentGuests,
    /// Close the media session, keeping signaling open
    CloseConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserMessage {
    pub text: String,
    #[serde(default)]
    pub to_user_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetPassword {
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SetName {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentifyStream {
    pub stream_id: String,
}

#[derive(Deserialize)]
struct RawOrder {
    order: String,
    #[serde(default)]
    details: Value,
}

impl WorkOrder {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawOrder =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let order = match raw.order.as_str() {
            "media_request" => WorkOrder::MediaRequest,
            "validate_access_token" => {
                // A missing token is an anonymous visitor, not a malformed frame
                let token = match raw.details {
                    Value::Null => String::new(),
                    other => text_payload(&raw.order, other)?,
                };
                WorkOrder::ValidateAccessToken(token)
            }
            "candidate" => WorkOrder::Candidate(text_payload(&raw.order, raw.details)?),
            "answer" => WorkOrder::Answer(text_payload(&raw.order, raw.details)?),
            "user_message" => {
                let message = match raw.details {
                    Value::String(text) => UserMessage {
                        text,
                        to_user_id: None,
                    },
                    other => typed_payload(&raw.order, other)?,
                };
                WorkOrder::UserMessage(message)
            }
            "set_user_password" => WorkOrder::SetUserPassword(typed_payload(&raw.order, raw.details)?),
            "set_user_name" => WorkOrder::SetUserName(typed_payload(&raw.order, raw.details)?),
            "validate_user_name_password" => {
                WorkOrder::ValidateUserNamePassword(typed_payload(&raw.order, raw.details)?)
            }
            "identify_streamid" => WorkOrder::IdentifyStreamid(typed_payload(&raw.order, raw.details)?),
            "get_current_guests" => WorkOrder::GetCurrentGuests,
            "close_connection" => WorkOrder::CloseConnection,
            other => {
                return Err(ProtocolError::Malformed(format!("unknown order '{}'", other)));
            }
        };

        Ok(order)
    }

    /// Wire name of this order
    pub fn name(&self) -> &'static str {
        match self {
            WorkOrder::MediaRequest => "media_request",
            WorkOrder::ValidateAccessToken(_) => "validate_access_token",
            WorkOrder::Candidate(_) => "candidate",
            WorkOrder::Answer(_) => "answer",
            WorkOrder::UserMessage(_) => "user_message",
            WorkOrder::SetUserPassword(_) => "set_user_password",
            WorkOrder::SetUserName(_) => "set_user_name",
            WorkOrder::ValidateUserNamePassword(_) => "validate_user_name_password",
            WorkOrder::IdentifyStreamid(_) => "identify_streamid",
            WorkOrder::GetCurrentGuests => "get_current_guests",
            WorkOrder::CloseConnection => "close_connection",
        }
    }
}

/// Payload carried as a string; objects are re-serialized so either form works
fn text_payload(order: &str, details: Value) -> Result<String, ProtocolError> {
    match details {
        Value::String(text) => Ok(text),
        Value::Object(_) => Ok(details.to_string()),
        other => Err(ProtocolError::Malformed(format!(
            "{}: expected a string payload, got {}",
            order, other
        ))),
    }
}

fn typed_payload<T: DeserializeOwned>(order: &str, details: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(details).map_err(|e| ProtocolError::Malformed(format!("{}: {}", order, e)))
}
