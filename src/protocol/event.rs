//! Outbound events
//!
//! Every frame the server writes is a JSON object with an `event`
//! discriminator and a `data` payload.

use serde::{Deserialize, Serialize};

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// A new room was created; carries its identifier
    CreatedRoom(String),
    /// The visitor entered an existing room
    JoinedRoom(JoinedRoom),
    /// Renegotiation offer (serialized session description)
    Offer(String),
    /// Server-side connectivity candidate (serialized JSON)
    Candidate(String),
    /// The visitor now has an identity
    UserLoggedIn(LoggedIn),
    /// Someone with an identity joined the room
    UserJoinedChat(UserRef),
    /// Someone with an identity left the room
    UserExitedChat(UserRef),
    /// Chat message
    UserMessage(ChatEntry),
    /// The visitor's display name changed
    UserNameChange(UserRef),
    /// Stream identifier to display name mapping
    StreamidUserName(StreamName),
    /// Identified visitors currently in the room
    CurrentGuests(Vec<UserRef>),
    /// Request for additional input from the client
    Question(Question),
    /// Client-readable failure description
    Error(String),
}

impl Event {
    /// Wire name of this event
    pub fn name(&self) -> &'static str {
        match self {
            Event::CreatedRoom(_) => "created_room",
            Event::JoinedRoom(_) => "joined_room",
            Event::Offer(_) => "offer",
            Event::Candidate(_) => "candidate",
            Event::UserLoggedIn(_) => "user_logged_in",
            Event::UserJoinedChat(_) => "user_joined_chat",
            Event::UserExitedChat(_) => "user_exited_chat",
            Event::UserMessage(_) => "user_message",
            Event::UserNameChange(_) => "user_name_change",
            Event::StreamidUserName(_) => "streamid_user_name",
            Event::CurrentGuests(_) => "current_guests",
            Event::Question(_) => "question",
            Event::Error(_) => "error",
        }
    }
}

/// Payload of `joined_room`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoom {
    pub room_id: u32,
    pub chat_log: Vec<ChatEntry>,
    pub visitors: Vec<VisitorSummary>,
}

/// One chat message as stored and replayed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub text: String,
    pub user_id: u64,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<u64>,
}

/// Roster entry sent on join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorSummary {
    pub user_id: Option<u64>,
    pub name: Option<String>,
    pub stream_id: Option<String>,
}

/// Payload of `user_logged_in`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedIn {
    pub user_id: u64,
    pub name: String,
    pub access_token: String,
}

/// Identity reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: u64,
    pub name: String,
}

/// Payload of `streamid_user_name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamName {
    pub stream_id: String,
    pub name: String,
}

/// Payload of `question`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub ask: String,
}

impl Question {
    pub fn new(ask: impl Into<String>) -> Self {
        Self { ask: ask.into() }
    }
}
