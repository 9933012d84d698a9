//! Error types
//!
//! The crate-wide [`Error`] wraps one error type per collaborator so that
//! handlers can decide, by variant, whether a failure is reported to the
//! visitor or ends the connection.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Media transport failure (session construction, negotiation, RTCP)
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Room or chat-log store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Identity collaborator failure
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Malformed or unexpected inbound message
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Read or write failure on the signaling connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// I/O error (bind, accept)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error ends the connection that produced it
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }

    /// Message sent to the client in an `error` event
    pub fn client_message(&self) -> String {
        match self {
            Error::Media(e) => e.to_string(),
            Error::Store(e) => e.to_string(),
            Error::Identity(e) => e.to_string(),
            Error::Protocol(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

/// Errors raised by the media transport
#[derive(Debug, Clone, Error)]
pub enum MediaError {
    /// The transport could not allocate a session
    #[error("session could not be created: {0}")]
    SessionCreate(String),

    /// A forwardable mirror could not be constructed
    #[error("track mirror could not be created: {0}")]
    Mirror(String),

    /// Adding or removing an outbound stream failed
    #[error("outbound stream change failed: {0}")]
    Sender(String),

    /// Offer/answer or candidate negotiation failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Feedback (RTCP) write failed
    #[error("feedback write failed: {0}")]
    Feedback(String),

    /// Operation on a session that is already closed
    #[error("session closed")]
    Closed,
}

/// Errors raised by the room and chat-log stores
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Requested record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Backend failure
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Errors raised by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Token is malformed, forged or expired
    #[error("access token is invalid or expired")]
    InvalidToken,

    /// Name/password pair did not match
    #[error("name or password is incorrect")]
    InvalidCredentials,

    /// Identity does not exist
    #[error("user {0} not found")]
    UnknownUser(u64),

    /// Name is empty or already taken
    #[error("name is not available: {0}")]
    NameUnavailable(String),

    /// Operation needs a password to be set first
    #[error("a password must be set before changing the name")]
    PasswordRequired,

    /// Token signing or password hashing failure
    #[error("credential backend failure: {0}")]
    Backend(String),
}

/// Errors raised while decoding or validating inbound messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame was not a valid work order
    #[error("malformed work order: {0}")]
    Malformed(String),

    /// Operation needs an active media session
    #[error("no active media session")]
    NoMediaSession,

    /// Operation needs an established identity
    #[error("not logged in")]
    NotAuthenticated,

    /// Direct message target is not in the room
    #[error("recipient not present")]
    RecipientNotPresent,

    /// No visitor publishes the requested stream
    #[error("no visitor owns stream {0}")]
    UnknownStream(String),

    /// Password does not meet the strength policy
    #[error("{0}")]
    WeakPassword(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Transport("reset".into()).is_fatal());
        assert!(!Error::Protocol(ProtocolError::NoMediaSession).is_fatal());
        assert!(!Error::Store(StoreError::Backend("down".into())).is_fatal());
    }

    #[test]
    fn test_display_is_client_readable() {
        let err = Error::from(ProtocolError::RecipientNotPresent);
        assert_eq!(err.to_string(), "protocol error: recipient not present");
        assert_eq!(err.client_message(), "recipient not present");
        assert_eq!(
            IdentityError::InvalidToken.to_string(),
            "access token is invalid or expired"
        );
    }
}
