//! Media transport capability
//!
//! The forwarding engine drives media sessions through these traits and
//! never touches the transport library directly. Lifecycle notifications
//! (discovered candidates, state changes, inbound tracks) arrive as
//! [`SessionEvent`]s on a per-session channel returned by
//! [`MediaTransport::create_session`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MediaError;

/// Connection state of a media session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing negotiated yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media can flow
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed; the session should be closed
    Failed,
    /// Closed; the session is pruned on the next convergence pass
    Closed,
}

impl SessionState {
    /// Whether the session can no longer carry media
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

/// Lifecycle notification emitted by a media session
#[derive(Debug)]
pub enum SessionEvent<R> {
    /// A local connectivity candidate was discovered (serialized JSON)
    Candidate(String),
    /// The session changed connection state
    StateChanged(SessionState),
    /// A new inbound track was discovered
    Track(R),
}

/// Receiver half of a session's lifecycle channel
pub type SessionEvents<R> = mpsc::UnboundedReceiver<SessionEvent<R>>;

/// A locally-owned track that forwards a mirrored inbound stream
pub trait ForwardTrack: Send + Sync + 'static {
    /// Stable identifier, equal to the mirrored inbound track's identifier
    fn id(&self) -> &str;
}

/// One participant's media session
#[async_trait]
pub trait MediaSession: Send + Sync + 'static {
    /// Outbound track type this session can send
    type Track: ForwardTrack;

    /// Current connection state
    fn state(&self) -> SessionState;

    /// Identifiers of the tracks this session currently sends
    async fn sending_track_ids(&self) -> Vec<String>;

    /// Identifiers of the inbound tracks this session currently receives
    async fn receiving_track_ids(&self) -> Vec<String>;

    /// Stop sending the outbound track with this identifier
    async fn stop_sending(&self, track_id: &str) -> Result<(), MediaError>;

    /// Start sending a forwarded track
    async fn start_sending(&self, track: Arc<Self::Track>) -> Result<(), MediaError>;

    /// Create an offer, apply it locally and return it serialized
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// SSRCs of the inbound streams currently active on this session
    async fn receiving_ssrcs(&self) -> Vec<u32>;

    /// Ask the far end of an inbound stream for a full frame
    async fn request_keyframe(&self, ssrc: u32) -> Result<(), MediaError>;

    /// Apply a remote connectivity candidate (serialized JSON)
    async fn add_remote_candidate(&self, candidate: &str) -> Result<(), MediaError>;

    /// Apply a remote answer (serialized JSON session description)
    async fn set_remote_answer(&self, answer: &str) -> Result<(), MediaError>;

    /// Close the session
    async fn close(&self) -> Result<(), MediaError>;
}

/// Factory for media sessions and forwardable mirrors
#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Session type produced by this transport
    type Session: MediaSession<Track = Self::Track>;

    /// Forwardable track type
    type Track: ForwardTrack;

    /// Inbound track handle delivered by [`SessionEvent::Track`]
    type Remote: Send + Sync + 'static;

    /// Create a session that accepts one audio and one video stream
    async fn create_session(
        &self,
    ) -> Result<(Arc<Self::Session>, SessionEvents<Self::Remote>), MediaError>;

    /// Identifier of an inbound track
    fn remote_track_id(&self, remote: &Self::Remote) -> String;

    /// Stream identifier the inbound track belongs to
    fn remote_stream_id(&self, remote: &Self::Remote) -> String;

    /// Build a forwardable mirror of an inbound track
    fn mirror(&self, remote: &Self::Remote) -> Result<Self::Track, MediaError>;

    /// Copy packets from the inbound track to its mirror until reading fails
    async fn forward(&self, remote: &Self::Remote, track: &Self::Track);
}
