//! Per-room forwarding engine
//!
//! The engine mirrors every inbound media track of a room to every other
//! peer session in that room. It owns two pieces of state behind a single
//! lock: the track registry and the connection set.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ForwardingEngine>
//!                  ┌──────────────────────────────┐
//!                  │ Mutex<EngineState {          │
//!                  │   tracks: HashMap<Id, Track>,│
//!                  │   peers: Vec<PeerEntry {     │
//!                  │     session, writer }>,      │
//!                  │ }>                           │
//!                  └──────────────┬───────────────┘
//!                                 │
//!        ┌────────────────────────┼────────────────────────┐
//!        │                        │                        │
//!        ▼                        ▼                        ▼
//!   [Publisher]             [Peer session]           [Peer session]
//!   on track ─► add_track() converge() ─► offer ─►   converge() ─► offer
//!   read ─► mirror.write ──────► forwarded RTP ──────► forwarded RTP
//! ```
//!
//! Any change to either set triggers a convergence pass, which recomputes
//! each session's outbound streams and pushes a fresh offer to it. A pass
//! that keeps failing is abandoned after a bounded number of attempts and
//! rescheduled after a cooldown instead of spinning under the lock.

pub mod config;
pub mod forwarding;
pub mod media;
pub mod webrtc;

pub use config::EngineConfig;
pub use forwarding::{ConvergeOutcome, ForwardingEngine};
pub use media::{ForwardTrack, MediaSession, MediaTransport, SessionEvent, SessionEvents, SessionState};
pub use self::webrtc::{WebRtcSession, WebRtcTransport};
