//! Signaling wire protocol
//!
//! JSON text frames in both directions: [`WorkOrder`]s from the client,
//! [`Event`]s from the server, written through a per-connection
//! [`EventWriter`].

pub mod event;
pub mod order;
pub mod writer;

pub use event::{
    ChatEntry, Event, JoinedRoom, LoggedIn, Question, StreamName, UserRef, VisitorSummary,
};
pub use order::WorkOrder;
pub use writer::{EventWriter, FrameSink};
