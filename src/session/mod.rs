//! Connection session tracking

pub mod state;

pub use state::{ConnectionPhase, ConnectionState};
