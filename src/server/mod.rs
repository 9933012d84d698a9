//! Signaling server
//!
//! An axum websocket endpoint in front of the per-connection dispatcher.

pub mod config;
pub mod dispatcher;
pub mod listener;

pub use config::ServerConfig;
pub use dispatcher::{serve_connection, ServerState};
pub use listener::RoomServer;
