//! Multi-party audio/video rooms
//!
//! A selective forwarding server: every participant publishes its media
//! once and receives every other participant's media, relayed by the
//! server without transcoding. Signaling, identity and chat share one
//! websocket per participant.
//!
//! # Layout
//!
//! - [`engine`]: per-room forwarding engine and the media transport seam
//! - [`room`]: rooms, visitors, display names and the chat cache
//! - [`protocol`]: JSON work orders and events, and the serialized writer
//! - [`service`]: room cache plus store and identity collaborators
//! - [`server`]: websocket listener and the per-connection dispatcher
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use room_sfu::engine::WebRtcTransport;
//! use room_sfu::service::{MemoryChatLogStore, MemoryRoomStore, RoomsService, TokenIdentityService};
//! use room_sfu::{RoomServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> room_sfu::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     let transport = Arc::new(WebRtcTransport::new(&config.engine)?);
//!     let rooms = RoomsService::new(
//!         transport,
//!         Arc::new(MemoryRoomStore::new()),
//!         Arc::new(MemoryChatLogStore::new()),
//!         config.room_config(),
//!     );
//!     let identity = Arc::new(TokenIdentityService::new(&config.token_secret, config.token_ttl));
//!
//!     RoomServer::new(config, rooms, identity).run().await
//! }
//! ```

pub mod engine;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod service;
pub mod session;
pub mod testing;

pub use error::{Error, Result};
pub use server::{RoomServer, ServerConfig};
