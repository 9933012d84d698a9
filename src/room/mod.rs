//! Rooms and visitors
//!
//! A [`Room`] owns a forwarding engine, the roster of [`Visitor`]s
//! connected to it, and the cached chat history. Visitors hold only a weak
//! reference back to their room.
//!
//! ```text
//!   Room ──owns──► ForwardingEngine
//!    │
//!    ├──owns──► Vec<Arc<Visitor>> ──weak──► Room
//!    │                │
//!    │                ├── EventWriter (signaling connection)
//!    │                └── media session (optional)
//!    │
//!    └──owns──► ChatLog
//! ```

pub mod chat;
pub mod naming;
#[allow(clippy::module_inception)]
pub mod room;
pub mod visitor;

use crate::engine::EngineConfig;

pub use chat::{compose_entry, ChatLog};
pub use room::Room;
pub use visitor::Visitor;

/// Default bound on random name attempts before a suffix is appended
pub const DEFAULT_MAX_NAME_ATTEMPTS: usize = 32;

/// Settings applied to every room built by a service
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub engine: EngineConfig,
    pub max_name_attempts: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            max_name_attempts: DEFAULT_MAX_NAME_ATTEMPTS,
        }
    }
}
