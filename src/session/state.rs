//! Connection state machine
//!
//! Tracks one signaling connection from upgrade to teardown.

use std::time::Instant;

/// Connection lifecycle phase
///
/// ```text
/// Connecting ─► RoomResolved ─► Authenticated ─► SessionActive ─► Closed
///                    │                ▲                              ▲
///                    └── media_request┴──────────────────────────────┘
/// ```
///
/// Authentication is optional: a visitor may request media before it has
/// an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Upgraded, room not yet resolved
    Connecting,
    /// Joined an existing room
    RoomResolved,
    /// Visitor has an identity
    Authenticated,
    /// Visitor has a media session
    SessionActive,
    /// Torn down
    Closed,
}

/// Per-connection bookkeeping
#[derive(Debug)]
pub struct ConnectionState {
    /// Unique connection (visitor) id
    pub id: u64,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Upgrade time
    pub connected_at: Instant,

    /// Room joined, once resolved
    pub room_id: Option<u32>,

    /// Time the visitor first gained an identity
    pub authenticated_at: Option<Instant>,

    /// Work orders processed
    pub orders_handled: u64,

    /// Error events sent back to the client
    pub errors_reported: u64,
}

impl ConnectionState {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            phase: ConnectionPhase::Connecting,
            connected_at: Instant::now(),
            room_id: None,
            authenticated_at: None,
            orders_handled: 0,
            errors_reported: 0,
        }
    }

    /// Room found; the visitor is in it
    pub fn resolve_room(&mut self, room_id: u32) {
        if self.phase == ConnectionPhase::Connecting {
            self.phase = ConnectionPhase::RoomResolved;
            self.room_id = Some(room_id);
        }
    }

    /// Visitor gained (or replaced) its identity
    pub fn authenticate(&mut self) {
        if self.authenticated_at.is_none() {
            self.authenticated_at = Some(Instant::now());
        }
        if self.phase == ConnectionPhase::RoomResolved {
            self.phase = ConnectionPhase::Authenticated;
        }
    }

    /// Visitor has a media session
    pub fn activate_media(&mut self) {
        if matches!(
            self.phase,
            ConnectionPhase::RoomResolved | ConnectionPhase::Authenticated
        ) {
            self.phase = ConnectionPhase::SessionActive;
        }
    }

    pub fn record_order(&mut self) {
        self.orders_handled += 1;
    }

    pub fn record_error(&mut self) {
        self.errors_reported += 1;
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_at.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Connection duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lifecycle() {
        let mut state = ConnectionState::new(1);
        assert_eq!(state.phase, ConnectionPhase::Connecting);

        state.resolve_room(12);
        assert_eq!(state.phase, ConnectionPhase::RoomResolved);
        assert_eq!(state.room_id, Some(12));

        state.authenticate();
        assert_eq!(state.phase, ConnectionPhase::Authenticated);
        assert!(state.is_authenticated());

        state.activate_media();
        assert_eq!(state.phase, ConnectionPhase::SessionActive);

        state.close();
        assert!(state.is_closed());
    }

    #[test]
    fn test_media_before_authentication() {
        let mut state = ConnectionState::new(1);
        state.resolve_room(3);

        state.activate_media();
        assert_eq!(state.phase, ConnectionPhase::SessionActive);

        state.authenticate();
        assert_eq!(state.phase, ConnectionPhase::SessionActive);
        assert!(state.is_authenticated());
    }

    #[test]
    fn test_media_requires_room() {
        let mut state = ConnectionState::new(1);

        state.activate_media();
        assert_eq!(state.phase, ConnectionPhase::Connecting);
    }

    #[test]
    fn test_counters() {
        let mut state = ConnectionState::new(1);
        state.record_order();
        state.record_order();
        state.record_error();

        assert_eq!(state.orders_handled, 2);
        assert_eq!(state.errors_reported, 1);
    }
}
