//! Room implementation

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use super::chat::ChatLog;
use super::naming;
use super::visitor::Visitor;
use super::RoomConfig;
use crate::engine::{
    ForwardTrack, ForwardingEngine, MediaSession, MediaTransport, SessionEvent, SessionEvents,
    SessionState, WebRtcTransport,
};
use crate::error::Result;
use crate::protocol::{ChatEntry, Event, UserRef, VisitorSummary};

/// A room: its forwarding engine, roster and chat cache
pub struct Room<T: MediaTransport = WebRtcTransport> {
    id: u32,
    engine: Arc<ForwardingEngine<T>>,
    visitors: RwLock<Vec<Arc<Visitor<T>>>>,
    chat_log: ChatLog,
    naming: Mutex<()>,
    max_name_attempts: usize,
    keyframe_task: JoinHandle<()>,
}

impl<T: MediaTransport> Room<T> {
    /// Create a room with a fresh engine and start its keyframe refresh task
    pub fn build(id: u32, transport: Arc<T>, config: RoomConfig, chat_log: Vec<ChatEntry>) -> Arc<Self> {
        let engine = Arc::new(ForwardingEngine::new(id, transport, config.engine));
        let keyframe_task = engine.spawn_keyframe_task();

        tracing::info!(room = id, chat_entries = chat_log.len(), "Room built");

        Arc::new(Self {
            id,
            engine,
            visitors: RwLock::new(Vec::new()),
            chat_log: ChatLog::new(chat_log),
            naming: Mutex::new(()),
            max_name_attempts: config.max_name_attempts,
            keyframe_task,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn engine(&self) -> &Arc<ForwardingEngine<T>> {
        &self.engine
    }

    pub fn chat_log(&self) -> &ChatLog {
        &self.chat_log
    }

    /// Add a visitor to the roster
    pub async fn add_visitor(&self, visitor: Arc<Visitor<T>>) {
        let mut visitors = self.visitors.write().await;
        visitors.push(visitor);

        tracing::debug!(room = self.id, visitors = visitors.len(), "Visitor added");
    }

    /// Remove a visitor from the roster
    ///
    /// Returns the visitor only to the first caller; later calls for the
    /// same id get `None`.
    pub async fn remove_visitor(&self, visitor_id: u64) -> Option<Arc<Visitor<T>>> {
        let mut visitors = self.visitors.write().await;
        let index = visitors.iter().position(|v| v.id() == visitor_id)?;
        let visitor = visitors.remove(index);

        tracing::debug!(
            room = self.id,
            visitor = visitor_id,
            visitors = visitors.len(),
            "Visitor removed"
        );
        Some(visitor)
    }

    /// Snapshot of the roster
    pub async fn visitors(&self) -> Vec<Arc<Visitor<T>>> {
        self.visitors.read().await.clone()
    }

    pub async fn visitor_count(&self) -> usize {
        self.visitors.read().await.len()
    }

    /// Write an event to every visitor
    ///
    /// Writes run concurrently; a failed write is logged and does not stop
    /// delivery to the others. Returns the number of successful writes.
    pub async fn broadcast_event(&self, event: &Event) -> usize {
        let visitors = self.visitors().await;

        let results = join_all(visitors.iter().map(|visitor| async move {
            (visitor.id(), visitor.notify(event).await)
        }))
        .await;

        let mut delivered = 0;
        for (visitor, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(room = self.id, visitor = visitor, event = event.name(), error = %e, "Broadcast write failed");
                }
            }
        }
        delivered
    }

    /// Give `visitor` a display name no other identified visitor here holds
    pub async fn claim_display_name(&self, visitor: &Visitor<T>) -> Result<String> {
        let _naming = self.naming.lock().await;

        let mut taken = HashSet::new();
        for other in self.visitors().await {
            if other.id() == visitor.id() {
                continue;
            }
            if let Some(user) = other.user().await {
                if !user.name.is_empty() {
                    taken.insert(user.name);
                }
            }
        }

        let name = naming::unique_name(self.max_name_attempts, |candidate| taken.contains(candidate));
        visitor.set_display_name(&name).await?;
        Ok(name)
    }

    /// Roster entries sent to a joining visitor
    pub async fn roster(&self) -> Vec<VisitorSummary> {
        let mut roster = Vec::new();
        for visitor in self.visitors().await {
            roster.push(visitor.summary().await);
        }
        roster
    }

    /// Identified visitors, one entry per identity
    pub async fn guests(&self) -> Vec<UserRef> {
        let mut seen = HashSet::new();
        let mut guests = Vec::new();
        for visitor in self.visitors().await {
            if let Some(user) = visitor.user_ref().await {
                if seen.insert(user.user_id) {
                    guests.push(user);
                }
            }
        }
        guests
    }

    /// Visitor publishing the given stream
    pub async fn find_by_stream(&self, stream_id: &str) -> Option<Arc<Visitor<T>>> {
        for visitor in self.visitors().await {
            if visitor.stream_id().await.as_deref() == Some(stream_id) {
                return Some(visitor);
            }
        }
        None
    }

    /// Every visitor carrying the given identity
    pub async fn visitors_with_user(&self, user_id: u64) -> Vec<Arc<Visitor<T>>> {
        let mut matches = Vec::new();
        for visitor in self.visitors().await {
            if visitor.user().await.map(|u| u.id) == Some(user_id) {
                matches.push(visitor);
            }
        }
        matches
    }

    /// Create a media session for `visitor` and join it to the engine
    ///
    /// A previous session of the same visitor is closed first. Lifecycle
    /// events of the new session are handled on a spawned task.
    pub async fn attach_media(self: &Arc<Self>, visitor: &Arc<Visitor<T>>) -> Result<()> {
        let (session, events) = self.engine.create_session().await?;

        if let Some(previous) = visitor.replace_media_session(Arc::clone(&session)).await {
            if let Err(e) = previous.close().await {
                tracing::debug!(room = self.id, visitor = visitor.id(), error = %e, "Previous session close failed");
            }
        }

        self.engine
            .add_session(Arc::clone(&session), Arc::clone(visitor.writer()))
            .await;

        tokio::spawn(drive_session(
            Arc::downgrade(self),
            Arc::downgrade(visitor),
            session,
            events,
        ));

        tracing::info!(room = self.id, visitor = visitor.id(), "Media session attached");

        self.engine.converge().await;
        Ok(())
    }
}

impl<T: MediaTransport> Drop for Room<T> {
    fn drop(&mut self) {
        self.keyframe_task.abort();
    }
}

/// Consume one session's lifecycle events until the session is gone
async fn drive_session<T: MediaTransport>(
    room: Weak<Room<T>>,
    visitor: Weak<Visitor<T>>,
    session: Arc<T::Session>,
    mut events: SessionEvents<T::Remote>,
) {
    while let Some(event) = events.recv().await {
        let Some(room) = room.upgrade() else {
            break;
        };

        match event {
            SessionEvent::Candidate(candidate) => {
                if let Some(visitor) = visitor.upgrade() {
                    if let Err(e) = visitor.notify(&Event::Candidate(candidate)).await {
                        tracing::debug!(room = room.id, error = %e, "Candidate notification failed");
                    }
                }
            }
            SessionEvent::StateChanged(SessionState::Failed) => {
                tracing::info!(room = room.id, "Media session failed, closing");
                if let Err(e) = session.close().await {
                    tracing::debug!(room = room.id, error = %e, "Session close failed");
                }
            }
            SessionEvent::StateChanged(SessionState::Closed) => {
                room.engine.converge().await;
                break;
            }
            SessionEvent::StateChanged(state) => {
                tracing::debug!(room = room.id, state = ?state, "Media session state changed");
            }
            SessionEvent::Track(remote) => {
                tokio::spawn(forward_track(
                    Arc::clone(&room.engine),
                    visitor.clone(),
                    Arc::clone(&session),
                    remote,
                ));
            }
        }
    }
}

/// Register an inbound track, forward it until it ends, then unregister it
///
/// A track that cannot be mirrored closes the publishing session.
async fn forward_track<T: MediaTransport>(
    engine: Arc<ForwardingEngine<T>>,
    visitor: Weak<Visitor<T>>,
    session: Arc<T::Session>,
    remote: T::Remote,
) {
    let transport = Arc::clone(engine.transport());

    if let Some(visitor) = visitor.upgrade() {
        visitor.set_stream_id(transport.remote_stream_id(&remote)).await;
    }

    let track = match engine.add_track(&remote).await {
        Ok(track) => track,
        Err(e) => {
            tracing::warn!(track = %transport.remote_track_id(&remote), error = %e, "Inbound track not forwarded");
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Session close failed");
            }
            return;
        }
    };

    transport.forward(&remote, &track).await;

    engine.remove_track(track.id()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EventWriter;
    use crate::service::User;
    use crate::testing::{broken_sink, memory_sink, FakeTransport, Inbox};

    fn room() -> Arc<Room<FakeTransport>> {
        Room::build(4, Arc::new(FakeTransport::new()), RoomConfig::default(), Vec::new())
    }

    async fn enter(room: &Arc<Room<FakeTransport>>, id: u64) -> (Arc<Visitor<FakeTransport>>, Inbox) {
        let (sink, inbox) = memory_sink();
        let visitor = Visitor::new(id, Arc::new(EventWriter::new(sink)), room);
        room.add_visitor(Arc::clone(&visitor)).await;
        (visitor, inbox)
    }

    #[tokio::test]
    async fn test_remove_visitor_exactly_once() {
        let room = room();
        let (visitor, _inbox) = enter(&room, 1).await;

        assert!(room.remove_visitor(visitor.id()).await.is_some());
        assert!(room.remove_visitor(visitor.id()).await.is_none());
        assert_eq!(room.visitor_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_survives_broken_writer() {
        let room = room();
        let (_a, mut inbox_a) = enter(&room, 1).await;
        let broken = Visitor::new(2, Arc::new(EventWriter::new(broken_sink())), &room);
        room.add_visitor(broken).await;
        let (_c, mut inbox_c) = enter(&room, 3).await;

        let delivered = room.broadcast_event(&Event::Error("hello".into())).await;

        assert_eq!(delivered, 2);
        assert_eq!(inbox_a.next_event().await, Some(Event::Error("hello".into())));
        assert_eq!(inbox_c.next_event().await, Some(Event::Error("hello".into())));
    }

    #[tokio::test]
    async fn test_display_names_unique_in_room() {
        let room = room();
        let mut names = HashSet::new();

        for id in 0..30 {
            let (visitor, _inbox) = enter(&room, id).await;
            visitor.attach_user(User::new(id, "")).await;
            let name = visitor.create_unique_display_name().await.unwrap();
            assert!(names.insert(name));
        }
    }

    #[tokio::test]
    async fn test_guests_deduplicated_by_identity() {
        let room = room();
        let (a, _ia) = enter(&room, 1).await;
        let (b, _ib) = enter(&room, 2).await;
        let (_c, _ic) = enter(&room, 3).await;
        a.attach_user(User::new(7, "Ann")).await;
        b.attach_user(User::new(7, "Ann")).await;

        let guests = room.guests().await;

        assert_eq!(
            guests,
            vec![UserRef {
                user_id: 7,
                name: "Ann".into()
            }]
        );
        assert_eq!(room.roster().await.len(), 3);
        assert_eq!(room.visitors_with_user(7).await.len(), 2);
    }

    #[tokio::test]
    async fn test_attach_media_sends_offer() {
        let room = room();
        let (visitor, mut inbox) = enter(&room, 1).await;

        room.attach_media(&visitor).await.unwrap();

        assert!(visitor.media_session().await.is_some());
        assert_eq!(room.engine().session_count().await, 1);
        assert_eq!(inbox.next_event().await.unwrap().name(), "offer");
    }

    #[tokio::test]
    async fn test_find_by_stream() {
        let room = room();
        let (visitor, _inbox) = enter(&room, 1).await;
        visitor.set_stream_id("cam-1".into()).await;

        assert_eq!(room.find_by_stream("cam-1").await.map(|v| v.id()), Some(1));
        assert!(room.find_by_stream("cam-2").await.is_none());
    }
}
