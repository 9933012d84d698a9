//! Room visitor
//!
//! One signaling connection inside a room. A visitor may or may not have
//! an identity, a media session, and a published stream.

use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock};

use super::room::Room;
use crate::engine::{MediaTransport, WebRtcTransport};
use crate::error::{ProtocolError, Result};
use crate::protocol::{Event, EventWriter, UserRef, VisitorSummary};
use crate::service::User;

pub struct Visitor<T: MediaTransport = WebRtcTransport> {
    id: u64,
    writer: Arc<EventWriter>,
    room: Weak<Room<T>>,
    user: RwLock<Option<User>>,
    stream_id: RwLock<Option<String>>,
    media: Mutex<Option<Arc<T::Session>>>,
}

impl<T: MediaTransport> Visitor<T> {
    pub fn new(id: u64, writer: Arc<EventWriter>, room: &Arc<Room<T>>) -> Arc<Self> {
        Arc::new(Self {
            id,
            writer,
            room: Arc::downgrade(room),
            user: RwLock::new(None),
            stream_id: RwLock::new(None),
            media: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn writer(&self) -> &Arc<EventWriter> {
        &self.writer
    }

    /// The room this visitor is in, while it exists
    pub fn room(&self) -> Option<Arc<Room<T>>> {
        self.room.upgrade()
    }

    pub async fn user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn user_ref(&self) -> Option<UserRef> {
        self.user.read().await.as_ref().map(User::to_ref)
    }

    /// Attach an identity, replacing any previous one
    pub async fn attach_user(&self, user: User) {
        *self.user.write().await = Some(user);
    }

    /// Change the display name of the attached identity
    pub async fn set_display_name(&self, name: &str) -> Result<()> {
        let mut user = self.user.write().await;
        let user = user.as_mut().ok_or(ProtocolError::NotAuthenticated)?;
        user.name = name.to_owned();
        Ok(())
    }

    /// Replace the identity's name with one unique in the room
    pub async fn create_unique_display_name(&self) -> Result<String> {
        if self.user.read().await.is_none() {
            return Err(ProtocolError::NotAuthenticated.into());
        }

        match self.room() {
            Some(room) => room.claim_display_name(self).await,
            None => {
                let name = super::naming::random_name();
                self.set_display_name(&name).await?;
                Ok(name)
            }
        }
    }

    pub async fn stream_id(&self) -> Option<String> {
        self.stream_id.read().await.clone()
    }

    pub async fn set_stream_id(&self, stream_id: String) {
        *self.stream_id.write().await = Some(stream_id);
    }

    pub async fn media_session(&self) -> Option<Arc<T::Session>> {
        self.media.lock().await.clone()
    }

    /// Install a media session, returning the one it replaces
    pub async fn replace_media_session(&self, session: Arc<T::Session>) -> Option<Arc<T::Session>> {
        self.media.lock().await.replace(session)
    }

    pub async fn take_media_session(&self) -> Option<Arc<T::Session>> {
        self.media.lock().await.take()
    }

    pub async fn summary(&self) -> VisitorSummary {
        let user = self.user.read().await;
        VisitorSummary {
            user_id: user.as_ref().map(|u| u.id),
            name: user.as_ref().map(|u| u.name.clone()),
            stream_id: self.stream_id().await,
        }
    }

    /// Write an event to this visitor only
    pub async fn notify(&self, event: &Event) -> Result<()> {
        self.writer.write_event(event).await
    }

    /// Ask this visitor for more input
    pub async fn clarify(&self, ask: &str) -> Result<()> {
        self.writer.write_question(ask).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;
    use crate::testing::{memory_sink, FakeTransport};

    fn room() -> Arc<Room<FakeTransport>> {
        Room::build(1, Arc::new(FakeTransport::new()), RoomConfig::default(), Vec::new())
    }

    #[tokio::test]
    async fn test_unique_name_requires_identity() {
        let room = room();
        let (sink, _inbox) = memory_sink();
        let visitor = Visitor::new(1, Arc::new(EventWriter::new(sink)), &room);

        assert!(visitor.create_unique_display_name().await.is_err());

        visitor.attach_user(User::new(5, "Placeholder")).await;
        let name = visitor.create_unique_display_name().await.unwrap();
        assert_eq!(visitor.user().await.unwrap().name, name);
    }

    #[tokio::test]
    async fn test_notify_and_clarify_reach_only_this_visitor() {
        let room = room();
        let (sink, mut inbox) = memory_sink();
        let visitor = Visitor::new(1, Arc::new(EventWriter::new(sink)), &room);

        visitor.notify(&Event::Error("nope".into())).await.unwrap();
        visitor.clarify("credentials").await.unwrap();

        assert_eq!(inbox.next_event().await, Some(Event::Error("nope".into())));
        assert_eq!(
            inbox.next_event().await,
            Some(Event::Question(crate::protocol::Question::new("credentials")))
        );
    }

    #[tokio::test]
    async fn test_summary_without_identity() {
        let room = room();
        let (sink, _inbox) = memory_sink();
        let visitor = Visitor::new(1, Arc::new(EventWriter::new(sink)), &room);
        visitor.set_stream_id("s-1".into()).await;

        let summary = visitor.summary().await;
        assert_eq!(summary.user_id, None);
        assert_eq!(summary.stream_id.as_deref(), Some("s-1"));
    }
}
