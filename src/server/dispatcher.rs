//! Per-connection protocol dispatcher
//!
//! Resolves the room named in the upgrade request, admits the visitor,
//! then reads work orders until the connection ends. Handler failures are
//! reported to the client as `error` events; only a failed read or write
//! on the connection itself ends the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};

use crate::engine::{MediaSession, MediaTransport, WebRtcTransport};
use crate::error::{Error, IdentityError, ProtocolError, Result};
use crate::protocol::order::{Credentials, SetName, SetPassword, UserMessage};
use crate::protocol::{
    Event, EventWriter, FrameSink, JoinedRoom, LoggedIn, StreamName, UserRef, WorkOrder,
};
use crate::room::{compose_entry, Room, Visitor};
use crate::server::config::ServerConfig;
use crate::service::{validate_password_strength, IdentityService, RoomsService, User};
use crate::session::ConnectionState;

/// Question asked after joining
pub const ASK_ACCESS_TOKEN: &str = "access_token";

/// Question asked after an anonymous identity is provisioned
pub const ASK_CREDENTIALS: &str = "credentials";

/// Shared state of every connection
pub struct ServerState<T: MediaTransport = WebRtcTransport> {
    pub config: ServerConfig,
    pub rooms: RoomsService<T>,
    pub identity: Arc<dyn IdentityService>,
    next_visitor_id: AtomicU64,
}

impl<T: MediaTransport> ServerState<T> {
    pub fn new(config: ServerConfig, rooms: RoomsService<T>, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            config,
            rooms,
            identity,
            next_visitor_id: AtomicU64::new(1),
        }
    }

    fn next_visitor_id(&self) -> u64 {
        self.next_visitor_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Serve one signaling connection to completion
///
/// `room_param` is the raw room query parameter; `inbound` yields text
/// frames and ends when the client closes the connection.
pub async fn serve_connection<T, S>(
    state: Arc<ServerState<T>>,
    room_param: Option<String>,
    sink: impl FrameSink,
    inbound: S,
) where
    T: MediaTransport,
    S: Stream<Item = Result<String>> + Send + Unpin,
{
    let id = state.next_visitor_id();
    let writer = Arc::new(EventWriter::new(sink));

    let Some(room) = resolve_room(&state, room_param.as_deref(), &writer).await else {
        writer.close().await;
        return;
    };

    let mut connection = ConnectionState::new(id);
    connection.resolve_room(room.id());

    let visitor = Visitor::new(id, Arc::clone(&writer), &room);
    room.add_visitor(Arc::clone(&visitor)).await;

    tracing::info!(visitor = id, room = room.id(), "Visitor joined room");

    let mut dispatcher = Dispatcher {
        state,
        room,
        visitor,
        connection,
    };

    match dispatcher.welcome().await {
        Ok(()) => dispatcher.run(inbound).await,
        Err(e) => tracing::debug!(visitor = id, error = %e, "Welcome failed"),
    }

    dispatcher.teardown().await;
}

/// Existing room for a valid identifier, otherwise `None` after a new room
/// has been created and announced (or an error reported)
async fn resolve_room<T: MediaTransport>(
    state: &ServerState<T>,
    room_param: Option<&str>,
    writer: &EventWriter,
) -> Option<Arc<Room<T>>> {
    let requested = room_param
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|id| *id != 0);

    if let Some(id) = requested {
        match state.rooms.room(id).await {
            Ok(room) => return Some(room),
            Err(e) => tracing::debug!(room = id, error = %e, "Requested room unavailable"),
        }
    }

    let event = match state.rooms.create_room().await {
        Ok(room) => Event::CreatedRoom(room.id().to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Room creation failed");
            Event::Error(e.client_message())
        }
    };

    if let Err(e) = writer.write_event(&event).await {
        tracing::debug!(error = %e, "Room announcement failed");
    }
    None
}

struct Dispatcher<T: MediaTransport> {
    state: Arc<ServerState<T>>,
    room: Arc<Room<T>>,
    visitor: Arc<Visitor<T>>,
    connection: ConnectionState,
}

impl<T: MediaTransport> Dispatcher<T> {
    async fn welcome(&self) -> Result<()> {
        let joined = JoinedRoom {
            room_id: self.room.id(),
            chat_log: self.room.chat_log().snapshot().await,
            visitors: self.room.roster().await,
        };

        self.visitor.notify(&Event::JoinedRoom(joined)).await?;
        self.visitor.clarify(ASK_ACCESS_TOKEN).await
    }

    async fn run<S>(&mut self, mut inbound: S)
    where
        S: Stream<Item = Result<String>> + Send + Unpin,
    {
        while let Some(frame) = inbound.next().await {
            let text = match frame {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(visitor = self.connection.id, error = %e, "Read failed");
                    break;
                }
            };

            let result = match WorkOrder::parse(&text) {
                Ok(order) => {
                    self.connection.record_order();
                    tracing::trace!(visitor = self.connection.id, order = order.name(), "Work order");
                    self.handle(order).await
                }
                Err(e) => Err(e.into()),
            };

            if let Err(e) = result {
                if e.is_fatal() {
                    tracing::debug!(visitor = self.connection.id, error = %e, "Write failed");
                    break;
                }
                if self.report(&e).await.is_err() {
                    break;
                }
            }
        }
    }

    async fn report(&mut self, error: &Error) -> Result<()> {
        self.connection.record_error();
        tracing::debug!(visitor = self.connection.id, error = %error, "Work order failed");
        self.visitor
            .notify(&Event::Error(error.client_message()))
            .await
    }

    async fn handle(&mut self, order: WorkOrder) -> Result<()> {
        match order {
            WorkOrder::MediaRequest => self.media_request().await,
            WorkOrder::ValidateAccessToken(token) => self.validate_access_token(&token).await,
            WorkOrder::Candidate(candidate) => {
                let session = self.media_session().await?;
                session.add_remote_candidate(&candidate).await?;
                Ok(())
            }
            WorkOrder::Answer(answer) => {
                let session = self.media_session().await?;
                session.set_remote_answer(&answer).await?;
                Ok(())
            }
            WorkOrder::UserMessage(message) => self.user_message(message).await,
            WorkOrder::SetUserPassword(SetPassword { password }) => self.set_user_password(&password).await,
            WorkOrder::SetUserName(SetName { name }) => self.set_user_name(&name).await,
            WorkOrder::ValidateUserNamePassword(Credentials { name, password }) => {
                let user = self.state.identity.validate_name_password(&name, &password).await?;
                let token = self.state.identity.issue_token(user.id).await?;
                self.log_in(user, token).await
            }
            WorkOrder::IdentifyStreamid(request) => self.identify_stream(request.stream_id).await,
            WorkOrder::GetCurrentGuests => {
                let guests = self.room.guests().await;
                self.visitor.notify(&Event::CurrentGuests(guests)).await
            }
            WorkOrder::CloseConnection => self.close_media().await,
        }
    }

    async fn media_session(&self) -> Result<Arc<T::Session>> {
        self.visitor
            .media_session()
            .await
            .ok_or_else(|| ProtocolError::NoMediaSession.into())
    }

    /// Close the visitor's media session; signaling stays open
    ///
    /// The session's closed event triggers the convergence that prunes it.
    async fn close_media(&mut self) -> Result<()> {
        let session = self
            .visitor
            .take_media_session()
            .await
            .ok_or(ProtocolError::NoMediaSession)?;

        tracing::info!(visitor = self.connection.id, "Media session closed by client");
        session.close().await?;
        Ok(())
    }

    async fn media_request(&mut self) -> Result<()> {
        self.room.attach_media(&self.visitor).await?;
        self.connection.activate_media();
        Ok(())
    }

    async fn validate_access_token(&mut self, token: &str) -> Result<()> {
        let known = match self.state.identity.validate_token(token).await {
            Ok(claims) => self.state.identity.user(claims.user_id).await.ok(),
            Err(_) => None,
        };

        match known {
            Some(user) => {
                let token = self.state.identity.issue_token(user.id).await?;
                self.log_in(user, token).await
            }
            None => self.provision_anonymous().await,
        }
    }

    /// Attach an identity, confirm it to the visitor and announce it
    async fn log_in(&mut self, user: User, access_token: String) -> Result<()> {
        let user_ref = user.to_ref();
        self.visitor.attach_user(user).await;
        self.connection.authenticate();

        tracing::info!(visitor = self.connection.id, user_id = user_ref.user_id, "Visitor logged in");

        self.visitor
            .notify(&Event::UserLoggedIn(LoggedIn {
                user_id: user_ref.user_id,
                name: user_ref.name.clone(),
                access_token,
            }))
            .await?;

        self.room.broadcast_event(&Event::UserJoinedChat(user_ref)).await;
        Ok(())
    }

    async fn provision_anonymous(&mut self) -> Result<()> {
        let (user, access_token) = self.state.identity.create_anonymous_identity().await?;
        let user_id = user.id;
        let stored_name = user.name.clone();
        self.visitor.attach_user(user).await;
        self.connection.authenticate();

        let name = self.claim_stored_name(user_id, stored_name).await?;

        tracing::info!(visitor = self.connection.id, user_id = user_id, name = %name, "Anonymous visitor");

        self.visitor
            .notify(&Event::UserLoggedIn(LoggedIn {
                user_id,
                name: name.clone(),
                access_token,
            }))
            .await?;
        self.visitor.clarify(ASK_CREDENTIALS).await?;

        self.room
            .broadcast_event(&Event::UserJoinedChat(UserRef { user_id, name }))
            .await;
        Ok(())
    }

    /// Pick a room-unique display name the identity store also accepts
    ///
    /// Names the store refuses are redrawn. If every draw is refused the
    /// visitor keeps the name the store issued.
    async fn claim_stored_name(&mut self, user_id: u64, stored_name: String) -> Result<String> {
        for _ in 0..self.state.config.max_name_attempts.max(1) {
            let name = self.visitor.create_unique_display_name().await?;

            match self.state.identity.update_name(user_id, &name).await {
                Ok(user) => return Ok(user.name),
                Err(IdentityError::NameUnavailable(taken)) => {
                    tracing::debug!(user_id = user_id, name = %taken, "Display name taken in store, redrawing");
                }
                Err(e) => {
                    tracing::debug!(user_id = user_id, error = %e, "Display name kept local");
                    return Ok(name);
                }
            }
        }

        tracing::warn!(user_id = user_id, name = %stored_name, "No room-unique name accepted, using stored name");
        self.visitor.set_display_name(&stored_name).await?;
        Ok(stored_name)
    }

    async fn user_message(&mut self, message: UserMessage) -> Result<()> {
        let author = self
            .visitor
            .user()
            .await
            .ok_or(ProtocolError::NotAuthenticated)?;
        let entry = compose_entry(&author, message.text, message.to_user_id);

        match message.to_user_id {
            Some(recipient) => {
                let recipients = self.room.visitors_with_user(recipient).await;
                if recipients.is_empty() {
                    return Err(ProtocolError::RecipientNotPresent.into());
                }

                let event = Event::UserMessage(entry);
                for visitor in recipients {
                    if let Err(e) = visitor.notify(&event).await {
                        tracing::debug!(visitor = visitor.id(), error = %e, "Direct message write failed");
                    }
                }
                Ok(())
            }
            None => {
                self.room
                    .broadcast_event(&Event::UserMessage(entry.clone()))
                    .await;
                self.state.rooms.save_chat_entry(&self.room, entry).await
            }
        }
    }

    async fn set_user_password(&mut self, password: &str) -> Result<()> {
        validate_password_strength(password)?;
        let user = self
            .visitor
            .user()
            .await
            .ok_or(ProtocolError::NotAuthenticated)?;

        self.state.identity.update_password(user.id, password).await?;
        let access_token = self.state.identity.issue_token(user.id).await?;

        self.visitor
            .attach_user(User {
                has_password: true,
                ..user.clone()
            })
            .await;

        tracing::info!(visitor = self.connection.id, user_id = user.id, "Password set");

        self.visitor
            .notify(&Event::UserLoggedIn(LoggedIn {
                user_id: user.id,
                name: user.name,
                access_token,
            }))
            .await
    }

    async fn set_user_name(&mut self, name: &str) -> Result<()> {
        let current = self
            .visitor
            .user()
            .await
            .ok_or(ProtocolError::NotAuthenticated)?;

        let stored = self.state.identity.user(current.id).await?;
        if !stored.has_password {
            return Err(IdentityError::PasswordRequired.into());
        }

        let updated = self.state.identity.update_name(current.id, name).await?;
        self.visitor.set_display_name(&updated.name).await?;

        self.visitor
            .notify(&Event::UserNameChange(updated.to_ref()))
            .await?;

        if let Some(stream_id) = self.visitor.stream_id().await {
            self.room
                .broadcast_event(&Event::StreamidUserName(StreamName {
                    stream_id,
                    name: updated.name,
                }))
                .await;
        }
        Ok(())
    }

    async fn identify_stream(&mut self, stream_id: String) -> Result<()> {
        let owner = self
            .room
            .find_by_stream(&stream_id)
            .await
            .ok_or_else(|| ProtocolError::UnknownStream(stream_id.clone()))?;
        let name = owner.user().await.map(|u| u.name).unwrap_or_default();

        self.room
            .broadcast_event(&Event::StreamidUserName(StreamName { stream_id, name }))
            .await;
        Ok(())
    }

    /// Close media, leave the room and announce the departure
    async fn teardown(&mut self) {
        self.connection.close();

        if let Some(session) = self.visitor.take_media_session().await {
            if let Err(e) = session.close().await {
                tracing::debug!(visitor = self.connection.id, error = %e, "Media session close failed");
            }
            self.room.engine().converge().await;
        }

        if let Some(visitor) = self.room.remove_visitor(self.visitor.id()).await {
            if let Some(user) = visitor.user_ref().await {
                self.room
                    .broadcast_event(&Event::UserExitedChat(user))
                    .await;
            }
        }

        self.visitor.writer().close().await;

        tracing::info!(
            visitor = self.connection.id,
            room = self.room.id(),
            orders = self.connection.orders_handled,
            errors = self.connection.errors_reported,
            duration_ms = self.connection.duration().as_millis() as u64,
            "Visitor left room"
        );
    }
}
