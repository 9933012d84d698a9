//! Websocket listener
//!
//! Serves the signaling endpoint over HTTP and hands each upgraded socket
//! to the dispatcher.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{future, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::engine::{MediaTransport, WebRtcTransport};
use crate::error::{Error, Result};
use crate::server::config::ServerConfig;
use crate::server::dispatcher::{serve_connection, ServerState};
use crate::service::{IdentityService, RoomsService};

/// Room server
pub struct RoomServer<T: MediaTransport = WebRtcTransport> {
    state: Arc<ServerState<T>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

struct AppState<T: MediaTransport> {
    server: Arc<ServerState<T>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<T: MediaTransport> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
            connection_semaphore: self.connection_semaphore.clone(),
        }
    }
}

impl<T: MediaTransport> RoomServer<T> {
    /// Create a new server with the given configuration and collaborators
    pub fn new(
        config: ServerConfig,
        rooms: RoomsService<T>,
        identity: Arc<dyn IdentityService>,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            state: Arc::new(ServerState::new(config, rooms, identity)),
            connection_semaphore,
        }
    }

    /// Shared connection state
    pub fn state(&self) -> &Arc<ServerState<T>> {
        &self.state
    }

    /// HTTP router serving the websocket endpoint
    pub fn router(&self) -> Router {
        let app = AppState {
            server: Arc::clone(&self.state),
            connection_semaphore: self.connection_semaphore.clone(),
        };

        Router::new()
            .route(&self.state.config.ws_path, get(ws_handler::<T>))
            .with_state(app)
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.state.config.ws_path,
            "Room server listening"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        Ok(())
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.state.config.bind_addr
    }
}

async fn ws_handler<T: MediaTransport>(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(app): State<AppState<T>>,
) -> Response {
    // Check connection limit
    let permit = match &app.connection_semaphore {
        Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Connection rejected: limit reached");
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    let room_param = params.get(&app.server.config.room_query_param).cloned();

    ws.on_upgrade(move |socket| async move {
        let _permit = permit;
        handle_socket(app.server, room_param, socket).await;
    })
}

async fn handle_socket<T: MediaTransport>(
    server: Arc<ServerState<T>>,
    room_param: Option<String>,
    socket: WebSocket,
) {
    let (sink, stream) = socket.split();

    let inbound = stream
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(Error::Transport(e.to_string()))),
            })
        });

    serve_connection(server, room_param, sink, Box::pin(inbound)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;
    use crate::service::{MemoryChatLogStore, MemoryRoomStore, TokenIdentityService};
    use crate::testing::FakeTransport;
    use std::time::Duration;

    fn server(config: ServerConfig) -> RoomServer<FakeTransport> {
        let rooms = RoomsService::new(
            Arc::new(FakeTransport::new()),
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryChatLogStore::new()),
            RoomConfig::default(),
        );
        let identity = Arc::new(TokenIdentityService::new(b"secret", Duration::from_secs(60)));
        RoomServer::new(config, rooms, identity)
    }

    #[test]
    fn test_connection_limit_creates_semaphore() {
        let limited = server(ServerConfig::default().max_connections(2));
        let unlimited = server(ServerConfig::default());

        assert_eq!(
            limited
                .connection_semaphore
                .as_ref()
                .map(|s| s.available_permits()),
            Some(2)
        );
        assert!(unlimited.connection_semaphore.is_none());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let server = server(ServerConfig::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            server.serve(listener, async {}),
        )
        .await
        .unwrap();

        assert!(result.is_ok());
    }
}
