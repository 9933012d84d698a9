//! Room server binary
//!
//! Run with: cargo run --bin room-sfu-server
//!
//! Configuration comes from the environment:
//!   ROOM_SFU_ADDR             bind address (default 0.0.0.0:8080)
//!   ROOM_SFU_TOKEN_SECRET     access token signing secret
//!   ROOM_SFU_MAX_CONNECTIONS  concurrent connection limit (0 = unlimited)
//!   ROOM_SFU_ICE_SERVERS      comma-separated STUN/TURN URLs
//!   RUST_LOG                  log filter
//!
//! Clients connect to ws://HOST:PORT/ws?room=ID. Without a valid room id a
//! new room is created and its id returned in a `created_room` event.

use std::sync::Arc;

use room_sfu::engine::WebRtcTransport;
use room_sfu::service::{MemoryChatLogStore, MemoryRoomStore, RoomsService, TokenIdentityService};
use room_sfu::{RoomServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("room_sfu=info".parse()?)
                .add_directive("room_sfu_server=info".parse()?),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let transport = Arc::new(WebRtcTransport::new(&config.engine)?);
    let rooms = RoomsService::new(
        transport,
        Arc::new(MemoryRoomStore::new()),
        Arc::new(MemoryChatLogStore::new()),
        config.room_config(),
    );
    let identity = Arc::new(
        TokenIdentityService::new(&config.token_secret, config.token_ttl)
            .with_name_attempts(config.max_name_attempts),
    );

    let server = RoomServer::new(config, rooms, identity);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
        })
        .await?;

    Ok(())
}
