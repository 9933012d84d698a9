//! Server configuration

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::room::{RoomConfig, DEFAULT_MAX_NAME_ATTEMPTS};
use crate::service::identity::DEFAULT_TOKEN_TTL;

/// Environment variable for the bind address
pub const ENV_ADDR: &str = "ROOM_SFU_ADDR";

/// Environment variable for the token signing secret
pub const ENV_TOKEN_SECRET: &str = "ROOM_SFU_TOKEN_SECRET";

/// Environment variable for the connection limit
pub const ENV_MAX_CONNECTIONS: &str = "ROOM_SFU_MAX_CONNECTIONS";

/// Environment variable for comma-separated ICE server URLs
pub const ENV_ICE_SERVERS: &str = "ROOM_SFU_ICE_SERVERS";

/// Server configuration options
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Path the websocket endpoint is served on
    pub ws_path: String,

    /// Query parameter carrying the room identifier
    pub room_query_param: String,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Random name attempts before a numeric suffix is used
    pub max_name_attempts: usize,

    /// HS256 signing secret for access tokens
    pub token_secret: Vec<u8>,

    /// Access token lifetime
    pub token_ttl: Duration,

    /// Forwarding engine settings
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            room_query_param: "room".to_string(),
            max_connections: 0, // Unlimited
            max_name_attempts: DEFAULT_MAX_NAME_ATTEMPTS,
            token_secret: random_secret(),
            token_ttl: DEFAULT_TOKEN_TTL,
            engine: EngineConfig::default(),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("ws_path", &self.ws_path)
            .field("room_query_param", &self.room_query_param)
            .field("max_connections", &self.max_connections)
            .field("max_name_attempts", &self.max_name_attempts)
            .field("token_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("engine", &self.engine)
            .finish()
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Defaults overridden by `ROOM_SFU_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_ADDR) {
            config.bind_addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", ENV_ADDR, e)))?;
        }

        match lookup(ENV_TOKEN_SECRET) {
            Some(secret) if !secret.is_empty() => config.token_secret = secret.into_bytes(),
            _ => tracing::warn!(
                "{} not set, tokens will not survive a restart",
                ENV_TOKEN_SECRET
            ),
        }

        if let Some(max) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = max
                .parse()
                .map_err(|e| Error::Config(format!("{}: {}", ENV_MAX_CONNECTIONS, e)))?;
        }

        if let Some(servers) = lookup(ENV_ICE_SERVERS) {
            for url in servers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                config.engine = config.engine.ice_server(url);
            }
        }

        Ok(config)
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the websocket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the token signing secret
    pub fn token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.token_secret = secret.into();
        self
    }

    /// Set the access token lifetime
    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Set the forwarding engine settings
    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Settings for rooms built by this server
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            engine: self.engine.clone(),
            max_name_attempts: self.max_name_attempts,
        }
    }
}

fn random_secret() -> Vec<u8> {
    rand::thread_rng().gen::<[u8; 32]>().to_vec()
}
