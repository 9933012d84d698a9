//! Collaborator services
//!
//! Persistence and identity sit behind traits so the dispatcher can run
//! against any backend. In-memory implementations are provided in
//! [`memory`] and [`identity`].

pub mod identity;
pub mod memory;
pub mod password;
pub mod rooms;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, StoreError};
use crate::protocol::{ChatEntry, UserRef};

pub use identity::TokenIdentityService;
pub use memory::{MemoryChatLogStore, MemoryRoomStore};
pub use password::validate_password_strength;
pub use rooms::RoomsService;

/// A persistent identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub has_password: bool,
}

impl User {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            has_password: false,
        }
    }

    pub fn to_ref(&self) -> UserRef {
        UserRef {
            user_id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Identity the token was issued to
    pub user_id: u64,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// Room persistence
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Allocate a new room identifier
    async fn create_room(&self) -> Result<u32, StoreError>;

    /// Confirm a room exists
    async fn find_room(&self, id: u32) -> Result<u32, StoreError>;
}

/// Chat history persistence
#[async_trait]
pub trait ChatLogStore: Send + Sync {
    async fn save_entry(&self, room_id: u32, entry: &ChatEntry) -> Result<(), StoreError>;

    /// Every stored entry of a room, oldest first
    async fn entries(&self, room_id: u32) -> Result<Vec<ChatEntry>, StoreError>;
}

/// Identity provider
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Check a token's signature and expiry
    async fn validate_token(&self, token: &str) -> Result<Claims, IdentityError>;

    /// Sign a token for an identity
    async fn issue_token(&self, user_id: u64) -> Result<String, IdentityError>;

    /// Look up an identity
    async fn user(&self, user_id: u64) -> Result<User, IdentityError>;

    /// Provision a fresh identity with a generated name, plus its token
    async fn create_anonymous_identity(&self) -> Result<(User, String), IdentityError>;

    /// Rename an identity; the name must be non-empty and unused
    async fn update_name(&self, user_id: u64, name: &str) -> Result<User, IdentityError>;

    /// Set or replace an identity's password
    async fn update_password(&self, user_id: u64, password: &str) -> Result<User, IdentityError>;

    /// Resolve a name/password pair to its identity
    async fn validate_name_password(&self, name: &str, password: &str) -> Result<User, IdentityError>;
}
