//! In-memory room and chat-log stores

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChatLogStore, RoomStore};
use crate::error::StoreError;
use crate::protocol::ChatEntry;

/// Room store keeping identifiers in a set; ids start at 1
pub struct MemoryRoomStore {
    next_id: AtomicU32,
    rooms: RwLock<HashSet<u32>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            rooms: RwLock::new(HashSet::new()),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn create_room(&self) -> Result<u32, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            return Err(StoreError::Backend("room identifiers exhausted".into()));
        }
        self.rooms.write().await.insert(id);
        Ok(id)
    }

    async fn find_room(&self, id: u32) -> Result<u32, StoreError> {
        if self.rooms.read().await.contains(&id) {
            Ok(id)
        } else {
            Err(StoreError::NotFound(format!("room {}", id)))
        }
    }
}

/// Chat-log store keyed by room
#[derive(Default)]
pub struct MemoryChatLogStore {
    entries: RwLock<HashMap<u32, Vec<ChatEntry>>>,
}

impl MemoryChatLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatLogStore for MemoryChatLogStore {
    async fn save_entry(&self, room_id: u32, entry: &ChatEntry) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .entry(room_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn entries(&self, room_id: u32) -> Result<Vec<ChatEntry>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(&room_id)
            .cloned()
            .unwrap_or_default())
    }
}
