//! Room cache backed by the room and chat-log stores

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ChatLogStore, RoomStore};
use crate::engine::{MediaTransport, WebRtcTransport};
use crate::error::Result;
use crate::protocol::ChatEntry;
use crate::room::{Room, RoomConfig};

/// Process-wide room registry
///
/// Rooms are built on first use and stay cached for the life of the
/// process. A cache miss consults the room store and seeds the room's chat
/// history from the chat-log store.
pub struct RoomsService<T: MediaTransport = WebRtcTransport> {
    rooms: RwLock<HashMap<u32, Arc<Room<T>>>>,
    room_store: Arc<dyn RoomStore>,
    chat_store: Arc<dyn ChatLogStore>,
    transport: Arc<T>,
    config: RoomConfig,
}

impl<T: MediaTransport> RoomsService<T> {
    pub fn new(
        transport: Arc<T>,
        room_store: Arc<dyn RoomStore>,
        chat_store: Arc<dyn ChatLogStore>,
        config: RoomConfig,
    ) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            room_store,
            chat_store,
            transport,
            config,
        }
    }

    /// Allocate, build and cache a new room
    pub async fn create_room(&self) -> Result<Arc<Room<T>>> {
        let id = self.room_store.create_room().await?;
        let room = Room::build(id, Arc::clone(&self.transport), self.config.clone(), Vec::new());

        self.rooms.write().await.insert(id, Arc::clone(&room));

        tracing::info!(room = id, "Room created");
        Ok(room)
    }

    /// Cached room, or one loaded from the stores
    pub async fn room(&self, id: u32) -> Result<Arc<Room<T>>> {
        if let Some(room) = self.rooms.read().await.get(&id) {
            return Ok(Arc::clone(room));
        }

        let id = self.room_store.find_room(id).await?;
        let chat_log = self.chat_store.entries(id).await?;

        let mut rooms = self.rooms.write().await;
        // Another connection may have loaded it meanwhile
        if let Some(room) = rooms.get(&id) {
            return Ok(Arc::clone(room));
        }

        let room = Room::build(id, Arc::clone(&self.transport), self.config.clone(), chat_log);
        rooms.insert(id, Arc::clone(&room));

        tracing::info!(room = id, "Room loaded from store");
        Ok(room)
    }

    /// Append an entry to a room's cache and persist it
    pub async fn save_chat_entry(&self, room: &Room<T>, entry: ChatEntry) -> Result<()> {
        self.chat_store.save_entry(room.id(), &entry).await?;
        room.chat_log().append(entry).await;
        Ok(())
    }

    pub async fn cached_room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, StoreError};
    use crate::service::{MemoryChatLogStore, MemoryRoomStore};
    use crate::testing::FakeTransport;

    fn service_with(
        rooms: Arc<MemoryRoomStore>,
        chat: Arc<MemoryChatLogStore>,
    ) -> RoomsService<FakeTransport> {
        RoomsService::new(Arc::new(FakeTransport::new()), rooms, chat, RoomConfig::default())
    }

    #[tokio::test]
    async fn test_created_room_is_cached() {
        let service = service_with(Arc::new(MemoryRoomStore::new()), Arc::new(MemoryChatLogStore::new()));

        let room = service.create_room().await.unwrap();
        let again = service.room(room.id()).await.unwrap();

        assert!(Arc::ptr_eq(&room, &again));
        assert_eq!(service.cached_room_count().await, 1);
    }

    #[tokio::test]
    async fn test_cache_miss_loads_chat_history() {
        let rooms = Arc::new(MemoryRoomStore::new());
        let chat = Arc::new(MemoryChatLogStore::new());
        let id = rooms.create_room().await.unwrap();
        chat.save_entry(
            id,
            &ChatEntry {
                text: "earlier".into(),
                user_id: 1,
                user_name: "Ann".into(),
                to_user_id: None,
            },
        )
        .await
        .unwrap();

        let service = service_with(rooms, chat);
        let room = service.room(id).await.unwrap();

        let log = room.chat_log().snapshot().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "earlier");
    }

    #[tokio::test]
    async fn test_unknown_room_is_an_error() {
        let service = service_with(Arc::new(MemoryRoomStore::new()), Arc::new(MemoryChatLogStore::new()));

        let err = service.room(77).await.err().unwrap();
        assert!(matches!(err, Error::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_chat_entry_persists_and_caches() {
        let chat = Arc::new(MemoryChatLogStore::new());
        let service = service_with(Arc::new(MemoryRoomStore::new()), Arc::clone(&chat));
        let room = service.create_room().await.unwrap();
        let entry = ChatEntry {
            text: "hi".into(),
            user_id: 2,
            user_name: "Bo".into(),
            to_user_id: None,
        };

        service.save_chat_entry(&room, entry.clone()).await.unwrap();

        assert_eq!(room.chat_log().snapshot().await, vec![entry.clone()]);
        assert_eq!(chat.entries(room.id()).await.unwrap(), vec![entry]);
    }
}
