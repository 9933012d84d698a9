//! In-memory chat cache

use tokio::sync::RwLock;

use crate::protocol::ChatEntry;
use crate::service::User;

/// Chat history of one room, seeded from the store when the room is loaded
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: RwLock<Vec<ChatEntry>>,
}

impl ChatLog {
    pub fn new(entries: Vec<ChatEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    pub async fn append(&self, entry: ChatEntry) {
        self.entries.write().await.push(entry);
    }

    /// Copy of the history, oldest first
    pub async fn snapshot(&self) -> Vec<ChatEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Build the record for a message sent by `author`
pub fn compose_entry(author: &User, text: String, to_user_id: Option<u64>) -> ChatEntry {
    ChatEntry {
        text,
        user_id: author.id,
        user_name: author.name.clone(),
        to_user_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_keeps_order() {
        let author = User::new(3, "Ann");
        let log = ChatLog::new(vec![compose_entry(&author, "first".into(), None)]);

        log.append(compose_entry(&author, "second".into(), None)).await;

        let texts: Vec<String> = log.snapshot().await.into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(log.len().await, 2);
    }

    #[test]
    fn test_seeded_log_replays_history() {
        let author = User::new(1, "Cy");
        let log = ChatLog::new(vec![compose_entry(&author, "hello".into(), None)]);

        let snapshot = tokio_test::block_on(log.snapshot());

        assert_eq!(snapshot.len(), 1);
        assert!(!tokio_test::block_on(log.is_empty()));
    }

    #[test]
    fn test_compose_entry_copies_author() {
        let entry = compose_entry(&User::new(9, "Bo"), "hey".into(), Some(2));

        assert_eq!(entry.user_id, 9);
        assert_eq!(entry.user_name, "Bo");
        assert_eq!(entry.to_user_id, Some(2));
    }
}
