use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ServiceResult;
use crate::notification::Notification;

/// Conversation session kinds known to the chat backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    #[default]
    Single,
    WriteGroup,
    ReadGroup,
    Notification,
}

/// A user's view onto a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMember {
    pub user_id: String,
    /// Highest sequence the user has read.
    #[serde(default)]
    pub has_read_seq: i64,
}

impl ConversationMember {
    pub fn new(user_id: impl Into<String>, has_read_seq: i64) -> Self {
        Self {
            user_id: user_id.into(),
            has_read_seq,
        }
    }
}

/// A conversation as listed by the conversation service.
///
/// `retained_floor` is the lowest sequence still guaranteed present. It never
/// decreases and never exceeds `max_seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    #[serde(default)]
    pub session_type: SessionType,
    pub max_seq: i64,
    pub retained_floor: i64,
    #[serde(default)]
    pub members: Vec<ConversationMember>,
}

/// One page of a conversation listing (1-based page numbers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Page {
    pub fn first(size: u32) -> Self {
        Self { number: 1, size }
    }

    pub fn next(self) -> Self {
        Self {
            number: self.number + 1,
            size: self.size,
        }
    }

    /// Offset of the first item on this page.
    pub fn offset(&self) -> usize {
        (self.number.saturating_sub(1) as usize) * self.size as usize
    }
}

/// Message service: sequence ranges by age and physical deletion.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Highest sequence whose message timestamp is strictly older than
    /// `cutoff`, or `None` when no message qualifies.
    async fn list_aged_boundary(
        &self,
        conversation_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Option<i64>>;

    /// Physically delete the given sequences. Already-deleted sequences are
    /// not an error and are not counted.
    async fn delete_physical(&self, conversation_id: &str, seqs: &[i64]) -> ServiceResult<u64>;
}

/// Conversation service: enumeration, retained floors and per-user indices.
#[async_trait]
pub trait ConversationIndex: Send + Sync {
    /// List one page of conversations. A page shorter than `page.size` is
    /// the last one.
    async fn list_conversations(&self, page: Page) -> ServiceResult<Vec<Conversation>>;

    /// Move the conversation's retained floor up to `new_floor`.
    async fn advance_retained_floor(&self, conversation_id: &str, new_floor: i64)
    -> ServiceResult<()>;

    /// Drop the user's index entries below `floor` and raise the user's read
    /// cursor to at least `floor`.
    async fn trim_user_index(
        &self,
        user_id: &str,
        conversation_id: &str,
        floor: i64,
    ) -> ServiceResult<()>;
}

/// Object storage, partitioned into independent categories.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys in `category` whose timestamp is strictly older than `cutoff`.
    async fn list_older_than(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<String>>;

    async fn delete_batch(&self, category: &str, keys: &[String]) -> ServiceResult<u64>;
}

/// Best-effort push of events to online user sessions.
///
/// Success means the event was accepted locally, nothing more.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_offsets() {
        let page = Page::first(50);
        assert_eq!(page.offset(), 0);
        assert_eq!(page.next().offset(), 50);
        assert_eq!(page.next().next().number, 3);
    }

    #[test]
    fn test_conversation_deserialize_defaults() {
        let conversation: Conversation = serde_json::from_str(
            r#"{"conversation_id":"si_a_b","max_seq":20,"retained_floor":0}"#,
        )
        .unwrap();
        assert_eq!(conversation.session_type, SessionType::Single);
        assert!(conversation.members.is_empty());
    }
}
