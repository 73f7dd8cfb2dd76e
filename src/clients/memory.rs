//! In-memory implementations of the service contracts.
//!
//! Used for tests and local dry runs. Every store supports failure
//! injection so isolation and retry behavior can be exercised without a
//! real backend.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{
    error::{ServiceError, ServiceResult},
    traits::{
        Conversation, ConversationIndex, MessageStore, NotificationDispatcher, ObjectStore, Page,
    },
};
use crate::notification::Notification;

type Hook = Box<dyn Fn(&str, &[i64]) + Send + Sync>;

/// Pending injected failures for one key.
#[derive(Debug, Clone, Copy)]
struct FailurePlan {
    remaining: usize,
    transient: bool,
}

#[derive(Default)]
struct FailureTable {
    plans: Mutex<HashMap<String, FailurePlan>>,
}

impl FailureTable {
    fn inject(&self, key: &str, times: usize, transient: bool) {
        self.plans.lock().insert(
            key.to_string(),
            FailurePlan {
                remaining: times,
                transient,
            },
        );
    }

    fn check(&self, key: &str, service: &'static str) -> ServiceResult<()> {
        let mut plans = self.plans.lock();
        let Some(plan) = plans.get_mut(key) else {
            return Ok(());
        };
        if plan.remaining == 0 {
            plans.remove(key);
            return Ok(());
        }
        plan.remaining -= 1;
        if plan.transient {
            Err(ServiceError::Unavailable {
                service,
                message: format!("injected failure for {key}"),
            })
        } else {
            Err(ServiceError::Rejected {
                service,
                message: format!("injected failure for {key}"),
            })
        }
    }
}

/// Message service backed by per-conversation `seq -> timestamp` maps.
#[derive(Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<HashMap<String, BTreeMap<i64, DateTime<Utc>>>>,
    delete_calls: Mutex<Vec<(String, Vec<i64>)>>,
    boundary_failures: FailureTable,
    delete_failures: FailureTable,
    delete_delay: Mutex<Option<Duration>>,
    after_delete: Mutex<Option<Hook>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert sequences `seqs` into `conversation_id`, all stamped `at`.
    pub fn insert(
        &self,
        conversation_id: &str,
        seqs: impl IntoIterator<Item = i64>,
        at: DateTime<Utc>,
    ) {
        let mut messages = self.messages.lock();
        let conversation = messages.entry(conversation_id.to_string()).or_default();
        for seq in seqs {
            conversation.insert(seq, at);
        }
    }

    /// Sequences still present in `conversation_id`, ascending.
    pub fn remaining(&self, conversation_id: &str) -> Vec<i64> {
        self.messages
            .lock()
            .get(conversation_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every delete request received, in arrival order.
    pub fn delete_calls(&self) -> Vec<(String, Vec<i64>)> {
        self.delete_calls.lock().clone()
    }

    /// Fail the next `times` boundary queries for `conversation_id`.
    pub fn fail_boundary(&self, conversation_id: &str, times: usize, transient: bool) {
        self.boundary_failures
            .inject(conversation_id, times, transient);
    }

    /// Fail the next `times` delete requests for `conversation_id`.
    pub fn fail_deletes(&self, conversation_id: &str, times: usize, transient: bool) {
        self.delete_failures.inject(conversation_id, times, transient);
    }

    /// Sleep for `delay` inside every delete request.
    pub fn set_delete_delay(&self, delay: Duration) {
        *self.delete_delay.lock() = Some(delay);
    }

    /// Run `hook` after every committed delete request.
    pub fn set_after_delete_hook(&self, hook: impl Fn(&str, &[i64]) + Send + Sync + 'static) {
        *self.after_delete.lock() = Some(Box::new(hook));
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn list_aged_boundary(
        &self,
        conversation_id: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Option<i64>> {
        self.boundary_failures.check(conversation_id, "msg")?;
        let messages = self.messages.lock();
        Ok(messages.get(conversation_id).and_then(|m| {
            m.iter()
                .filter(|(_, at)| **at < cutoff)
                .map(|(seq, _)| *seq)
                .max()
        }))
    }

    async fn delete_physical(&self, conversation_id: &str, seqs: &[i64]) -> ServiceResult<u64> {
        let delay = *self.delete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.delete_failures.check(conversation_id, "msg")?;

        let deleted = {
            let mut messages = self.messages.lock();
            let conversation = messages.entry(conversation_id.to_string()).or_default();
            seqs.iter()
                .filter(|seq| conversation.remove(*seq).is_some())
                .count() as u64
        };
        self.delete_calls
            .lock()
            .push((conversation_id.to_string(), seqs.to_vec()));

        if let Some(hook) = self.after_delete.lock().as_ref() {
            hook(conversation_id, seqs);
        }
        Ok(deleted)
    }
}

/// Conversation service backed by an ordered map of conversations.
#[derive(Default)]
pub struct InMemoryConversationIndex {
    conversations: Mutex<BTreeMap<String, Conversation>>,
    trims: Mutex<Vec<(String, String, i64)>>,
    floor_updates: AtomicUsize,
    listing_failures: FailureTable,
    advance_failures: FailureTable,
    trim_failures: FailureTable,
}

impl InMemoryConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .insert(conversation.conversation_id.clone(), conversation);
    }

    pub fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations.lock().get(conversation_id).cloned()
    }

    /// Current retained floor of `conversation_id`.
    pub fn floor(&self, conversation_id: &str) -> Option<i64> {
        self.get(conversation_id).map(|c| c.retained_floor)
    }

    /// Every `(user_id, conversation_id, floor)` trim applied, in order.
    pub fn trims(&self) -> Vec<(String, String, i64)> {
        self.trims.lock().clone()
    }

    /// Number of successful floor advances.
    pub fn floor_updates(&self) -> usize {
        self.floor_updates.load(Ordering::SeqCst)
    }

    /// Fail listing of page `number` the next `times` calls.
    pub fn fail_listing_page(&self, number: u32, times: usize, transient: bool) {
        self.listing_failures
            .inject(&number.to_string(), times, transient);
    }

    pub fn fail_advance(&self, conversation_id: &str, times: usize, transient: bool) {
        self.advance_failures
            .inject(conversation_id, times, transient);
    }

    pub fn fail_trim(&self, user_id: &str, times: usize, transient: bool) {
        self.trim_failures.inject(user_id, times, transient);
    }
}

#[async_trait]
impl ConversationIndex for InMemoryConversationIndex {
    async fn list_conversations(&self, page: Page) -> ServiceResult<Vec<Conversation>> {
        self.listing_failures
            .check(&page.number.to_string(), "conversation")?;
        let conversations = self.conversations.lock();
        Ok(conversations
            .values()
            .skip(page.offset())
            .take(page.size as usize)
            .cloned()
            .collect())
    }

    async fn advance_retained_floor(
        &self,
        conversation_id: &str,
        new_floor: i64,
    ) -> ServiceResult<()> {
        self.advance_failures.check(conversation_id, "conversation")?;
        let mut conversations = self.conversations.lock();
        let conversation =
            conversations
                .get_mut(conversation_id)
                .ok_or_else(|| ServiceError::Rejected {
                    service: "conversation",
                    message: format!("unknown conversation {conversation_id}"),
                })?;

        if new_floor < conversation.retained_floor {
            return Err(ServiceError::Rejected {
                service: "conversation",
                message: format!(
                    "floor regression {} -> {new_floor}",
                    conversation.retained_floor
                ),
            });
        }
        if new_floor > conversation.max_seq {
            return Err(ServiceError::Rejected {
                service: "conversation",
                message: format!(
                    "floor {new_floor} beyond max seq {}",
                    conversation.max_seq
                ),
            });
        }

        conversation.retained_floor = new_floor;
        self.floor_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn trim_user_index(
        &self,
        user_id: &str,
        conversation_id: &str,
        floor: i64,
    ) -> ServiceResult<()> {
        self.trim_failures.check(user_id, "conversation")?;
        if let Some(conversation) = self.conversations.lock().get_mut(conversation_id) {
            for member in conversation
                .members
                .iter_mut()
                .filter(|m| m.user_id == user_id)
            {
                member.has_read_seq = member.has_read_seq.max(floor);
            }
        }
        self.trims.lock().push((
            user_id.to_string(),
            conversation_id.to_string(),
            floor,
        ));
        Ok(())
    }
}

/// Object storage backed by per-category `key -> timestamp` maps.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, BTreeMap<String, DateTime<Utc>>>>,
    listing_failures: FailureTable,
    delete_failures: FailureTable,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, category: &str, key: &str, at: DateTime<Utc>) {
        self.objects
            .lock()
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), at);
    }

    pub fn count(&self, category: &str) -> usize {
        self.objects.lock().get(category).map_or(0, |m| m.len())
    }

    pub fn fail_listing(&self, category: &str, times: usize, transient: bool) {
        self.listing_failures.inject(category, times, transient);
    }

    pub fn fail_deletes(&self, category: &str, times: usize, transient: bool) {
        self.delete_failures.inject(category, times, transient);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_older_than(
        &self,
        category: &str,
        cutoff: DateTime<Utc>,
    ) -> ServiceResult<Vec<String>> {
        self.listing_failures.check(category, "object")?;
        Ok(self
            .objects
            .lock()
            .get(category)
            .map(|m| {
                m.iter()
                    .filter(|(_, at)| **at < cutoff)
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_batch(&self, category: &str, keys: &[String]) -> ServiceResult<u64> {
        self.delete_failures.check(category, "object")?;
        let mut objects = self.objects.lock();
        let Some(stored) = objects.get_mut(category) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|k| stored.remove(*k).is_some()).count() as u64)
    }
}

/// Dispatcher that records every accepted notification.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    fail_all: std::sync::atomic::AtomicBool,
    failed_attempts: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    /// Sleep for `delay` inside every notify call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn notify(&self, notification: Notification) -> ServiceResult<()> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_all.load(Ordering::SeqCst) {
            self.failed_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(ServiceError::Unavailable {
                service: "push",
                message: "no gateway connected".into(),
            });
        }
        self.sent.lock().push(notification);
        Ok(())
    }
}
