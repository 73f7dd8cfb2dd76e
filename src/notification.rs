//! User-facing notifications emitted after history is removed.
//!
//! Delivery is best-effort: failures are logged and counted, never retried,
//! and never block or fail the purge that produced them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::task::TaskTracker;

use crate::{
    clients::{NotificationDispatcher, SessionType},
    observability::metrics,
};

/// Tells a user's sessions which sequences of a conversation were deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMsgsTips {
    pub user_id: String,
    pub conversation_id: String,
    pub seqs: Vec<i64>,
}

/// Tells a user's sessions that their read cursor moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAsReadTips {
    pub mark_as_read_user_id: String,
    pub conversation_id: String,
    pub seqs: Vec<i64>,
    pub has_read_seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    DeleteMsgs,
    HasReadReceipt,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::DeleteMsgs => "delete_msgs",
            EventType::HasReadReceipt => "has_read_receipt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    DeleteMsgs(DeleteMsgsTips),
    MarkAsRead(MarkAsReadTips),
}

/// An event handed to the [`NotificationDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub from_user_id: String,
    pub to_user_id: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_type: Option<SessionType>,
    pub payload: NotificationPayload,
}

/// Pending notifications kept before new ones are dropped.
const QUEUE_CAPACITY: usize = 1024;

/// Builds retention notifications and queues them for delivery.
///
/// Enqueueing never waits on the dispatcher. A background task spawned on
/// the caller's [`TaskTracker`] drains the queue and exits once every clone
/// of the notifier is dropped and the queue is empty. When the queue is full
/// the notification is dropped and counted as a failure.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    pub fn spawn(dispatcher: Arc<dyn NotificationDispatcher>, tracker: &TaskTracker) -> Self {
        Self::with_capacity(dispatcher, tracker, QUEUE_CAPACITY)
    }

    pub fn with_capacity(
        dispatcher: Arc<dyn NotificationDispatcher>,
        tracker: &TaskTracker,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tracker.spawn(deliver(dispatcher, rx));
        Self { tx }
    }

    /// Notify `user_id` that `seqs` were removed from `conversation_id`.
    pub fn user_delete_msgs(&self, user_id: &str, conversation_id: &str, seqs: Vec<i64>) {
        let tips = DeleteMsgsTips {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seqs,
        };
        self.enqueue(Notification {
            from_user_id: user_id.to_string(),
            to_user_id: user_id.to_string(),
            event_type: EventType::DeleteMsgs,
            session_type: None,
            payload: NotificationPayload::DeleteMsgs(tips),
        });
    }

    /// Notify `recv_id` that `send_id`'s read cursor in the conversation is
    /// now `has_read_seq`.
    pub fn mark_as_read(
        &self,
        conversation_id: &str,
        session_type: SessionType,
        send_id: &str,
        recv_id: &str,
        seqs: Vec<i64>,
        has_read_seq: i64,
    ) {
        let tips = MarkAsReadTips {
            mark_as_read_user_id: send_id.to_string(),
            conversation_id: conversation_id.to_string(),
            seqs,
            has_read_seq,
        };
        self.enqueue(Notification {
            from_user_id: send_id.to_string(),
            to_user_id: recv_id.to_string(),
            event_type: EventType::HasReadReceipt,
            session_type: Some(session_type),
            payload: NotificationPayload::MarkAsRead(tips),
        });
    }

    fn enqueue(&self, notification: Notification) {
        let event_type = notification.event_type;
        let (reason, notification) = match self.tx.try_send(notification) {
            Ok(()) => return,
            Err(TrySendError::Full(n)) => ("queue full", n),
            Err(TrySendError::Closed(n)) => ("queue closed", n),
        };
        tracing::warn!(
            event = event_type.as_str(),
            to_user_id = %notification.to_user_id,
            reason,
            "Dropping notification"
        );
        metrics::record_notification_failure(event_type.as_str());
    }
}

async fn deliver(
    dispatcher: Arc<dyn NotificationDispatcher>,
    mut rx: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = rx.recv().await {
        let event_type = notification.event_type;
        let to_user_id = notification.to_user_id.clone();

        if let Err(e) = dispatcher.notify(notification).await {
            tracing::warn!(
                event = event_type.as_str(),
                to_user_id = %to_user_id,
                error = %e,
                "Failed to dispatch notification"
            );
            metrics::record_notification_failure(event_type.as_str());
        }
    }
}
