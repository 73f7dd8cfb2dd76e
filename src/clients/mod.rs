//! Narrow client interfaces for the services a purge run coordinates.
//!
//! The orchestrator depends only on these traits, never on concrete
//! transports:
//!
//! - [`MessageStore`]: aged sequence boundaries and physical deletion
//! - [`ConversationIndex`]: conversation listing, retained floors, user indices
//! - [`ObjectStore`]: categorized object listing and deletion
//! - [`NotificationDispatcher`]: best-effort push to user sessions
//!
//! Two implementations ship with the crate: JSON/HTTP clients in [`http`]
//! and in-memory stores in [`memory`].

mod error;
pub mod http;
pub mod memory;
mod traits;

use std::sync::Arc;

pub use error::{ServiceError, ServiceResult};
pub use traits::{
    Conversation, ConversationIndex, ConversationMember, MessageStore, NotificationDispatcher,
    ObjectStore, Page, SessionType,
};

/// The set of service clients a purge run needs.
#[derive(Clone)]
pub struct ServiceClients {
    pub messages: Arc<dyn MessageStore>,
    pub conversations: Arc<dyn ConversationIndex>,
    pub objects: Arc<dyn ObjectStore>,
    pub dispatcher: Arc<dyn NotificationDispatcher>,
}
