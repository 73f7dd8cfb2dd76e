//! Endpoints of the chat services the purge run talks to.
//!
//! # Example
//!
//! ```toml
//! [services]
//! message_url = "http://msg-rpc:10280"
//! conversation_url = "http://conversation-rpc:10230"
//! object_url = "http://third-rpc:10300"
//! push_url = "http://push-rpc:10170"
//! timeout_secs = 30
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
    /// Base URL of the message service (sequence ranges, physical deletes).
    #[serde(default)]
    pub message_url: String,

    /// Base URL of the conversation service (listing, floors, user indices).
    #[serde(default)]
    pub conversation_url: String,

    /// Base URL of the object storage service.
    #[serde(default)]
    pub object_url: String,

    /// Base URL of the push service used for user notifications.
    #[serde(default)]
    pub push_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            message_url: String::new(),
            conversation_url: String::new(),
            object_url: String::new(),
            push_url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

impl ServicesConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Names of the endpoints that are not configured.
    pub fn missing_endpoints(&self) -> Vec<&'static str> {
        [
            ("message_url", &self.message_url),
            ("conversation_url", &self.conversation_url),
            ("object_url", &self.object_url),
            ("push_url", &self.push_url),
        ]
        .into_iter()
        .filter(|(_, url)| url.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}
