//! Data retention configuration.
//!
//! Configures the scheduled purge of aged message history, the per-user
//! conversation index trim and the object storage sweep.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! schedule = "@daily"
//! object_categories = ["msg-picture", "msg-file", "msg-voice"]
//!
//! [retention.periods]
//! message_max_age_days = 180
//! object_max_age_days = 90
//!
//! [retention.safety]
//! dry_run = false
//! max_deletes_per_conversation = 100000
//! message_batch_size = 1000
//!
//! [retention.retry]
//! max_retries = 3
//! ```

use serde::{Deserialize, Serialize};

use super::RetryConfig;
use crate::retention::KNOWN_OBJECT_CATEGORIES;

/// Data retention configuration.
///
/// When enabled, the scheduler fires a purge run on every tick of
/// `schedule` and enforces the configured periods against the chat
/// services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether retention purging is enabled.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// Interval expression for the purge trigger.
    /// Accepts `@hourly`, `@daily`, `@weekly`, `@every 6h` or a bare
    /// duration such as `12h`.
    /// Default: "@daily"
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Delay before the first run after startup, in seconds.
    #[serde(default)]
    pub startup_delay_secs: u64,

    /// Object storage categories to sweep, in order.
    /// Empty and unrecognized entries are ignored.
    #[serde(default = "default_object_categories")]
    pub object_categories: Vec<String>,

    /// Retention periods for message history and stored objects.
    #[serde(default)]
    pub periods: RetentionPeriods,

    /// Safety settings to bound the work done by one run.
    #[serde(default)]
    pub safety: RetentionSafety,

    /// Backoff for transient service failures on a single batch.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: default_schedule(),
            startup_delay_secs: 0,
            object_categories: default_object_categories(),
            periods: RetentionPeriods::default(),
            safety: RetentionSafety::default(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_schedule() -> String {
    "@daily".to_string()
}

fn default_object_categories() -> Vec<String> {
    KNOWN_OBJECT_CATEGORIES
        .iter()
        .map(|c| c.to_string())
        .collect()
}

/// Retention periods, in days.
///
/// Set a period to 0 to disable that sub-pipeline (keep forever).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPeriods {
    /// Days of message history to keep in every conversation.
    /// Default: 180 days
    #[serde(default = "default_message_max_age_days")]
    pub message_max_age_days: u32,

    /// Days to keep objects in the configured storage categories.
    /// Default: 90 days
    #[serde(default = "default_object_max_age_days")]
    pub object_max_age_days: u32,
}

impl Default for RetentionPeriods {
    fn default() -> Self {
        Self {
            message_max_age_days: default_message_max_age_days(),
            object_max_age_days: default_object_max_age_days(),
        }
    }
}

fn default_message_max_age_days() -> u32 {
    180
}

fn default_object_max_age_days() -> u32 {
    90
}

impl RetentionPeriods {
    /// Check if message history purging is enabled.
    pub fn should_purge_messages(&self) -> bool {
        self.message_max_age_days > 0
    }

    /// Check if the object storage sweep is enabled.
    pub fn should_sweep_objects(&self) -> bool {
        self.object_max_age_days > 0
    }
}

/// Safety settings for retention operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSafety {
    /// If true, report what would be deleted without deleting anything.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Maximum number of messages deleted per conversation per run.
    /// The remaining tail is picked up by later runs.
    /// Set to 0 for unlimited.
    /// Default: 100000
    #[serde(default = "default_max_deletes_per_conversation")]
    pub max_deletes_per_conversation: u64,

    /// Number of sequence numbers per message delete request.
    /// Default: 1000
    #[serde(default = "default_message_batch_size")]
    pub message_batch_size: u32,

    /// Number of object keys per object delete request.
    /// Default: 500
    #[serde(default = "default_object_batch_size")]
    pub object_batch_size: u32,

    /// Number of conversations fetched per listing page.
    /// Default: 200
    #[serde(default = "default_conversation_page_size")]
    pub conversation_page_size: u32,

    /// Number of conversations or categories processed in parallel.
    /// Default: 8
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for RetentionSafety {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_deletes_per_conversation: default_max_deletes_per_conversation(),
            message_batch_size: default_message_batch_size(),
            object_batch_size: default_object_batch_size(),
            conversation_page_size: default_conversation_page_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_deletes_per_conversation() -> u64 {
    100_000
}

fn default_message_batch_size() -> u32 {
    1000
}

fn default_object_batch_size() -> u32 {
    500
}

fn default_conversation_page_size() -> u32 {
    200
}

fn default_concurrency() -> usize {
    8
}

impl RetentionConfig {
    /// Check if any retention period is configured (non-zero).
    pub fn has_any_retention(&self) -> bool {
        self.periods.should_purge_messages() || self.periods.should_sweep_objects()
    }

    /// Get the startup delay as a Duration.
    pub fn startup_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.startup_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.schedule, "@daily");
        assert_eq!(config.periods.message_max_age_days, 180);
        assert_eq!(config.periods.object_max_age_days, 90);
        assert_eq!(config.object_categories.len(), 6);
        assert!(!config.safety.dry_run);
        assert_eq!(config.safety.max_deletes_per_conversation, 100_000);
        assert_eq!(config.safety.message_batch_size, 1000);
        assert_eq!(config.safety.object_batch_size, 500);
        assert_eq!(config.safety.conversation_page_size, 200);
        assert_eq!(config.safety.concurrency, 8);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            enabled = true
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.schedule, "@daily");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            enabled = true
            schedule = "@every 12h"
            startup_delay_secs = 60
            object_categories = ["msg-picture", "", "msg-file"]

            [periods]
            message_max_age_days = 1
            object_max_age_days = 2

            [safety]
            dry_run = true
            max_deletes_per_conversation = 5000
            message_batch_size = 100
            object_batch_size = 50
            conversation_page_size = 20
            concurrency = 2

            [retry]
            max_retries = 5
            initial_delay_ms = 10
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.schedule, "@every 12h");
        assert_eq!(config.startup_delay(), std::time::Duration::from_secs(60));
        assert_eq!(config.object_categories, vec!["msg-picture", "", "msg-file"]);
        assert_eq!(config.periods.message_max_age_days, 1);
        assert_eq!(config.periods.object_max_age_days, 2);
        assert!(config.safety.dry_run);
        assert_eq!(config.safety.max_deletes_per_conversation, 5000);
        assert_eq!(config.safety.message_batch_size, 100);
        assert_eq!(config.safety.object_batch_size, 50);
        assert_eq!(config.safety.conversation_page_size, 20);
        assert_eq!(config.safety.concurrency, 2);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 10);
    }

    #[test]
    fn test_parse_disabled_periods() {
        let toml = r#"
            enabled = true

            [periods]
            message_max_age_days = 0
            object_max_age_days = 0
        "#;
        let config: RetentionConfig = toml::from_str(toml).unwrap();
        assert!(!config.periods.should_purge_messages());
        assert!(!config.periods.should_sweep_objects());
        assert!(!config.has_any_retention());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            enabled = true
            retain_chat_records = 7
        "#;
        assert!(toml::from_str::<RetentionConfig>(toml).is_err());
    }
}
