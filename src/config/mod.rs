//! Configuration module for the retention service.
//!
//! The service is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! schedule = "@daily"
//!
//! [services]
//! message_url = "http://msg-rpc:10280"
//! conversation_url = "http://conversation-rpc:10230"
//! object_url = "http://third-rpc:10300"
//! push_url = "http://push-rpc:${PUSH_PORT}"
//! ```

mod observability;
mod retention;
mod retry;
mod services;

use std::{path::Path, sync::LazyLock};

pub use observability::*;
pub use retention::*;
pub use retry::*;
use serde::{Deserialize, Serialize};
pub use services::*;

use crate::retention::Schedule;

/// Root configuration for the retention service.
///
/// All sections are optional with defaults; retention itself stays disabled
/// until `retention.enabled` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionServiceConfig {
    /// Retention policy, schedule and safety limits.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Chat service endpoints.
    #[serde(default)]
    pub services: ServicesConfig,

    /// Observability configuration (logging, metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl RetentionServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: RetentionServiceConfig =
            toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        let retention = &self.retention;

        Schedule::parse(&retention.schedule).map_err(|e| {
            ConfigError::Validation(format!("retention.schedule is invalid: {e}"))
        })?;

        let safety = &retention.safety;
        if safety.message_batch_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.message_batch_size must be greater than 0".into(),
            ));
        }
        if safety.object_batch_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.object_batch_size must be greater than 0".into(),
            ));
        }
        if safety.conversation_page_size == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.conversation_page_size must be greater than 0".into(),
            ));
        }
        if safety.concurrency == 0 {
            return Err(ConfigError::Validation(
                "retention.safety.concurrency must be greater than 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&retention.retry.jitter) {
            return Err(ConfigError::Validation(
                "retention.retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }

        if retention.enabled {
            let missing = self.services.missing_endpoints();
            if !missing.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "retention is enabled but services.{} is not set",
                    missing.join(", services.")
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Expand `${VAR}` references, skipping anything after a `#` on the line.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in ENV_VAR_PATTERN.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SERVICES: &str = r#"
        [services]
        message_url = "http://msg:1"
        conversation_url = "http://conv:2"
        object_url = "http://third:3"
        push_url = "http://push:4"
    "#;

    #[test]
    fn test_empty_config_is_valid() {
        let config = RetentionServiceConfig::from_str("").unwrap();
        assert!(!config.retention.enabled);
        assert_eq!(config.services.timeout_secs, 30);
    }

    #[test]
    fn test_enabled_requires_service_urls() {
        let err = RetentionServiceConfig::from_str(
            r#"
            [retention]
            enabled = true

            [services]
            message_url = "http://msg:1"
        "#,
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("services.conversation_url"), "{msg}");
        assert!(msg.contains("services.push_url"), "{msg}");
    }

    #[test]
    fn test_enabled_with_services() {
        let toml = format!("[retention]\nenabled = true\n{SERVICES}");
        let config = RetentionServiceConfig::from_str(&toml).unwrap();
        assert!(config.retention.enabled);
        assert_eq!(config.services.object_url, "http://third:3");
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let err = RetentionServiceConfig::from_str(
            r#"
            [retention]
            schedule = "every now and then"
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = RetentionServiceConfig::from_str(
            r#"
            [retention.safety]
            message_batch_size = 0
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("message_batch_size"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = RetentionServiceConfig::from_str(
            r#"
            [retention.safety]
            concurrency = 0
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retention]\nschedule = \"6h\"").unwrap();
        let config = RetentionServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retention.schedule, "6h");
    }

    #[test]
    fn test_from_missing_file() {
        let err = RetentionServiceConfig::from_file("/nonexistent/retention.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_PUSH_HOST", Some("push.internal"), || {
            let result = expand_env_vars("push_url = \"http://${TEST_PUSH_HOST}\"").unwrap();
            assert_eq!(result, "push_url = \"http://push.internal\"");
        });
    }

    #[test]
    fn test_env_var_missing() {
        let err = expand_env_vars("url = \"${CHAT_RETENTION_SURELY_UNSET}\"").unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "CHAT_RETENTION_SURELY_UNSET"));
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# url = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# url = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
