use chrono::{DateTime, Duration, Utc};

use super::{KNOWN_OBJECT_CATEGORIES, RetentionError};
use crate::config::RetentionConfig;

/// The retention policy in force for one purge run.
///
/// Built from [`RetentionConfig`] and passed explicitly into every run; it
/// is never mutated while a run is active.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Maximum message age. `None` disables the message purge.
    pub message_max_age: Option<Duration>,
    /// Maximum object age. `None` disables the object sweep.
    pub object_max_age: Option<Duration>,
    /// Object categories to sweep, in configured order.
    pub object_categories: Vec<String>,
    pub dry_run: bool,
    /// 0 means unlimited.
    pub max_deletes_per_conversation: u64,
    pub message_batch_size: usize,
    pub object_batch_size: usize,
    pub conversation_page_size: u32,
    pub concurrency: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&RetentionConfig::default())
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Self {
        let days = |d: u32| (d > 0).then(|| Duration::days(i64::from(d)));

        Self {
            message_max_age: days(config.periods.message_max_age_days),
            object_max_age: days(config.periods.object_max_age_days),
            object_categories: recognized_categories(&config.object_categories),
            dry_run: config.safety.dry_run,
            max_deletes_per_conversation: config.safety.max_deletes_per_conversation,
            message_batch_size: config.safety.message_batch_size as usize,
            object_batch_size: config.safety.object_batch_size as usize,
            conversation_page_size: config.safety.conversation_page_size,
            concurrency: config.safety.concurrency,
        }
    }

    /// Reject policies a run cannot execute.
    pub fn validate(&self) -> Result<(), RetentionError> {
        let invalid = |msg: &str| Err(RetentionError::InvalidPolicy(msg.to_string()));

        if self.message_max_age.is_some_and(|age| age <= Duration::zero()) {
            return invalid("message max age must be positive");
        }
        if self.object_max_age.is_some_and(|age| age <= Duration::zero()) {
            return invalid("object max age must be positive");
        }
        if self.message_batch_size == 0 {
            return invalid("message batch size must be greater than 0");
        }
        if self.object_batch_size == 0 {
            return invalid("object batch size must be greater than 0");
        }
        if self.conversation_page_size == 0 {
            return invalid("conversation page size must be greater than 0");
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be greater than 0");
        }
        Ok(())
    }

    /// Messages strictly older than this instant are eligible for deletion.
    pub fn message_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.message_max_age.map(|age| cutoff(now, age))
    }

    /// Objects strictly older than this instant are eligible for deletion.
    pub fn object_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.object_max_age.map(|age| cutoff(now, age))
    }

    /// Categories the sweep acts on: recognized, non-empty, first occurrence.
    pub fn categories(&self) -> Vec<String> {
        recognized_categories(&self.object_categories)
    }

    /// Cap a boundary so a single run deletes at most
    /// `max_deletes_per_conversation` sequences above `floor`.
    pub fn cap_boundary(&self, floor: i64, boundary: i64) -> i64 {
        if self.max_deletes_per_conversation == 0 {
            return boundary;
        }
        let cap = i64::try_from(self.max_deletes_per_conversation).unwrap_or(i64::MAX);
        boundary.min(floor.saturating_add(cap))
    }
}

/// `now - age`, saturating at the earliest representable instant so that an
/// age reaching past it matches nothing.
fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn recognized_categories(configured: &[String]) -> Vec<String> {
    let mut categories: Vec<String> = Vec::with_capacity(configured.len());
    for category in configured {
        let category = category.trim();
        if category.is_empty() {
            continue;
        }
        if !KNOWN_OBJECT_CATEGORIES.contains(&category) {
            tracing::debug!(category, "Ignoring unrecognized object category");
            continue;
        }
        if !categories.iter().any(|c| c == category) {
            categories.push(category.to_string());
        }
    }
    categories
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_from_default_config() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.message_max_age, Some(Duration::days(180)));
        assert_eq!(policy.object_max_age, Some(Duration::days(90)));
        assert_eq!(policy.object_categories.len(), KNOWN_OBJECT_CATEGORIES.len());
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_zero_days_disable_pipelines() {
        let mut config = RetentionConfig::default();
        config.periods.message_max_age_days = 0;
        config.periods.object_max_age_days = 0;
        let policy = RetentionPolicy::from_config(&config);
        assert!(policy.message_max_age.is_none());
        assert!(policy.object_max_age.is_none());
        assert!(policy.message_cutoff(Utc::now()).is_none());
    }

    #[test]
    fn test_categories_filtered_and_deduplicated() {
        let mut config = RetentionConfig::default();
        config.object_categories = vec![
            "msg-picture".into(),
            "".into(),
            "avatars".into(),
            "msg-file".into(),
            "msg-picture".into(),
            "  ".into(),
        ];
        let policy = RetentionPolicy::from_config(&config);
        assert_eq!(policy.object_categories, vec!["msg-picture", "msg-file"]);
    }

    #[test]
    fn test_categories_refiltered_when_set_directly() {
        let policy = RetentionPolicy {
            object_categories: vec!["".into(), "sdklog".into(), "bogus".into()],
            ..Default::default()
        };
        assert_eq!(policy.categories(), vec!["sdklog"]);
    }

    #[test]
    fn test_cutoffs() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            message_max_age: Some(Duration::days(1)),
            object_max_age: Some(Duration::hours(12)),
            ..Default::default()
        };
        assert_eq!(policy.message_cutoff(now), Some(now - Duration::days(1)));
        assert_eq!(policy.object_cutoff(now), Some(now - Duration::hours(12)));
    }

    #[test]
    fn test_cutoff_saturates_for_huge_ages() {
        let mut config = RetentionConfig::default();
        config.periods.message_max_age_days = 100_000_000;
        config.periods.object_max_age_days = u32::MAX;
        let policy = RetentionPolicy::from_config(&config);

        assert!(policy.validate().is_ok());
        let now = Utc::now();
        assert_eq!(policy.message_cutoff(now), Some(DateTime::<Utc>::MIN_UTC));
        assert_eq!(policy.object_cutoff(now), Some(DateTime::<Utc>::MIN_UTC));
    }

    #[rstest]
    #[case(0, 10, 500, 500)]
    #[case(100, 10, 500, 110)]
    #[case(100, 10, 50, 50)]
    #[case(u64::MAX, 10, 500, 500)]
    fn test_cap_boundary(
        #[case] cap: u64,
        #[case] floor: i64,
        #[case] boundary: i64,
        #[case] expected: i64,
    ) {
        let policy = RetentionPolicy {
            max_deletes_per_conversation: cap,
            ..Default::default()
        };
        assert_eq!(policy.cap_boundary(floor, boundary), expected);
    }

    #[rstest]
    #[case::zero_message_batch(RetentionPolicy { message_batch_size: 0, ..Default::default() })]
    #[case::zero_object_batch(RetentionPolicy { object_batch_size: 0, ..Default::default() })]
    #[case::zero_page(RetentionPolicy { conversation_page_size: 0, ..Default::default() })]
    #[case::zero_concurrency(RetentionPolicy { concurrency: 0, ..Default::default() })]
    #[case::negative_age(RetentionPolicy { message_max_age: Some(Duration::days(-1)), ..Default::default() })]
    #[case::zero_object_age(RetentionPolicy { object_max_age: Some(Duration::zero()), ..Default::default() })]
    fn test_invalid_policies(#[case] policy: RetentionPolicy) {
        assert!(matches!(
            policy.validate(),
            Err(RetentionError::InvalidPolicy(_))
        ));
    }
}
