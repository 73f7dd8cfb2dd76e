//! Interval expressions and the timer abstraction that fires purge runs.

use std::{sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::time::{Instant, Interval, MissedTickBehavior};

static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+[smhdw])+$").expect("Invalid duration pattern regex")
});
static DURATION_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)([smhdw])").expect("Invalid duration component regex"));

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// A parsed periodic trigger expression.
///
/// Accepted forms:
/// - `@hourly`, `@daily`, `@weekly`
/// - `@every <duration>`
/// - a bare `<duration>` such as `90s`, `30m`, `6h`, `1d` or `1h30m`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    expression: String,
    interval: Duration,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let interval = match trimmed {
            "@hourly" => Duration::from_secs(HOUR),
            "@daily" | "@midnight" => Duration::from_secs(DAY),
            "@weekly" => Duration::from_secs(7 * DAY),
            other => {
                let duration = match other.strip_prefix("@every") {
                    Some(rest) => rest.trim(),
                    None if other.starts_with('@') => {
                        return Err(ScheduleError::UnknownMacro(other.to_string()));
                    }
                    None => other,
                };
                parse_duration(duration)?
            }
        };

        Ok(Self {
            expression: trimmed.to_string(),
            interval,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_duration(input: &str) -> Result<Duration, ScheduleError> {
    if !DURATION_PATTERN.is_match(input) {
        return Err(ScheduleError::InvalidDuration(input.to_string()));
    }

    let mut secs: u64 = 0;
    for caps in DURATION_COMPONENT.captures_iter(input) {
        let value: u64 = caps[1]
            .parse()
            .map_err(|_| ScheduleError::InvalidDuration(input.to_string()))?;
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => HOUR,
            "d" => DAY,
            _ => 7 * DAY,
        };
        secs = value
            .checked_mul(unit)
            .and_then(|v| secs.checked_add(v))
            .ok_or_else(|| ScheduleError::InvalidDuration(input.to_string()))?;
    }

    if secs == 0 {
        return Err(ScheduleError::ZeroInterval);
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule expression is empty")]
    Empty,

    #[error("unknown schedule macro '{0}' (expected @hourly, @daily, @weekly or @every)")]
    UnknownMacro(String),

    #[error("invalid duration '{0}' (expected e.g. 90s, 30m, 6h, 1d)")]
    InvalidDuration(String),

    #[error("schedule interval must be greater than zero")]
    ZeroInterval,
}

/// Source of scheduler ticks.
#[async_trait]
pub trait Trigger: Send {
    /// Wait until the next tick is due.
    async fn tick(&mut self);
}

/// Fixed-period trigger backed by a tokio interval.
///
/// Ticks missed while a run is in progress are dropped rather than replayed
/// in a burst.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    /// First tick fires after `initial_delay`, then every `period`.
    pub fn new(period: Duration, initial_delay: Duration) -> Self {
        let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn from_schedule(schedule: &Schedule, initial_delay: Duration) -> Self {
        Self::new(schedule.interval(), initial_delay)
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
