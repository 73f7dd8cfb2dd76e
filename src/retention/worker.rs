use tokio_util::sync::CancellationToken;

use super::{
    IntervalTrigger, PurgeOrchestrator, RetentionPolicy, Schedule, Scheduler, SchedulerHandle,
};
use crate::{clients::ServiceClients, config::RetentionConfig};

/// Starts the retention worker as a background task.
///
/// Returns `None` when retention is disabled or nothing is configured to be
/// purged. Otherwise the scheduler is running when this returns and keeps
/// firing until `shutdown` is cancelled.
pub fn start_retention_worker(
    clients: ServiceClients,
    config: &RetentionConfig,
    shutdown: CancellationToken,
) -> Option<SchedulerHandle> {
    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return None;
    }

    if !config.has_any_retention() {
        tracing::info!("Retention worker enabled but no retention periods configured");
        return None;
    }

    let schedule = match Schedule::parse(&config.schedule) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(error = %e, schedule = %config.schedule, "Invalid retention schedule");
            return None;
        }
    };

    let policy = RetentionPolicy::from_config(config);
    let dry_run_msg = if policy.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        schedule = %schedule,
        interval_secs = schedule.interval().as_secs(),
        startup_delay_secs = config.startup_delay_secs,
        message_max_age_days = config.periods.message_max_age_days,
        object_max_age_days = config.periods.object_max_age_days,
        object_categories = ?policy.object_categories,
        dry_run = policy.dry_run,
        "Starting retention worker{}",
        dry_run_msg
    );

    let orchestrator = PurgeOrchestrator::new(clients, config.retry.clone());
    let trigger = IntervalTrigger::from_schedule(&schedule, config.startup_delay());
    Some(Scheduler::new(orchestrator, policy).start(trigger, shutdown))
}
