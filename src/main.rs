use std::{path::Path, process::ExitCode, time::Duration};

use chat_retention::{
    clients::{ServiceClients, http::build_service_clients},
    config::RetentionServiceConfig,
    observability,
    retention::{
        PurgeOrchestrator, RetentionPolicy, RunStatus, Schedule, SchedulerHandle,
        start_retention_worker,
    },
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONFIG_PATH: &str = "chat-retention.toml";
const NOTIFICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI arguments for the retention service
#[derive(Parser, Debug)]
#[command(version, about = "Chat history and object retention service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./chat-retention.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run purges on the configured schedule until interrupted (default)
    Serve,
    /// Execute a single purge run and print its summary as JSON
    ///
    /// Exits 0 when the run completed, 2 when it completed with errors and
    /// 1 when it failed.
    Once,
    /// Validate the configuration and print the effective policy
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Error: {message}");
            return ExitCode::FAILURE;
        }
    };

    match args.command.unwrap_or(Command::Serve) {
        Command::Check => run_check(&config),
        Command::Once => run_once(&config).await,
        Command::Serve => run_serve(&config).await,
    }
}

fn load_config(explicit_path: Option<&str>) -> Result<RetentionServiceConfig, String> {
    let path = match explicit_path {
        Some(path) => Path::new(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return Ok(RetentionServiceConfig::default()),
    };
    RetentionServiceConfig::from_file(path)
        .map_err(|e| format!("failed to load config from {}: {e}", path.display()))
}

fn init_observability(config: &RetentionServiceConfig) -> Result<(), ExitCode> {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Error: {e}");
        return Err(ExitCode::FAILURE);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }
    Ok(())
}

fn service_clients(config: &RetentionServiceConfig) -> Result<ServiceClients, ExitCode> {
    let missing = config.services.missing_endpoints();
    if !missing.is_empty() {
        tracing::error!(missing = ?missing, "Service endpoints are not configured");
        return Err(ExitCode::FAILURE);
    }
    build_service_clients(&config.services).map_err(|e| {
        tracing::error!(error = %e, "Failed to build service clients");
        ExitCode::FAILURE
    })
}

fn run_check(config: &RetentionServiceConfig) -> ExitCode {
    let retention = &config.retention;
    let policy = RetentionPolicy::from_config(retention);
    let days = |d: Option<chrono::Duration>| {
        d.map_or_else(|| "disabled".to_string(), |d| format!("{} days", d.num_days()))
    };

    println!("Configuration is valid.");
    println!();
    println!("enabled:                {}", retention.enabled);
    match Schedule::parse(&retention.schedule) {
        Ok(schedule) => println!(
            "schedule:               {schedule} (every {}s)",
            schedule.interval().as_secs()
        ),
        Err(e) => println!("schedule:               invalid ({e})"),
    }
    println!("startup delay:          {}s", retention.startup_delay_secs);
    println!("message max age:        {}", days(policy.message_max_age));
    println!("object max age:         {}", days(policy.object_max_age));
    println!("object categories:      {}", policy.object_categories.join(", "));
    println!("dry run:                {}", policy.dry_run);
    println!(
        "max deletes/convers.:   {}",
        match policy.max_deletes_per_conversation {
            0 => "unlimited".to_string(),
            n => n.to_string(),
        }
    );
    println!("message batch size:     {}", policy.message_batch_size);
    println!("object batch size:      {}", policy.object_batch_size);
    println!("conversation page size: {}", policy.conversation_page_size);
    println!("concurrency:            {}", policy.concurrency);

    let missing = config.services.missing_endpoints();
    if !missing.is_empty() {
        println!();
        println!("warning: not configured: {}", missing.join(", "));
    }
    ExitCode::SUCCESS
}

async fn run_once(config: &RetentionServiceConfig) -> ExitCode {
    if let Err(code) = init_observability(config) {
        return code;
    }
    let clients = match service_clients(config) {
        Ok(clients) => clients,
        Err(code) => return code,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, stopping after the current batch");
            cancel.cancel();
        }
    });

    let orchestrator = PurgeOrchestrator::new(clients, config.retention.retry.clone());
    let run = orchestrator
        .run(RetentionPolicy::from_config(&config.retention), cancel)
        .await;

    match serde_json::to_string_pretty(&run) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize run summary"),
    }

    if tokio::time::timeout(NOTIFICATION_DRAIN_TIMEOUT, orchestrator.flush_notifications())
        .await
        .is_err()
    {
        tracing::warn!("Timeout waiting for queued notifications");
    }

    ExitCode::from(exit_status(run.status))
}

/// Process exit status for a finished `once` run.
fn exit_status(status: RunStatus) -> u8 {
    match status {
        RunStatus::Completed => 0,
        RunStatus::CompletedWithErrors => 2,
        RunStatus::Failed | RunStatus::Running => 1,
    }
}

async fn run_serve(config: &RetentionServiceConfig) -> ExitCode {
    if let Err(code) = init_observability(config) {
        return code;
    }
    tracing::info!("Starting retention service");

    if !config.retention.enabled {
        tracing::warn!("Retention is disabled, nothing to schedule");
        return ExitCode::SUCCESS;
    }
    let clients = match service_clients(config) {
        Ok(clients) => clients,
        Err(code) => return code,
    };

    let shutdown = CancellationToken::new();
    let Some(handle) = start_retention_worker(clients, &config.retention, shutdown) else {
        return ExitCode::SUCCESS;
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for the in-flight run to stop...");
    drain(handle).await;
    ExitCode::SUCCESS
}

async fn drain(handle: SchedulerHandle) {
    match tokio::time::timeout(Duration::from_secs(30), handle.shutdown()).await {
        Ok(()) => {
            if let Some(run) = handle.last_run() {
                tracing::info!(
                    run_id = %run.run_id,
                    status = run.status.as_str(),
                    "Last purge run"
                );
            }
            tracing::info!("Shutdown complete");
        }
        Err(_) => tracing::warn!("Timeout waiting for the purge run to stop"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
