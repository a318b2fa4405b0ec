mod alerts;
mod config;
mod core;
mod db;
mod error;
mod notifications;
mod signals;
mod simulate;
mod transport;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::alerts::Deduplicator;
use crate::config::Config;
use crate::core::AlertStatus;
use crate::core::pipeline::{AlertStage, ChannelSink, RiskSink, RiskStage};
use crate::db::{DEFAULT_LIST_LIMIT, SharedDatabase};
use crate::error::StoreError;
use crate::notifications::DesktopNotifier;
use crate::signals::RiskAggregator;
use crate::transport::ZmqPublisher;
use crate::transport::zmq_sub::{SubscriberConfig, start_signal_subscriber};

#[derive(Parser, Debug)]
#[command(name = "supplyshock", version, about = "Supply-chain risk aggregation and alerting")]
struct Cli {
    /// TOML configuration file; missing files fall back to defaults
    #[arg(long, short, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scoring and alerting pipeline (default)
    Run,
    /// Publish random signals for local testing
    Simulate {
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Inspect and update alerts
    Alerts {
        #[command(subcommand)]
        action: AlertCommand,
    },
    /// Inspect stored risk events
    Events {
        #[command(subcommand)]
        action: EventCommand,
    },
    /// Print dashboard counters
    Summary,
}

#[derive(Subcommand, Debug)]
enum AlertCommand {
    List {
        /// open, acknowledged or resolved
        #[arg(long)]
        status: Option<AlertStatus>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    Ack {
        id: String,
    },
    Resolve {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum EventCommand {
    List {
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        commodity: Option<String>,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("supplyshock=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load_with_env(&cli.config);
    debug!("Config: {:?}", config);

    let command = cli.command.unwrap_or(Command::Run);

    // The simulator only publishes; it never touches the database
    if let Command::Simulate { count, interval_ms } = command {
        return match simulate::run_simulator(&config.transport, count, Duration::from_millis(interval_ms)) {
            Ok(sent) => {
                info!("Simulator published {sent} signals");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Simulator failed: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let db = match open_database(&config.database.path) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database at {}: {e}", config.database.path);
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Run => run_pipeline(&config, db),
        Command::Alerts { action } => run_alert_command(&db, action),
        Command::Events {
            action: EventCommand::List { country, commodity, limit },
        } => report(db.list_risk_events(country.as_deref(), commodity.as_deref(), limit)),
        Command::Summary => report(db.dashboard_summary(Utc::now())),
        Command::Simulate { .. } => ExitCode::SUCCESS,
    }
}

fn open_database(path: &str) -> Result<SharedDatabase, Box<dyn std::error::Error>> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = SharedDatabase::open(path)?;
    info!("Database opened at {}", path.display());
    Ok(db)
}

fn run_pipeline(config: &Config, db: SharedDatabase) -> ExitCode {
    info!("⚡ SupplyShock starting...");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let ctx = zmq::Context::new();
    let publisher = match ZmqPublisher::bind(&ctx, &config.transport.risk_endpoint, &config.transport.risk_topic) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to bind risk publisher: {e}");
            return ExitCode::FAILURE;
        }
    };

    // ZMQ -> risk stage
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));
    let subscriber = match start_signal_subscriber(
        &ctx,
        SubscriberConfig::from(&config.transport),
        signal_tx,
        Arc::clone(&stop),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start signal subscriber: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Risk stage -> alert stage
    let (risk_tx, risk_rx) = mpsc::unbounded_channel();

    let aggregator = Arc::new(RiskAggregator::from_config(&config.risk));
    let store = Arc::new(db);
    let risk_stage = RiskStage::new(
        Arc::clone(&aggregator),
        store.clone(),
        vec![
            Box::new(publisher) as Box<dyn RiskSink>,
            Box::new(ChannelSink::new(risk_tx)),
        ],
    );
    let notifier = DesktopNotifier::from_config(&config.notifications);
    let alert_stage = AlertStage::new(Deduplicator::from_config(&config.alerts), store, notifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reclaim_every = Duration::from_secs(config.risk.reclaim_interval_seconds.max(1));

    rt.block_on(async {
        let risk_handle = tokio::spawn(risk_stage.run(signal_rx, shutdown_rx.clone()));
        let alert_handle = tokio::spawn(alert_stage.run(risk_rx, shutdown_rx.clone()));
        let reclaim_handle = tokio::spawn(reclaim_idle_windows(aggregator, reclaim_every, shutdown_rx));
        info!("Pipeline started");

        wait_for_shutdown().await;
        info!("Shutdown requested, draining stages");

        stop.store(true, Ordering::Relaxed);
        let _ = shutdown_tx.send(true);

        match risk_handle.await {
            Ok(stats) => info!(?stats, "Risk stage stopped"),
            Err(e) => error!("Risk stage panicked: {e}"),
        }
        match alert_handle.await {
            Ok(stats) => info!(?stats, "Alert stage stopped"),
            Err(e) => error!("Alert stage panicked: {e}"),
        }
        let _ = reclaim_handle.await;
    });

    if subscriber.join().is_err() {
        warn!("ZMQ subscriber thread panicked");
    }
    info!("SupplyShock stopped");
    ExitCode::SUCCESS
}

/// Periodically drop windows whose entries have all expired.
async fn reclaim_idle_windows(aggregator: Arc<RiskAggregator>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    // first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let reclaimed = aggregator.reclaim_idle(Utc::now());
                if reclaimed > 0 {
                    debug!(reclaimed, tracked = aggregator.tracked_keys(), "Reclaimed idle windows");
                }
            }
        }
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {e}"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
    }
}

fn run_alert_command(db: &SharedDatabase, action: AlertCommand) -> ExitCode {
    let (id, status) = match action {
        AlertCommand::List { status, limit } => return report(db.list_alerts(status, limit)),
        AlertCommand::Ack { id } => (id, AlertStatus::Acknowledged),
        AlertCommand::Resolve { id } => (id, AlertStatus::Resolved),
    };

    let updated = db
        .update_alert_status(&id, status, Utc::now())
        .and_then(|()| db.get_alert(&id)?.ok_or(StoreError::NotFound(id.clone())));
    report(updated)
}

/// Print a query result as pretty JSON.
fn report<T: Serialize>(result: Result<T, StoreError>) -> ExitCode {
    let value = match result {
        Ok(value) => value,
        Err(e) if e.is_client_error() => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Query failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&value) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to encode output: {e}");
            ExitCode::FAILURE
        }
    }
}
