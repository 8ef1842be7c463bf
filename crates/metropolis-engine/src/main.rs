//! Engine binary for Log Metropolis.
//!
//! This is the main entry point that wires together event ingestion, the
//! aggregation tables, the tick loop, and the observer server. It loads
//! configuration, starts every subsystem, and runs until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `metropolis-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Validate configuration
//! 4. Create the aggregator, fan-out, and observer state
//! 5. Start the Observer API server
//! 6. Connect to NATS and start ingestion (optional)
//! 7. Run the tick loop until `Ctrl-C`
//! 8. Cancel, drain, and log the result

mod error;
mod observer_callback;

use std::path::Path;
use std::sync::Arc;

use metropolis_core::{Aggregator, EngineSettings, Fanout, MetropolisConfig, runner};
use metropolis_ingest::{IngestStats, NatsSource};
use metropolis_observer::{AppState, ServerConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::observer_callback::ObserverCallback;

/// Configuration file looked up in the working directory.
const CONFIG_PATH: &str = "metropolis-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the observer server
/// fails.
#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. The log level comes from it, so logging
    //    starts only once it is known.
    let loaded = load_config();
    let level = loaded
        .as_ref()
        .map_or("info", |(config, _)| config.logging.level.as_str());

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(true)
        .init();

    info!("metropolis-engine starting");

    let (config, from_file) = loaded?;
    if !from_file {
        info!("Config file not found, using defaults");
    }

    // 3. Validate configuration.
    config.validate()?;
    let settings = EngineSettings::from_config(&config.engine)?;
    info!(
        tick_interval_ms = config.engine.tick_interval_ms,
        activity_half_life_ms = config.engine.activity_half_life_ms,
        error_half_life_ms = config.engine.error_half_life_ms,
        error_channel = ?settings.error_channel,
        dedup_capacity = settings.dedup_capacity,
        "Configuration loaded"
    );

    // 4. Create the engine.
    let aggregator = Arc::new(Aggregator::new(settings));
    let snapshotter = aggregator.snapshotter();
    let fanout = Arc::new(Fanout::new(config.fanout.subscriber_buffer));
    let app_state = Arc::new(AppState::new(fanout, config.fanout.delivery_timeout()));
    let shutdown = CancellationToken::new();

    // 5. Start Observer API server.
    let server_config = ServerConfig {
        host: config.infrastructure.observer_host.clone(),
        port: config.infrastructure.observer_port,
    };
    let observer_handle = spawn_observer(server_config, Arc::clone(&app_state), shutdown.clone());

    // 6. Connect to NATS and start ingestion.
    let ingest_handle = spawn_ingest(&config, Arc::clone(&aggregator), shutdown.clone()).await;

    // 7. Run the tick loop until Ctrl-C.
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => error!(error = %e, "failed to listen for Ctrl-C, shutting down"),
        }
        signal_token.cancel();
    });

    let mut callback = ObserverCallback::new(Arc::clone(&app_state));
    let summary = runner::run_ticks(&snapshotter, &mut callback, shutdown.clone()).await;

    // 8. Drain and log results.
    shutdown.cancel();
    runner::log_run_end(&summary);

    if let Some(handle) = ingest_handle {
        match handle.await {
            Ok(stats) => info!(
                received = stats.received,
                applied = stats.applied,
                duplicates = stats.duplicates,
                rejected = stats.rejected,
                warnings = stats.warnings,
                "Ingestion summary"
            ),
            Err(e) => warn!(error = %e, "ingest task failed"),
        }
    }

    let observer_result = observer_handle.await;

    let stats = aggregator.stats();
    info!(
        total_ticks = summary.total_ticks,
        events_applied = stats.applied,
        events_clamped = stats.clamped,
        duplicates = stats.duplicates,
        evicted = summary.evicted,
        "metropolis-engine shutdown complete"
    );

    match observer_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(EngineError::Observer {
            message: e.to_string(),
        }
        .into()),
        Err(e) => Err(EngineError::Observer {
            message: format!("observer task failed: {e}"),
        }
        .into()),
    }
}

/// Load configuration from [`CONFIG_PATH`].
///
/// Returns the configuration and whether it came from the file. A missing
/// file yields the defaults (with environment overrides applied).
fn load_config() -> Result<(MetropolisConfig, bool), EngineError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        let config = MetropolisConfig::from_file(config_path)?;
        Ok((config, true))
    } else {
        Ok((MetropolisConfig::parse("")?, false))
    }
}

/// Run the observer server in the background.
///
/// A server that cannot bind or serve cancels `shutdown`, which stops the
/// whole engine.
fn spawn_observer(
    config: ServerConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> JoinHandle<Result<(), metropolis_observer::ServerError>> {
    tokio::spawn(async move {
        let result = metropolis_observer::start_server(&config, state, shutdown.clone()).await;
        if let Err(ref e) = result {
            error!(error = %e, "Observer server failed");
            shutdown.cancel();
        }
        result
    })
}

/// Connect to NATS and run ingestion in the background.
///
/// Returns `None` when the broker is unreachable; the engine then keeps
/// ticking and serving with whatever state it has.
async fn spawn_ingest(
    config: &MetropolisConfig,
    aggregator: Arc<Aggregator>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<IngestStats>> {
    let infra = &config.infrastructure;
    info!(nats_url = infra.nats_url, "Connecting to NATS");

    let source = match NatsSource::connect(&infra.nats_url).await {
        Ok(source) => source,
        Err(e) => {
            warn!(error = %e, "NATS unavailable, running without ingestion");
            return None;
        }
    };
    let subscriber = match source.subscribe(&infra.subject, &infra.queue_group).await {
        Ok(subscriber) => subscriber,
        Err(e) => {
            warn!(error = %e, "NATS subscription failed, running without ingestion");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        // The client must outlive its subscription.
        let _source = source;
        let stream = metropolis_ingest::payloads(subscriber);
        metropolis_ingest::consume(stream, &aggregator, shutdown).await
    }))
}
