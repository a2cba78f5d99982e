//! Weather Mixer Daemon
//!
//! Opens the stores, brings them up to date, runs one mixing pass and then
//! holds the stores open until interrupted.

mod settings;

pub use settings::{Settings, DEFAULT_CONFIG_FILE};

use std::sync::Arc;

use anyhow::Context;
use data_validator::DEFAULT_SCOPE;
use mixer::{MixReport, Mixer};
use storage::{
    CommandExecutor, DatabaseManager, ForecastRegistry, LimitTable, MixedRecordStore,
    ObservationStore, UserMetricRegistry,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use weather_data::{current_timestamp, start_of_day, SECONDS_PER_DAY};

/// Parse a configured log level name or number
pub fn parse_level(level: &str) -> Option<Level> {
    level.trim().parse::<Level>().ok()
}

/// Initialize logging. An unknown level falls back to info and is reported
/// once the subscriber is installed.
pub fn init_logging(level: &str, json: bool) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let parsed = parse_level(level);
    let builder = FmtSubscriber::builder()
        .with_max_level(parsed.unwrap_or(Level::INFO))
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    if parsed.is_none() {
        warn!("Unknown log level '{}', using info", level);
    }
    Ok(())
}

/// Everything a running daemon holds on to
pub struct Services {
    pub manager: DatabaseManager,
    pub forecast: ForecastRegistry,
    pub limits: LimitTable,
    pub observations: ObservationStore,
    pub user_metrics: UserMetricRegistry,
    pub mixed: MixedRecordStore,
    pub mixer: Mixer,
    /// Outcome of the startup mixing pass
    pub report: MixReport,
}

impl Services {
    /// Drop the metric cache and close every store
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.user_metrics.teardown()?;
        self.manager.uninitialize().await?;
        Ok(())
    }
}

/// Open and migrate the stores, repair and prune them, then mix what is
/// pending.
pub async fn start(executor: &CommandExecutor, settings: &Settings) -> anyhow::Result<Services> {
    let storage = &settings.storage;
    let manager = DatabaseManager::new(executor.clone());
    manager
        .initialize(&storage.data_dir)
        .await
        .with_context(|| format!("Failed to open stores in {}", storage.data_dir.display()))?;

    let user_metrics = UserMetricRegistry::new(executor.clone());
    let cached = user_metrics.build_cache().await?;
    info!("Loaded {} user metrics", cached);

    let limits = LimitTable::new(executor.clone());
    let validator = limits
        .load_validator(DEFAULT_SCOPE)
        .await
        .context("Failed to load metric limits")?;

    let forecast = ForecastRegistry::new(executor.clone());
    let observations = ObservationStore::new(executor.clone(), Arc::new(validator), user_metrics.clone());
    let mixed = MixedRecordStore::new(executor.clone());
    let mixer = Mixer::new(executor.clone(), settings.mixer.clone());

    let now = current_timestamp();
    if let Some(last_mixed) = mixed.last_tick_id().await? {
        forecast.fix_corrupted_data(last_mixed, now).await?;
    }

    let pruned = observations
        .prune_history(storage.observation_retention_days)
        .await?;
    let cutoff = start_of_day(now) - i64::from(storage.mixer_retention_days) * SECONDS_PER_DAY;
    let mixed_pruned = mixed.delete_older_than(cutoff).await?;
    info!(
        "Retention applied: {:?}, {} mixed rows removed",
        pruned, mixed_pruned
    );

    let report = mixer.run_pending().await?;

    Ok(Services {
        manager,
        forecast,
        limits,
        observations,
        user_metrics,
        mixed,
        mixer,
        report,
    })
}

/// Run until Ctrl-C
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let executor = CommandExecutor::spawn(settings.storage.queue_capacity);
    let services = match start(&executor, &settings).await {
        Ok(services) => services,
        Err(e) => {
            executor.shutdown().await;
            return Err(e);
        }
    };

    let latest = services.mixed.latest().await?;
    match latest.first() {
        Some(record) => info!(
            "Latest mixed tick {}: {} records, first {}",
            record.forecast_tick_id,
            latest.len(),
            serde_json::to_string(record)?
        ),
        None => info!("No mixed records yet"),
    }

    info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    services.stop().await?;
    executor.shutdown().await;
    Ok(())
}
