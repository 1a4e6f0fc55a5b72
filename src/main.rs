mod alerts;
mod analysis;
mod config;
mod data;
mod monitoring;
mod processing;
mod storage;

use std::sync::Arc;
use std::time::Duration;

use alerts::engine::AlertEngine;
use alerts::notifiers::email::EmailNotifier;
use alerts::notifiers::slack::SlackNotifier;
use analysis::anomaly::AnomalyDetector;
use analysis::risk::RiskScorer;
use analysis::signals::SignalGenerator;
use anyhow::Result;
use config::{Config, EnvConfig};
use data::fred::FredCollector;
use data::quotes::QuoteCollector;
use data::scheduler::CollectionScheduler;
use data::snapshot::SnapshotBuilder;
use monitoring::logger::CsvLogger;
use processing::stream::StreamProcessor;
use storage::store::MarketStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("🚀 Market Sentinel starting...");

    // Load configuration
    tracing::info!("Loading configuration...");
    let config = Config::load("config.toml")?;
    let env_config = EnvConfig::load()?;

    let dry_run = config.system.dry_run || env_config.dry_run;
    tracing::info!("Dry run mode: {}", dry_run);
    tracing::info!(
        "Tracking {} real-time symbols",
        config.collection.symbols.realtime().len()
    );

    // Open the store at process start; it is passed by handle everywhere.
    tracing::info!("Opening database: {}", config.system.database_path);
    let store = Arc::new(MarketStore::open(
        &config.system.database_path,
        config.system.retention_days,
    )?);

    // Collectors
    let quote_collector = Arc::new(QuoteCollector::new(
        env_config.quote_api_base_url.clone(),
        Duration::from_millis(config.collection.rate_limit_delay_ms),
    ));
    let fred_collector: Option<Arc<dyn data::Collector>> = match &env_config.fred_api_key {
        Some(api_key) => Some(Arc::new(FredCollector::new(api_key.clone()))),
        None => {
            tracing::warn!("FRED API key not found, FRED collector disabled");
            None
        }
    };

    // Pipeline components
    let stream = Arc::new(StreamProcessor::new(config.stream.window_size));
    let anomaly_detector = AnomalyDetector::new(&config.detection);
    let signal_generator = SignalGenerator::new();
    let risk_scorer = RiskScorer::new(config.risk.clone())?;
    let alert_engine = Arc::new(AlertEngine::new(config.alerts.clone()));

    // Notification channels: constructed only when credentials exist.
    if dry_run {
        tracing::info!("Dry run: notification channels disabled");
    } else {
        if let Some(webhook_url) = &env_config.slack_webhook_url {
            alert_engine.register_notifier(
                "slack",
                Arc::new(SlackNotifier::new(
                    webhook_url.clone(),
                    config.notifications.slack_channel.clone(),
                    config.notifications.slack_username.clone(),
                )),
            );
        }
        if let (Some(relay_url), Some(api_key)) = (
            &env_config.email_relay_url,
            &env_config.email_relay_api_key,
        ) {
            match EmailNotifier::new(
                relay_url.clone(),
                api_key.clone(),
                config.notifications.email_from.clone(),
                config.notifications.email_to.clone(),
            ) {
                Ok(notifier) => alert_engine.register_notifier("email", Arc::new(notifier)),
                Err(e) => tracing::warn!("Email channel disabled: {}", e),
            }
        }
    }

    let csv_logger = if config.monitoring.csv_logging {
        Some(CsvLogger::new(config.monitoring.csv_log_path.clone())?)
    } else {
        None
    };

    // Startup retention pass, then hand off to the scheduler.
    let deleted = store.cleanup_old_data()?;
    tracing::info!(
        "Startup retention cleanup removed {} rows",
        deleted.values().sum::<usize>()
    );

    let scheduler = Arc::new(CollectionScheduler::new(
        config.collection.clone(),
        store,
        quote_collector,
        fred_collector,
        stream,
        anomaly_detector,
        SnapshotBuilder::with_default_mappings(),
        signal_generator,
        risk_scorer,
        alert_engine,
        csv_logger,
    ));
    scheduler.start();

    tracing::info!("✅ Market Sentinel initialized");
    tracing::info!("Watching for market anomalies...");

    // Keep running
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    Ok(())
}
