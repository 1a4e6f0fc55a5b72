use crate::alerts::engine::AlertEngine;
use crate::analysis::anomaly::AnomalyDetector;
use crate::analysis::risk::{RiskScore, RiskScorer};
use crate::analysis::signals::SignalGenerator;
use crate::config::CollectionConfig;
use crate::data::snapshot::SnapshotBuilder;
use crate::data::Collector;
use crate::monitoring::logger::CsvLogger;
use crate::processing::frame::MarketFrame;
use crate::processing::stream::StreamProcessor;
use crate::storage::store::MarketStore;
use anyhow::Result;
use chrono::{Datelike, Duration as ChronoDuration, NaiveTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Drives the pipeline on its three cadences: real-time collection plus
/// evaluation, daily macro collection plus store cleanup, and a weekly
/// source health check. Every job tolerates partial or empty batches.
pub struct CollectionScheduler {
    config: CollectionConfig,
    store: Arc<MarketStore>,
    quote_collector: Arc<dyn Collector>,
    fred_collector: Option<Arc<dyn Collector>>,
    stream: Arc<StreamProcessor>,
    anomaly_detector: AnomalyDetector,
    snapshot_builder: SnapshotBuilder,
    signal_generator: SignalGenerator,
    risk_scorer: RiskScorer,
    alert_engine: Arc<AlertEngine>,
    csv_logger: Option<CsvLogger>,
    latest_risk: Mutex<Option<RiskScore>>,
}

impl CollectionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CollectionConfig,
        store: Arc<MarketStore>,
        quote_collector: Arc<dyn Collector>,
        fred_collector: Option<Arc<dyn Collector>>,
        stream: Arc<StreamProcessor>,
        anomaly_detector: AnomalyDetector,
        snapshot_builder: SnapshotBuilder,
        signal_generator: SignalGenerator,
        risk_scorer: RiskScorer,
        alert_engine: Arc<AlertEngine>,
        csv_logger: Option<CsvLogger>,
    ) -> Self {
        Self {
            config,
            store,
            quote_collector,
            fred_collector,
            stream,
            anomaly_detector,
            snapshot_builder,
            signal_generator,
            risk_scorer,
            alert_engine,
            csv_logger,
            latest_risk: Mutex::new(None),
        }
    }

    /// Spawn the collection and evaluation loops. Tasks run until the
    /// process exits; there is no mid-flight cancellation to manage.
    pub fn start(self: &Arc<Self>) {
        let realtime = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(realtime.config.realtime_interval_secs));
            loop {
                ticker.tick().await;
                realtime.collect_realtime().await;
            }
        });

        let evaluation = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(
                evaluation.config.evaluation_interval_secs,
            ));
            loop {
                ticker.tick().await;
                if let Err(e) = evaluation.run_evaluation() {
                    error!("Evaluation cycle failed: {:#}", e);
                }
            }
        });

        let daily = self.clone();
        tokio::spawn(async move {
            loop {
                match seconds_until_daily(&daily.config.daily_time) {
                    Ok(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    Err(e) => {
                        error!("Bad daily_time in config: {:#}", e);
                        return;
                    }
                }
                daily.collect_daily().await;
            }
        });

        let weekly = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(seconds_until_weekly())).await;
                weekly.check_sources().await;
            }
        });

        info!("Data collection scheduler started");
    }

    /// Real-time path: collect quotes, persist, feed the stream processor.
    async fn collect_realtime(&self) {
        let symbols = self.config.symbols.realtime();
        if symbols.is_empty() {
            return;
        }

        let observations = match self.quote_collector.collect(&symbols).await {
            Ok(observations) => observations,
            Err(e) => {
                error!("Real-time collection failed: {:#}", e);
                return;
            }
        };

        for obs in &observations {
            if let Err(e) = self.store.write_market_data(obs) {
                error!("Failed to persist {}: {:#}", obs.symbol, e);
            }

            if let Some(signal) =
                self.stream
                    .process_tick(&obs.symbol, obs.price, Some(obs.timestamp))
            {
                warn!(
                    "Tick anomaly on {}: z={:.2}, score={:.0}",
                    signal.symbol, signal.z_score, signal.anomaly_score
                );
            }
        }
    }

    /// Evaluation path: snapshot → signals → risk score → alerts → persist.
    fn run_evaluation(&self) -> Result<()> {
        let snapshot = self.snapshot_builder.build(&self.store)?;

        let signals = self.signal_generator.generate_signals(&snapshot);
        for signal in &signals {
            if let Err(e) = self.store.create_signal(signal) {
                error!("Failed to persist signal {}: {:#}", signal.scenario, e);
            }
        }

        let risk = self.risk_scorer.calculate_risk_score(&snapshot);
        info!(
            "Risk score: {:.1} ({}): {}",
            risk.total, risk.level, risk.recommendation
        );
        *self.latest_risk.lock().expect("risk slot poisoned") = Some(risk);

        let alerts = self.alert_engine.evaluate_alerts(&signals);
        for alert in &alerts {
            if let Err(e) = self.store.insert_alert(alert) {
                error!("Failed to persist alert {}: {:#}", alert.id, e);
            }
            if let Some(logger) = &self.csv_logger {
                if let Err(e) = logger.log_alert(alert) {
                    error!("CSV log failed for {}: {:#}", alert.id, e);
                }
            }
        }

        Ok(())
    }

    /// Daily path: macro series, yield-curve check, store cleanup.
    async fn collect_daily(&self) {
        info!("Starting daily data collection");

        if let Some(fred) = &self.fred_collector {
            match fred.collect(&self.config.symbols.fred_series).await {
                Ok(observations) => {
                    for obs in &observations {
                        if let Err(e) = self.store.write_market_data(obs) {
                            error!("Failed to persist {}: {:#}", obs.symbol, e);
                        }
                    }
                }
                Err(e) => error!("Daily FRED collection failed: {:#}", e),
            }
        }

        self.run_batch_detection();

        match self.store.cleanup_old_data() {
            Ok(deleted) => {
                let total: usize = deleted.values().sum();
                if total > 0 {
                    info!("Retention cleanup removed {} rows: {:?}", total, deleted);
                }
            }
            Err(e) => error!("Retention cleanup failed: {:#}", e),
        }
    }

    /// Batch path: per-symbol frames over the last week of stored data,
    /// pushed through the multi-method detector.
    fn run_batch_detection(&self) {
        let lookback = Utc::now() - ChronoDuration::days(7);

        for symbol in self.config.symbols.realtime() {
            let observations =
                match self.store.read_market_data(&symbol, Some(lookback), None, 1000) {
                    Ok(observations) => observations,
                    Err(e) => {
                        error!("Batch read failed for {}: {:#}", symbol, e);
                        continue;
                    }
                };
            if observations.is_empty() {
                continue;
            }

            let mut frame = MarketFrame::new();
            for obs in &observations {
                frame.push_row(
                    Some(obs.timestamp),
                    &[
                        ("price", Some(obs.price)),
                        ("volume", obs.volume.map(|v| v as f64)),
                    ],
                );
            }

            let anomalies = self.anomaly_detector.detect(&frame);
            if let Some(top) = anomalies.first() {
                warn!(
                    "{}: {} batch anomalies, top {:?} score {:.0} at {}",
                    symbol,
                    anomalies.len(),
                    top.method,
                    top.score,
                    top.timestamp
                );
            }
        }
    }

    /// Weekly path: probe every source and surface unhealthy ones.
    async fn check_sources(&self) {
        if !self.quote_collector.validate_connection().await {
            warn!("Collector {} failed its health check", self.quote_collector.name());
        }
        if let Some(fred) = &self.fred_collector {
            if !fred.validate_connection().await {
                warn!("Collector {} failed its health check", fred.name());
            }
        }
    }

    /// Latest computed risk score, for read-only presentation.
    pub fn latest_risk_score(&self) -> Option<RiskScore> {
        self.latest_risk.lock().expect("risk slot poisoned").clone()
    }
}

/// Seconds until the next UTC occurrence of "HH:MM".
fn seconds_until_daily(daily_time: &str) -> Result<u64> {
    let target = NaiveTime::parse_from_str(daily_time, "%H:%M")
        .map_err(|e| anyhow::anyhow!("daily_time must be HH:MM: {}", e))?;

    let now = Utc::now();
    let today_target = now.date_naive().and_time(target).and_utc();
    let next = if today_target > now {
        today_target
    } else {
        today_target + ChronoDuration::days(1)
    };

    Ok((next - now).num_seconds().max(1) as u64)
}

/// Seconds until next Saturday 00:00 UTC.
fn seconds_until_weekly() -> u64 {
    let now = Utc::now();
    let weekday = now.date_naive().weekday().num_days_from_monday(); // Sat = 5
    let days_ahead = (5 + 7 - weekday) % 7;
    let next = now.date_naive().and_time(NaiveTime::MIN).and_utc()
        + ChronoDuration::days(if days_ahead == 0 { 7 } else { days_ahead as i64 });
    (next - now).num_seconds().max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_until_daily_parses() {
        let secs = seconds_until_daily("21:00").unwrap();
        assert!(secs >= 1);
        assert!(secs <= 86_400);
    }

    #[test]
    fn test_seconds_until_daily_rejects_garbage() {
        assert!(seconds_until_daily("9pm").is_err());
    }

    #[test]
    fn test_seconds_until_weekly_bounded() {
        let secs = seconds_until_weekly();
        assert!(secs >= 1);
        assert!(secs <= 7 * 86_400);
    }
}
