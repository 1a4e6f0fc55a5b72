use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::alerts::engine::Alert;
use crate::analysis::signals::{Signal, SignalSeverity};
use crate::data::types::Observation;

/// Durable store for observations, signals, alerts and predictions.
///
/// Explicitly constructed and passed by handle (no global singleton); open
/// it at process start and let it drop at shutdown. The connection sits
/// behind a mutex so the handle can be shared across tasks.
pub struct MarketStore {
    conn: Mutex<Connection>,
    retention_days: i64,
}

#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub id: i64,
    pub active: bool,
    pub signal: Signal,
}

#[derive(Debug, Clone)]
pub struct Prediction {
    pub id: i64,
    pub model_type: String,
    pub direction: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl MarketStore {
    pub fn open(db_path: &str, retention_days: i64) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        Self::with_connection(conn, retention_days)
    }

    #[cfg(test)]
    pub fn open_in_memory(retention_days: i64) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, retention_days)
    }

    fn with_connection(conn: Connection, retention_days: i64) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS market_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timestamp TIMESTAMP NOT NULL,
                price REAL NOT NULL,
                volume INTEGER,
                bid REAL,
                ask REAL,
                open REAL,
                high REAL,
                low REAL,
                close REAL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TIMESTAMP NOT NULL,
                scenario TEXT NOT NULL,
                severity TEXT NOT NULL,
                confidence REAL NOT NULL,
                triggers TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                active INTEGER NOT NULL DEFAULT 1,
                deactivated_at TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                timestamp TIMESTAMP NOT NULL,
                severity TEXT NOT NULL,
                scenario TEXT NOT NULL,
                confidence REAL NOT NULL,
                message TEXT NOT NULL,
                triggers TEXT NOT NULL,
                recommendation TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TIMESTAMP NOT NULL,
                model_type TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence REAL NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_market_data_symbol_ts
                ON market_data(symbol, timestamp);
            CREATE INDEX IF NOT EXISTS idx_signals_active ON signals(active);
            CREATE INDEX IF NOT EXISTS idx_signals_ts ON signals(timestamp);
            CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(timestamp);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            retention_days,
        })
    }

    pub fn write_market_data(&self, obs: &Observation) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO market_data
                (symbol, timestamp, price, volume, bid, ask, open, high, low, close, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                obs.symbol,
                obs.timestamp.to_rfc3339(),
                obs.price,
                obs.volume,
                obs.bid,
                obs.ask,
                obs.open,
                obs.high,
                obs.low,
                obs.close,
                serde_json::to_string(&obs.metadata)?,
            ],
        )?;
        debug!("Market data saved: {}", obs.symbol);
        Ok(())
    }

    /// Observations for a symbol in [start, end], ascending by time.
    /// Defaults: last 24 hours, up to `limit` rows (most recent kept).
    pub fn read_market_data(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Observation>> {
        let start = start.unwrap_or_else(|| Utc::now() - Duration::days(1));
        let end = end.unwrap_or_else(Utc::now);

        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT symbol, timestamp, price, volume, bid, ask, open, high, low, close, metadata
             FROM market_data
             WHERE symbol = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp DESC
             LIMIT ?4",
        )?;

        let rows = stmt.query_map(
            params![symbol, start.to_rfc3339(), end.to_rfc3339(), limit],
            |row| {
                let ts: String = row.get(1)?;
                let metadata: String = row.get(10)?;
                Ok((
                    Observation {
                        symbol: row.get(0)?,
                        timestamp: Utc::now(), // replaced below
                        price: row.get(2)?,
                        volume: row.get(3)?,
                        bid: row.get(4)?,
                        ask: row.get(5)?,
                        open: row.get(6)?,
                        high: row.get(7)?,
                        low: row.get(8)?,
                        close: row.get(9)?,
                        metadata: Default::default(),
                    },
                    ts,
                    metadata,
                ))
            },
        )?;

        let mut observations = Vec::new();
        for row in rows {
            let (mut obs, ts, metadata) = row?;
            obs.timestamp = parse_timestamp(&ts)?;
            obs.metadata = serde_json::from_str(&metadata).unwrap_or_default();
            observations.push(obs);
        }
        observations.reverse();
        Ok(observations)
    }

    /// Persist a signal as active; returns the row id.
    pub fn create_signal(&self, signal: &Signal) -> Result<i64> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO signals
                (timestamp, scenario, severity, confidence, triggers, recommendation, metadata, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
            params![
                signal.timestamp.to_rfc3339(),
                signal.scenario,
                signal.severity.to_string(),
                signal.confidence,
                serde_json::to_string(&signal.triggers)?,
                signal.recommendation,
                serde_json::to_string(&signal.metadata)?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Signal created: {}", id);
        Ok(id)
    }

    pub fn get_active_signals(
        &self,
        severity: Option<SignalSeverity>,
        limit: usize,
    ) -> Result<Vec<StoredSignal>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, scenario, severity, confidence, triggers,
                    recommendation, metadata, active
             FROM signals
             WHERE active = 1 AND (?1 IS NULL OR severity = ?1)
             ORDER BY timestamp DESC
             LIMIT ?2",
        )?;

        let severity_filter = severity.map(|s| s.to_string());
        let rows = stmt.query_map(params![severity_filter, limit], |row| {
            let ts: String = row.get(1)?;
            let severity: String = row.get(3)?;
            let triggers: String = row.get(5)?;
            let metadata: String = row.get(7)?;
            Ok((
                row.get::<_, i64>(0)?,
                ts,
                row.get::<_, String>(2)?,
                severity,
                row.get::<_, f64>(4)?,
                triggers,
                row.get::<_, String>(6)?,
                metadata,
                row.get::<_, bool>(8)?,
            ))
        })?;

        let mut signals = Vec::new();
        for row in rows {
            let (id, ts, scenario, severity, confidence, triggers, recommendation, metadata, active) =
                row?;
            signals.push(StoredSignal {
                id,
                active,
                signal: Signal {
                    scenario,
                    severity: parse_signal_severity(&severity)?,
                    confidence,
                    triggers: serde_json::from_str(&triggers).unwrap_or_default(),
                    recommendation,
                    timestamp: parse_timestamp(&ts)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                },
            });
        }
        Ok(signals)
    }

    pub fn deactivate_signal(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let changed = conn.execute(
            "UPDATE signals SET active = 0, deactivated_at = ?1 WHERE id = ?2 AND active = 1",
            params![Utc::now().to_rfc3339(), id],
        )?;
        if changed > 0 {
            info!("Signal deactivated: {}", id);
        }
        Ok(changed > 0)
    }

    pub fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO alerts
                (id, timestamp, severity, scenario, confidence, message, triggers,
                 recommendation, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                alert.id,
                alert.timestamp.to_rfc3339(),
                alert.severity.to_string(),
                alert.scenario,
                alert.confidence,
                alert.message,
                serde_json::to_string(&alert.triggers)?,
                alert.recommendation,
                serde_json::to_string(&alert.metadata)?,
            ],
        )?;
        Ok(())
    }

    /// Most recent alerts, ascending by time.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, severity, scenario, confidence, message, triggers,
                    recommendation, metadata
             FROM alerts
             ORDER BY timestamp DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut alerts = Vec::new();
        for row in rows {
            let (id, ts, severity, scenario, confidence, message, triggers, recommendation, metadata) =
                row?;
            alerts.push(Alert {
                id,
                timestamp: parse_timestamp(&ts)?,
                severity: parse_alert_severity(&severity)?,
                scenario,
                confidence,
                message,
                triggers: serde_json::from_str(&triggers).unwrap_or_default(),
                recommendation,
                metadata: serde_json::from_str(&metadata).unwrap_or_default(),
            });
        }
        alerts.reverse();
        Ok(alerts)
    }

    pub fn save_prediction(
        &self,
        model_type: &str,
        direction: &str,
        confidence: f64,
        metadata: &Map<String, Value>,
    ) -> Result<i64> {
        let conn = self.conn.lock().expect("store connection poisoned");
        conn.execute(
            "INSERT INTO predictions (created_at, model_type, direction, confidence, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                Utc::now().to_rfc3339(),
                model_type,
                direction,
                confidence,
                serde_json::to_string(metadata)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_latest_prediction(&self, model_type: Option<&str>) -> Result<Option<Prediction>> {
        let conn = self.conn.lock().expect("store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, created_at, model_type, direction, confidence, metadata
             FROM predictions
             WHERE ?1 IS NULL OR model_type = ?1
             ORDER BY created_at DESC
             LIMIT 1",
        )?;

        let mut rows = stmt.query_map(params![model_type], |row| {
            let created: String = row.get(1)?;
            let metadata: String = row.get(5)?;
            Ok((
                row.get::<_, i64>(0)?,
                created,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                metadata,
            ))
        })?;

        match rows.next() {
            Some(row) => {
                let (id, created, model_type, direction, confidence, metadata) = row?;
                Ok(Some(Prediction {
                    id,
                    model_type,
                    direction,
                    confidence,
                    created_at: parse_timestamp(&created)?,
                    metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    /// Delete rows older than the retention window; returns per-table
    /// deleted counts.
    pub fn cleanup_old_data(&self) -> Result<BTreeMap<String, usize>> {
        let cutoff = (Utc::now() - Duration::days(self.retention_days)).to_rfc3339();
        let conn = self.conn.lock().expect("store connection poisoned");

        let mut deleted = BTreeMap::new();
        for (table, column) in [
            ("market_data", "timestamp"),
            ("signals", "timestamp"),
            ("alerts", "timestamp"),
            ("predictions", "created_at"),
        ] {
            let count = conn.execute(
                &format!("DELETE FROM {} WHERE {} < ?1", table, column),
                params![cutoff],
            )?;
            if count > 0 {
                info!("Cleaned {} old rows from {}", count, table);
            }
            deleted.insert(table.to_string(), count);
        }

        Ok(deleted)
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp in store: {}", s))?
        .with_timezone(&Utc))
}

fn parse_signal_severity(s: &str) -> Result<SignalSeverity> {
    match s {
        "info" => Ok(SignalSeverity::Info),
        "warning" => Ok(SignalSeverity::Warning),
        "critical" => Ok(SignalSeverity::Critical),
        "emergency" => Ok(SignalSeverity::Emergency),
        other => Err(anyhow!("Unknown signal severity in store: {}", other)),
    }
}

fn parse_alert_severity(s: &str) -> Result<crate::alerts::engine::AlertSeverity> {
    use crate::alerts::engine::AlertSeverity;
    match s {
        "INFO" => Ok(AlertSeverity::Info),
        "WARNING" => Ok(AlertSeverity::Warning),
        "CRITICAL" => Ok(AlertSeverity::Critical),
        "EMERGENCY" => Ok(AlertSeverity::Emergency),
        other => Err(anyhow!("Unknown alert severity in store: {}", other)),
    }
}
