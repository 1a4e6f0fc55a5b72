use anyhow::Result;
use std::fs::OpenOptions;
use std::io::Write;

use crate::alerts::engine::Alert;

/// Append-only CSV log of dispatched alerts.
pub struct CsvLogger {
    log_path: String,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;

            writeln!(file, "timestamp,id,severity,scenario,confidence,triggers")?;
        }

        Ok(Self { log_path })
    }

    pub fn log_alert(&self, alert: &Alert) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;

        writeln!(
            file,
            "{},{},{},{},{:.2},{}",
            alert.timestamp.to_rfc3339(),
            alert.id,
            alert.severity,
            alert.scenario,
            alert.confidence,
            alert.triggers.join("; ").replace(',', ";"),
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::engine::AlertSeverity;
    use crate::analysis::signals::{Signal, SignalSeverity};
    use chrono::Utc;
    use serde_json::Map;

    #[test]
    fn test_header_and_append() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sentinel-alerts-{}.csv", std::process::id()));
        let path_str = path.to_string_lossy().to_string();
        let _ = std::fs::remove_file(&path);

        let logger = CsvLogger::new(path_str.clone()).unwrap();
        let signal = Signal {
            scenario: "volatility_spike".to_string(),
            severity: SignalSeverity::Warning,
            confidence: 0.8,
            triggers: vec!["VIX jump: +25.0% (now 28.0)".to_string()],
            recommendation: "Reduce position sizes.".to_string(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        };
        logger
            .log_alert(&Alert::from_signal(&signal, AlertSeverity::Warning))
            .unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,id,severity"));
        assert!(lines[1].contains("WARNING"));
        assert!(lines[1].contains("volatility_spike"));

        std::fs::remove_file(&path).unwrap();
    }
}
