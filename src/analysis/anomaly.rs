use crate::analysis::forest::{ForestParams, IsolationForest};
use crate::config::DetectionConfig;
use crate::processing::frame::MarketFrame;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::RwLock;
use tracing::info;

/// Fused output is truncated to this many anomalies, highest score first.
const MAX_FUSED: usize = 50;

/// Columns need this many present values before statistical scoring.
const MIN_COLUMN_SAMPLES: usize = 30;

/// Rows needed before the ML method participates.
const MIN_ML_ROWS: usize = 100;

/// Rolling window for the volume-spike pattern.
const VOLUME_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Statistical,
    Ml,
    Pattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub symbol: String,
    pub timestamp: String,
    pub method: DetectionMethod,
    pub severity: AnomalySeverity,
    pub score: f64,
    pub details: Map<String, Value>,
}

enum ModelState {
    Untrained,
    Trained(IsolationForest),
}

/// Batch anomaly detector: statistical, ML and pattern methods fused into
/// one ranked list.
///
/// The isolation forest is trained lazily on the first batch with enough
/// rows and reused for the detector's lifetime; retraining means building a
/// new detector.
pub struct AnomalyDetector {
    z_threshold: f64,
    forest_params: ForestParams,
    model: RwLock<ModelState>,
}

impl AnomalyDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            z_threshold: config.z_score_threshold,
            forest_params: ForestParams {
                contamination: config.isolation_forest_contamination,
                ..ForestParams::default()
            },
            model: RwLock::new(ModelState::Untrained),
        }
    }

    /// Run all three methods and fuse: concatenate, sort descending by
    /// score, keep the top 50. Duplicate detections of one underlying event
    /// by different methods are intentionally retained.
    pub fn detect(&self, frame: &MarketFrame) -> Vec<Anomaly> {
        let mut anomalies = self.statistical_detection(frame);

        if frame.len() >= MIN_ML_ROWS {
            anomalies.extend(self.ml_detection(frame));
        }

        anomalies.extend(self.pattern_detection(frame));

        anomalies.sort_by(|a, b| b.score.total_cmp(&a.score));
        anomalies.truncate(MAX_FUSED);

        info!("Detected {} anomalies", anomalies.len());
        anomalies
    }

    fn statistical_detection(&self, frame: &MarketFrame) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for name in frame.column_names() {
            if name == "timestamp" {
                continue;
            }
            let column = match frame.column(name) {
                Some(c) => c,
                None => continue,
            };

            let present: Vec<(usize, f64)> = column
                .iter()
                .enumerate()
                .filter_map(|(idx, v)| v.map(|v| (idx, v)))
                .collect();
            if present.len() < MIN_COLUMN_SAMPLES {
                continue;
            }

            let mean = present.iter().map(|(_, v)| v).sum::<f64>() / present.len() as f64;
            let std = sample_std(&present, mean);
            if std == 0.0 {
                continue;
            }

            for (idx, value) in &present {
                let z = ((value - mean) / std).abs();
                if z > self.z_threshold {
                    anomalies.push(Anomaly {
                        symbol: name.to_string(),
                        timestamp: frame.row_label(*idx),
                        method: DetectionMethod::Statistical,
                        severity: severity_from_z(z),
                        score: (z * 20.0).min(100.0),
                        details: details(&[
                            ("z_score", json!(z)),
                            ("value", json!(value)),
                            ("mean", json!(mean)),
                            ("std", json!(std)),
                        ]),
                    });
                }
            }
        }

        anomalies
    }

    fn ml_detection(&self, frame: &MarketFrame) -> Vec<Anomaly> {
        // Columns with at least one present value; missing cells are filled
        // with the column mean.
        let columns: Vec<(&str, f64)> = frame
            .column_names()
            .filter(|name| *name != "timestamp")
            .filter_map(|name| frame.column_mean(name).map(|mean| (name, mean)))
            .collect();
        if columns.is_empty() {
            return Vec::new();
        }

        let matrix: Vec<Vec<f64>> = (0..frame.len())
            .map(|row| {
                columns
                    .iter()
                    .map(|(name, mean)| {
                        frame
                            .column(name)
                            .and_then(|c| c[row])
                            .unwrap_or(*mean)
                    })
                    .collect()
            })
            .collect();

        self.ensure_trained(&matrix);

        let guard = self.model.read().expect("model lock poisoned");
        let forest = match &*guard {
            ModelState::Trained(forest) => forest,
            ModelState::Untrained => return Vec::new(),
        };

        let mut anomalies = Vec::new();
        for (row_idx, row) in matrix.iter().enumerate() {
            if !forest.is_outlier(row) {
                continue;
            }
            let raw = forest.score(row);
            let score = (raw * 100.0).min(100.0);
            let severity = if score > 75.0 {
                AnomalySeverity::High
            } else if score > 50.0 {
                AnomalySeverity::Medium
            } else {
                AnomalySeverity::Low
            };

            let features: Map<String, Value> = columns
                .iter()
                .zip(row.iter())
                .map(|((name, _), v)| ((*name).to_string(), json!(v)))
                .collect();

            anomalies.push(Anomaly {
                symbol: "multi_feature".to_string(),
                timestamp: frame.row_label(row_idx),
                method: DetectionMethod::Ml,
                severity,
                score,
                details: details(&[
                    ("anomaly_score", json!(raw)),
                    ("features", Value::Object(features)),
                ]),
            });
        }

        anomalies
    }

    /// Train exactly once; concurrent first callers race to the write lock
    /// and the loser finds the model already trained.
    fn ensure_trained(&self, matrix: &[Vec<f64>]) {
        {
            let guard = self.model.read().expect("model lock poisoned");
            if matches!(&*guard, ModelState::Trained(_)) {
                return;
            }
        }

        let mut guard = self.model.write().expect("model lock poisoned");
        if matches!(&*guard, ModelState::Untrained) {
            info!("Training isolation forest on {} rows", matrix.len());
            *guard = ModelState::Trained(IsolationForest::fit(matrix, &self.forest_params));
        }
    }

    fn pattern_detection(&self, frame: &MarketFrame) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        let volume = match frame.column("volume") {
            Some(c) => c,
            None => return anomalies,
        };
        let present: Vec<(usize, f64)> = volume
            .iter()
            .enumerate()
            .filter_map(|(idx, v)| v.map(|v| (idx, v)))
            .collect();
        if present.len() < VOLUME_WINDOW {
            return anomalies;
        }

        for i in (VOLUME_WINDOW - 1)..present.len() {
            let window = &present[i + 1 - VOLUME_WINDOW..=i];
            let avg = window.iter().map(|(_, v)| v).sum::<f64>() / VOLUME_WINDOW as f64;
            if avg == 0.0 {
                continue;
            }
            let (row_idx, value) = present[i];
            let ratio = value / avg;
            if ratio > 3.0 {
                anomalies.push(Anomaly {
                    symbol: "volume".to_string(),
                    timestamp: frame.row_label(row_idx),
                    method: DetectionMethod::Pattern,
                    severity: AnomalySeverity::Medium,
                    score: (ratio * 25.0).min(100.0),
                    details: details(&[
                        ("volume_ratio", json!(ratio)),
                        ("volume", json!(value)),
                        ("avg_volume", json!(avg)),
                    ]),
                });
            }
        }

        anomalies
    }
}

/// Sample standard deviation over present (index, value) pairs.
fn sample_std(present: &[(usize, f64)], mean: f64) -> f64 {
    if present.len() < 2 {
        return 0.0;
    }
    let variance = present
        .iter()
        .map(|(_, v)| (v - mean).powi(2))
        .sum::<f64>()
        / (present.len() - 1) as f64;
    variance.sqrt()
}

fn severity_from_z(abs_z: f64) -> AnomalySeverity {
    if abs_z > 4.0 {
        AnomalySeverity::Critical
    } else if abs_z > 3.0 {
        AnomalySeverity::High
    } else if abs_z > 2.0 {
        AnomalySeverity::Medium
    } else {
        AnomalySeverity::Low
    }
}

fn details(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(&DetectionConfig::default())
    }

    /// 40 calm rows with one spike in the `price` column.
    fn frame_with_spike() -> MarketFrame {
        let mut frame = MarketFrame::new();
        for i in 0..40 {
            let price = if i == 35 {
                500.0
            } else {
                100.0 + (i % 5) as f64
            };
            frame.push_row(None, &[("price", Some(price))]);
        }
        frame
    }

    #[test]
    fn test_statistical_detection_finds_spike() {
        let anomalies = detector().detect(&frame_with_spike());

        assert!(!anomalies.is_empty());
        let spike = &anomalies[0];
        assert_eq!(spike.method, DetectionMethod::Statistical);
        assert_eq!(spike.symbol, "price");
        assert_eq!(spike.timestamp, "35");
        assert_eq!(spike.severity, AnomalySeverity::Critical);
        assert_eq!(spike.score, 100.0);
    }

    #[test]
    fn test_constant_column_is_skipped() {
        let mut frame = MarketFrame::new();
        for _ in 0..40 {
            frame.push_row(None, &[("flat", Some(7.0))]);
        }
        assert!(detector().detect(&frame).is_empty());
    }

    #[test]
    fn test_short_column_is_skipped() {
        let mut frame = MarketFrame::new();
        for i in 0..20 {
            let v = if i == 10 { 1000.0 } else { 1.0 };
            frame.push_row(None, &[("short", Some(v))]);
        }
        assert!(detector().detect(&frame).is_empty());
    }

    #[test]
    fn test_empty_frame_yields_nothing() {
        assert!(detector().detect(&MarketFrame::new()).is_empty());
    }

    #[test]
    fn test_ml_runs_only_with_enough_rows() {
        let det = detector();

        // 99 rows: ML must not run, so no training happens.
        let mut frame = MarketFrame::new();
        for i in 0..99 {
            frame.push_row(None, &[("a", Some(i as f64)), ("b", Some(-(i as f64)))]);
        }
        let anomalies = det.detect(&frame);
        assert!(anomalies.iter().all(|a| a.method != DetectionMethod::Ml));
    }

    #[test]
    fn test_ml_detection_flags_outlier_rows() {
        let det = detector();
        let mut frame = MarketFrame::new();
        for i in 0..120 {
            let (a, b) = if i == 60 {
                (1000.0, -1000.0)
            } else {
                (10.0 + (i % 7) as f64 * 0.1, 20.0 - (i % 7) as f64 * 0.1)
            };
            frame.push_row(None, &[("a", Some(a)), ("b", Some(b))]);
        }

        let anomalies = det.detect(&frame);
        let ml: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.method == DetectionMethod::Ml)
            .collect();
        assert!(ml.iter().any(|a| a.timestamp == "60"));
        assert!(ml.iter().all(|a| a.symbol == "multi_feature"));
    }

    #[test]
    fn test_pattern_detection_flags_volume_spike() {
        let mut frame = MarketFrame::new();
        for i in 0..30 {
            let volume = if i == 25 { 4000.0 } else { 1000.0 };
            frame.push_row(None, &[("volume", Some(volume))]);
        }

        let anomalies = detector().detect(&frame);
        let pattern: Vec<&Anomaly> = anomalies
            .iter()
            .filter(|a| a.method == DetectionMethod::Pattern)
            .collect();
        assert_eq!(pattern.len(), 1);
        assert_eq!(pattern[0].timestamp, "25");
        assert_eq!(pattern[0].severity, AnomalySeverity::Medium);
        let ratio = pattern[0].details["volume_ratio"].as_f64().unwrap();
        assert!(ratio > 3.0);
    }

    #[test]
    fn test_fused_list_sorted_and_capped() {
        let mut frame = MarketFrame::new();
        // Many columns with spikes to overflow the cap.
        for i in 0..60 {
            let values: Vec<(String, Option<f64>)> = (0..30)
                .map(|c| {
                    let name = format!("col{}", c);
                    let v = if i >= 55 { 900.0 + c as f64 } else { 1.0 + (i % 3) as f64 };
                    (name, Some(v))
                })
                .collect();
            let refs: Vec<(&str, Option<f64>)> =
                values.iter().map(|(n, v)| (n.as_str(), *v)).collect();
            frame.push_row(None, &refs);
        }

        let anomalies = detector().detect(&frame);
        assert!(anomalies.len() <= 50);
        for pair in anomalies.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
