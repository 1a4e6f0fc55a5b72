use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use tracing::info;

/// Minimum buffered values before any statistics are trusted.
const MIN_SAMPLES: usize = 30;

/// Emitted when a tick deviates significantly from its symbol's recent window.
#[derive(Debug, Clone)]
pub struct ProcessedSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub z_score: f64,
    pub anomaly_score: f64,
    pub signal_type: SignalType,
    pub buffer_len: usize,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Normal,
    Warning,
    Critical,
}

struct SymbolWindow {
    values: VecDeque<f64>,
    mean: f64,
    std: f64,
}

/// Real-time stream processor: one fixed-capacity rolling window per symbol.
///
/// Ticks for the same symbol serialize on the map entry; ticks for different
/// symbols proceed in parallel.
pub struct StreamProcessor {
    window_size: usize,
    windows: DashMap<String, SymbolWindow>,
}

#[derive(Debug, Clone)]
pub struct SymbolStatistics {
    pub symbol: String,
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub current: f64,
    pub change_pct: f64,
}

impl StreamProcessor {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            windows: DashMap::new(),
        }
    }

    /// Process a single tick. Returns a signal only when |z| > 2.0 and the
    /// window already holds at least `MIN_SAMPLES` values; the common case is
    /// `None`. The tick is scored against the prior window, then buffered.
    pub fn process_tick(
        &self,
        symbol: &str,
        value: f64,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<ProcessedSignal> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);

        let mut window = self
            .windows
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolWindow {
                values: VecDeque::with_capacity(self.window_size),
                mean: 0.0,
                std: 0.0,
            });

        let warmed_up = window.values.len() >= MIN_SAMPLES;
        let mut signal = None;

        if warmed_up {
            let (mean, std) = window_stats(&window.values);
            window.mean = mean;
            window.std = std;

            // A flat window is never anomalous, whatever the new value.
            let z_score = if std == 0.0 { 0.0 } else { (value - mean) / std };
            let anomaly_score = anomaly_score_from_z(z_score);

            if z_score.abs() > 2.0 {
                signal = Some(ProcessedSignal {
                    symbol: symbol.to_string(),
                    timestamp,
                    value,
                    z_score,
                    anomaly_score,
                    signal_type: classify(anomaly_score),
                    buffer_len: window.values.len(),
                    mean,
                    std,
                });
            }
        }

        if window.values.len() == self.window_size {
            window.values.pop_front();
        }
        window.values.push_back(value);

        signal
    }

    /// Current statistics for a symbol, computed over its buffered window.
    pub fn get_statistics(&self, symbol: &str) -> Option<SymbolStatistics> {
        let window = self.windows.get(symbol)?;
        if window.values.is_empty() {
            return None;
        }

        let (mean, std) = window_stats(&window.values);
        let min = window.values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = window
            .values
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let first = *window.values.front().unwrap();
        let current = *window.values.back().unwrap();
        let change_pct = if first != 0.0 {
            (current - first) / first * 100.0
        } else {
            0.0
        };

        Some(SymbolStatistics {
            symbol: symbol.to_string(),
            count: window.values.len(),
            mean,
            std,
            min,
            max,
            current,
            change_pct,
        })
    }

    /// Reset history for one symbol only. There is no global reset.
    pub fn clear_buffer(&self, symbol: &str) {
        if let Some(mut window) = self.windows.get_mut(symbol) {
            window.values.clear();
            window.mean = 0.0;
            window.std = 0.0;
            info!("Cleared buffer for {}", symbol);
        }
    }
}

/// Population mean and standard deviation.
fn window_stats(values: &VecDeque<f64>) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Map |z| into the 0-100 anomaly score bands.
fn anomaly_score_from_z(z_score: f64) -> f64 {
    let abs_z = z_score.abs();
    if abs_z < 2.0 {
        0.0
    } else if abs_z < 3.0 {
        50.0
    } else if abs_z < 4.0 {
        75.0
    } else {
        100.0
    }
}

fn classify(anomaly_score: f64) -> SignalType {
    if anomaly_score >= 75.0 {
        SignalType::Critical
    } else if anomaly_score >= 50.0 {
        SignalType::Warning
    } else {
        SignalType::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_returns_nothing() {
        let processor = StreamProcessor::new(100);
        for i in 0..30 {
            // Even wildly anomalous values stay silent below MIN_SAMPLES.
            let value = if i == 29 { 10_000.0 } else { 100.0 };
            assert!(processor.process_tick("SPY", value, None).is_none());
        }
    }

    #[test]
    fn test_constant_window_never_signals() {
        let processor = StreamProcessor::new(100);
        for _ in 0..50 {
            assert!(processor.process_tick("TLT", 42.0, None).is_none());
        }
        // std = 0, so z is defined as 0 and even a distant value is swallowed.
        assert!(processor.process_tick("TLT", 10_000.0, None).is_none());
    }

    #[test]
    fn test_outlier_emits_signal() {
        let processor = StreamProcessor::new(100);
        // Alternate around 100.5 so std is small but nonzero.
        for i in 0..40 {
            let value = if i % 2 == 0 { 100.0 } else { 101.0 };
            processor.process_tick("EWY", value, None);
        }

        let signal = processor
            .process_tick("EWY", 150.0, None)
            .expect("outlier should signal");
        assert_eq!(signal.symbol, "EWY");
        assert!(signal.z_score.abs() > 4.0);
        assert_eq!(signal.signal_type, SignalType::Critical);
        assert_eq!(signal.anomaly_score, 100.0);
        assert_eq!(signal.buffer_len, 40);
        assert!((signal.mean - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_near_miss_stays_silent() {
        let processor = StreamProcessor::new(100);
        for i in 0..40 {
            let value = if i % 2 == 0 { 100.0 } else { 101.0 };
            processor.process_tick("GLD", value, None);
        }
        // mean 100.5, std 0.5: a value inside 2 sigma stays silent.
        assert!(processor.process_tick("GLD", 101.2, None).is_none());
    }

    #[test]
    fn test_anomaly_score_monotonic_in_z() {
        let zs = [0.0, 1.9, 2.0, 2.5, 3.0, 3.5, 4.0, 10.0];
        let scores: Vec<f64> = zs.iter().map(|z| anomaly_score_from_z(*z)).collect();
        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert_eq!(anomaly_score_from_z(-3.2), 75.0);
    }

    #[test]
    fn test_statistics_and_clear() {
        let processor = StreamProcessor::new(100);
        for value in [10.0, 20.0, 30.0] {
            processor.process_tick("DXY", value, None);
        }

        let stats = processor.get_statistics("DXY").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean - 20.0).abs() < 1e-9);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.current, 30.0);
        assert!((stats.change_pct - 200.0).abs() < 1e-9);

        processor.clear_buffer("DXY");
        assert!(processor.get_statistics("DXY").is_none());

        // Clearing one symbol leaves others untouched.
        processor.process_tick("GLD", 5.0, None);
        processor.clear_buffer("DXY");
        assert!(processor.get_statistics("GLD").is_some());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let processor = StreamProcessor::new(30);
        for _ in 0..30 {
            processor.process_tick("HYG", 1.0, None);
        }
        for _ in 0..30 {
            processor.process_tick("HYG", 2.0, None);
        }
        let stats = processor.get_statistics("HYG").unwrap();
        assert_eq!(stats.count, 30);
        assert!((stats.mean - 2.0).abs() < 1e-9);
    }
}
