use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One timestamped observation for one symbol, as produced by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: Option<u64>,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Observation {
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp: Utc::now(),
            price,
            volume: None,
            bid: None,
            ask: None,
            open: None,
            high: None,
            low: None,
            close: None,
            metadata: HashMap::new(),
        }
    }
}

/// A named indicator value in a market-state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Num(f64),
    Flag(bool),
}

impl From<f64> for IndicatorValue {
    fn from(v: f64) -> Self {
        IndicatorValue::Num(v)
    }
}

impl From<bool> for IndicatorValue {
    fn from(v: bool) -> Self {
        IndicatorValue::Flag(v)
    }
}

/// Flat map of named indicators supplied fresh to the signal generator and
/// risk scorer on each evaluation cycle. Missing keys resolve to the default
/// the caller documents at the lookup site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    indicators: HashMap<String, IndicatorValue>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<IndicatorValue>) {
        self.indicators.insert(key.into(), value.into());
    }

    /// Numeric lookup; a flag reads as 1.0/0.0.
    pub fn num(&self, key: &str, default: f64) -> f64 {
        match self.indicators.get(key) {
            Some(IndicatorValue::Num(v)) => *v,
            Some(IndicatorValue::Flag(b)) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            None => default,
        }
    }

    /// Boolean lookup; missing key reads as false, a number as nonzero.
    pub fn flag(&self, key: &str) -> bool {
        match self.indicators.get(key) {
            Some(IndicatorValue::Flag(b)) => *b,
            Some(IndicatorValue::Num(v)) => *v != 0.0,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }
}
