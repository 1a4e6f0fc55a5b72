use crate::data::types::MarketSnapshot;
use crate::storage::store::MarketStore;
use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::debug;

/// Maps one stored symbol onto snapshot indicators: its latest value under
/// `level_key`, its 1-day percent change under `change_key`.
#[derive(Debug, Clone)]
pub struct IndicatorMapping {
    pub symbol: String,
    pub level_key: Option<String>,
    pub change_key: Option<String>,
}

impl IndicatorMapping {
    fn new(symbol: &str, level_key: Option<&str>, change_key: Option<&str>) -> Self {
        Self {
            symbol: symbol.to_string(),
            level_key: level_key.map(str::to_string),
            change_key: change_key.map(str::to_string),
        }
    }
}

/// Derives a fresh `MarketSnapshot` from recent stored observations.
/// Symbols with no recent data simply contribute nothing; the analyzers'
/// per-key defaults cover the gaps.
pub struct SnapshotBuilder {
    mappings: Vec<IndicatorMapping>,
}

impl SnapshotBuilder {
    pub fn new(mappings: Vec<IndicatorMapping>) -> Self {
        Self { mappings }
    }

    /// Mappings for the indicators the scenario rules and risk scorer read.
    pub fn with_default_mappings() -> Self {
        Self::new(vec![
            IndicatorMapping::new("^VIX", Some("vix"), Some("vix_change_1d")),
            IndicatorMapping::new("^MOVE", Some("move_index"), None),
            IndicatorMapping::new("KRW=X", None, Some("usdkrw_change_1d")),
            IndicatorMapping::new("DX-Y.NYB", Some("dxy"), Some("dxy_change")),
            IndicatorMapping::new("GC=F", None, Some("gold_change")),
            IndicatorMapping::new("JPY=X", None, Some("usdjpy_change_1w")),
        ])
    }

    pub fn build(&self, store: &MarketStore) -> Result<MarketSnapshot> {
        let mut snapshot = MarketSnapshot::new();
        let now = Utc::now();

        for mapping in &self.mappings {
            let observations =
                store.read_market_data(&mapping.symbol, Some(now - Duration::days(2)), None, 500)?;
            let latest = match observations.last() {
                Some(obs) => obs,
                None => {
                    debug!("No recent data for {}", mapping.symbol);
                    continue;
                }
            };

            if let Some(key) = &mapping.level_key {
                snapshot.set(key.clone(), latest.price);
            }

            if let Some(key) = &mapping.change_key {
                // Prefer the provider's own 1-day change; otherwise compare
                // against the oldest observation within the lookback.
                let change = latest
                    .metadata
                    .get("change_pct_1d")
                    .and_then(|v| v.as_f64())
                    .or_else(|| {
                        observations.first().and_then(|oldest| {
                            (oldest.price != 0.0 && observations.len() > 1)
                                .then(|| (latest.price - oldest.price) / oldest.price * 100.0)
                        })
                    });
                if let Some(change) = change {
                    snapshot.set(key.clone(), change);
                }
            }
        }

        Ok(snapshot)
    }
}
