use crate::data::types::Observation;
use crate::data::Collector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, warn};

const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";

/// Collects daily macro series (treasury yields, spreads) from FRED.
/// Requires an API key; without one the collector is not constructed.
pub struct FredCollector {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SeriesResponse {
    observations: Vec<SeriesObservation>,
}

#[derive(Debug, Deserialize)]
struct SeriesObservation {
    value: String,
}

#[derive(Debug, Clone)]
pub struct YieldCurve {
    pub spread_2s10s: f64,
    pub inverted: bool,
}

impl FredCollector {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, FRED_BASE_URL.to_string())
    }

    fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }

    /// Latest value of one series. FRED encodes missing points as ".".
    async fn fetch_latest(&self, series_id: &str) -> Result<f64> {
        let url = format!("{}/series/observations", self.base_url);

        let response: SeriesResponse = self
            .client
            .get(&url)
            .query(&[
                ("series_id", series_id),
                ("api_key", self.api_key.as_str()),
                ("file_type", "json"),
                ("sort_order", "desc"),
                ("limit", "5"),
            ])
            .send()
            .await
            .with_context(|| format!("FRED request failed for {}", series_id))?
            .json()
            .await
            .with_context(|| format!("Bad FRED payload for {}", series_id))?;

        response
            .observations
            .iter()
            .find_map(|obs| obs.value.parse::<f64>().ok())
            .with_context(|| format!("No numeric observation for {}", series_id))
    }

    /// 2s10s spread and inversion flag from the latest DGS2/DGS10 prints.
    pub async fn get_yield_curve(&self) -> Result<YieldCurve> {
        let dgs2 = self.fetch_latest("DGS2").await?;
        let dgs10 = self.fetch_latest("DGS10").await?;
        let spread = dgs10 - dgs2;

        Ok(YieldCurve {
            spread_2s10s: spread,
            inverted: spread < 0.0,
        })
    }
}

#[async_trait]
impl Collector for FredCollector {
    async fn collect(&self, series_ids: &[String]) -> Result<Vec<Observation>> {
        let mut results = Vec::with_capacity(series_ids.len());

        for series_id in series_ids {
            match self.fetch_latest(series_id).await {
                Ok(value) => {
                    let mut obs = Observation::new(series_id.clone(), value);
                    obs.metadata.insert("source".to_string(), json!("fred"));
                    results.push(obs);
                }
                Err(e) => warn!("FRED error for {}: {:#}", series_id, e),
            }
        }

        info!(
            "Collected {}/{} series from FRED",
            results.len(),
            series_ids.len()
        );
        Ok(results)
    }

    async fn validate_connection(&self) -> bool {
        self.fetch_latest("DGS10").await.is_ok()
    }

    fn name(&self) -> &str {
        "fred"
    }
}

/// Treasury spread helper shared with the daily collection job.
pub fn spreads_from_yields(yields: &HashMap<String, f64>) -> Option<YieldCurve> {
    let dgs2 = yields.get("DGS2")?;
    let dgs10 = yields.get("DGS10")?;
    let spread = dgs10 - dgs2;
    Some(YieldCurve {
        spread_2s10s: spread,
        inverted: spread < 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_payload_parses_and_skips_missing() {
        let body = r#"{
            "observations": [
                {"value": "."},
                {"value": "4.25"},
                {"value": "4.30"}
            ]
        }"#;

        let parsed: SeriesResponse = serde_json::from_str(body).unwrap();
        let latest = parsed
            .observations
            .iter()
            .find_map(|obs| obs.value.parse::<f64>().ok())
            .unwrap();
        assert_eq!(latest, 4.25);
    }

    #[test]
    fn test_yield_curve_inversion() {
        let mut yields = HashMap::new();
        yields.insert("DGS2".to_string(), 4.8);
        yields.insert("DGS10".to_string(), 4.2);

        let curve = spreads_from_yields(&yields).unwrap();
        assert!((curve.spread_2s10s + 0.6).abs() < 1e-9);
        assert!(curve.inverted);
    }

    #[test]
    fn test_yield_curve_requires_both_tenors() {
        let mut yields = HashMap::new();
        yields.insert("DGS10".to_string(), 4.2);
        assert!(spreads_from_yields(&yields).is_none());
    }
}
