use crate::data::types::Observation;
use crate::data::Collector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Collects real-time quotes from an HTTP chart endpoint, one request per
/// symbol, with an optional inter-request delay to stay under provider
/// rate limits.
pub struct QuoteCollector {
    client: Client,
    base_url: String,
    rate_limit_delay: Duration,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartPayload,
}

#[derive(Debug, Deserialize)]
struct ChartPayload {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_volume: Option<u64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    previous_close: Option<f64>,
    currency: Option<String>,
}

impl QuoteCollector {
    pub fn new(base_url: String, rate_limit_delay: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url,
            rate_limit_delay,
        }
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Observation> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);

        let response: ChartResponse = self
            .client
            .get(&url)
            .query(&[("interval", "1m"), ("range", "1d")])
            .send()
            .await
            .with_context(|| format!("Quote request failed for {}", symbol))?
            .json()
            .await
            .with_context(|| format!("Bad quote payload for {}", symbol))?;

        let meta = response
            .chart
            .result
            .and_then(|mut r| r.pop())
            .map(|r| r.meta)
            .with_context(|| format!("No chart data for {}", symbol))?;

        let price = meta
            .regular_market_price
            .with_context(|| format!("No market price for {}", symbol))?;

        let mut obs = Observation::new(normalize_symbol(symbol), price);
        obs.volume = meta.regular_market_volume;
        obs.high = meta.regular_market_day_high;
        obs.low = meta.regular_market_day_low;
        obs.close = Some(price);
        obs.metadata.insert("source".to_string(), json!("quotes"));
        if let Some(currency) = meta.currency {
            obs.metadata.insert("currency".to_string(), json!(currency));
        }
        if let Some(prev) = meta.previous_close {
            if prev != 0.0 {
                let change = (price - prev) / prev * 100.0;
                obs.metadata.insert("change_pct_1d".to_string(), json!(change));
            }
        }

        Ok(obs)
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[async_trait]
impl Collector for QuoteCollector {
    async fn collect(&self, symbols: &[String]) -> Result<Vec<Observation>> {
        let mut results = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            match self.fetch_quote(symbol).await {
                Ok(obs) => results.push(obs),
                Err(e) => warn!("quotes error for {}: {:#}", symbol, e),
            }
            if !self.rate_limit_delay.is_zero() {
                tokio::time::sleep(self.rate_limit_delay).await;
            }
        }

        info!(
            "Collected {}/{} symbols from quotes",
            results.len(),
            symbols.len()
        );
        Ok(results)
    }

    async fn validate_connection(&self) -> bool {
        self.fetch_quote("SPY").await.is_ok()
    }

    fn name(&self) -> &str {
        "quotes"
    }
}
