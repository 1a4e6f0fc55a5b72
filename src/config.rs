use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    pub collection: CollectionConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub risk: RiskWeightsConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub dry_run: bool,
    pub database_path: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub realtime_interval_secs: u64,
    /// UTC time of the daily collection run, "HH:MM".
    pub daily_time: String,
    #[serde(default = "default_eval_interval")]
    pub evaluation_interval_secs: u64,
    #[serde(default)]
    pub rate_limit_delay_ms: u64,
    pub symbols: SymbolsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolsConfig {
    #[serde(default)]
    pub etf_equity: Vec<String>,
    #[serde(default)]
    pub etf_bonds: Vec<String>,
    #[serde(default)]
    pub forex: Vec<String>,
    #[serde(default)]
    pub volatility: Vec<String>,
    #[serde(default)]
    pub fred_series: Vec<String>,
}

impl SymbolsConfig {
    /// All symbols polled on the real-time cycle.
    pub fn realtime(&self) -> Vec<String> {
        self.etf_equity
            .iter()
            .chain(self.etf_bonds.iter())
            .chain(self.forex.iter())
            .chain(self.volatility.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_z_threshold")]
    pub z_score_threshold: f64,
    #[serde(default = "default_contamination")]
    pub isolation_forest_contamination: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: default_z_threshold(),
            isolation_forest_contamination: default_contamination(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskWeightsConfig {
    #[serde(default = "default_w_volatility")]
    pub market_volatility: f64,
    #[serde(default = "default_w_liquidity")]
    pub liquidity_risk: f64,
    #[serde(default = "default_w_credit")]
    pub credit_risk: f64,
    #[serde(default = "default_w_currency")]
    pub currency_risk: f64,
    #[serde(default = "default_w_geopolitical")]
    pub geopolitical_risk: f64,
}

impl Default for RiskWeightsConfig {
    fn default() -> Self {
        Self {
            market_volatility: default_w_volatility(),
            liquidity_risk: default_w_liquidity(),
            credit_risk: default_w_credit(),
            currency_risk: default_w_currency(),
            geopolitical_risk: default_w_geopolitical(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// 0 disables the hourly cap.
    #[serde(default = "default_max_alerts_per_hour")]
    pub max_alerts_per_hour: usize,
    /// 0 disables the per-scenario cooldown.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
            max_alerts_per_hour: default_max_alerts_per_hour(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub slack_channel: Option<String>,
    #[serde(default = "default_slack_username")]
    pub slack_username: String,
    #[serde(default)]
    pub email_from: String,
    #[serde(default)]
    pub email_to: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_path")]
    pub csv_log_path: String,
}

fn default_retention_days() -> i64 { 30 }
fn default_eval_interval() -> u64 { 300 }
fn default_window_size() -> usize { 100 }
fn default_z_threshold() -> f64 { 2.0 }
fn default_contamination() -> f64 { 0.1 }
fn default_w_volatility() -> f64 { 0.25 }
fn default_w_liquidity() -> f64 { 0.25 }
fn default_w_credit() -> f64 { 0.20 }
fn default_w_currency() -> f64 { 0.20 }
fn default_w_geopolitical() -> f64 { 0.10 }
fn default_max_history() -> usize { 1000 }
fn default_max_alerts_per_hour() -> usize { 10 }
fn default_cooldown_minutes() -> i64 { 15 }
fn default_slack_username() -> String { "Market Sentinel".to_string() }
fn default_csv_path() -> String { "alerts.csv".to_string() }

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub quote_api_base_url: String,
    pub fred_api_key: Option<String>,
    pub slack_webhook_url: Option<String>,
    pub email_relay_url: Option<String>,
    pub email_relay_api_key: Option<String>,
    pub dry_run: bool,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        Ok(config)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            quote_api_base_url: std::env::var("QUOTE_API_BASE_URL")
                .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),
            fred_api_key: std::env::var("FRED_API_KEY").ok(),
            slack_webhook_url: std::env::var("SLACK_WEBHOOK_URL").ok(),
            email_relay_url: std::env::var("EMAIL_RELAY_URL").ok(),
            email_relay_api_key: std::env::var("EMAIL_RELAY_API_KEY").ok(),
            dry_run: std::env::var("DRY_RUN")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),
        })
    }
}
