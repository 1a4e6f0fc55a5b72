use crate::config::RiskWeightsConfig;
use crate::data::types::MarketSnapshot;
use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Minimal,
    Low,
    Moderate,
    High,
    Extreme,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Minimal => "MINIMAL",
            RiskLevel::Low => "LOW",
            RiskLevel::Moderate => "MODERATE",
            RiskLevel::High => "HIGH",
            RiskLevel::Extreme => "EXTREME",
        };
        write!(f, "{}", s)
    }
}

/// Composite risk assessment; recomputed in full on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    pub total: f64,
    pub level: RiskLevel,
    pub components: BTreeMap<String, f64>,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

/// Weighted composite risk scorer over five sub-risks, each piecewise-scored
/// into [0, 100]. Stateless: every call is a pure recomputation.
pub struct RiskScorer {
    weights: RiskWeightsConfig,
}

impl RiskScorer {
    pub fn new(weights: RiskWeightsConfig) -> Result<Self> {
        let total = weights.market_volatility
            + weights.liquidity_risk
            + weights.credit_risk
            + weights.currency_risk
            + weights.geopolitical_risk;
        ensure!(
            (total - 1.0).abs() < 1e-6,
            "risk weights must sum to 1.0, got {}",
            total
        );
        Ok(Self { weights })
    }

    pub fn calculate_risk_score(&self, state: &MarketSnapshot) -> RiskScore {
        let components: BTreeMap<String, f64> = [
            ("market_volatility", score_volatility(state)),
            ("liquidity_risk", score_liquidity(state)),
            ("credit_risk", score_credit(state)),
            ("currency_risk", score_currency(state)),
            ("geopolitical_risk", score_geopolitical(state)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let total = components["market_volatility"] * self.weights.market_volatility
            + components["liquidity_risk"] * self.weights.liquidity_risk
            + components["credit_risk"] * self.weights.credit_risk
            + components["currency_risk"] * self.weights.currency_risk
            + components["geopolitical_risk"] * self.weights.geopolitical_risk;

        let level = categorize(total);

        RiskScore {
            total,
            level,
            components,
            recommendation: recommendation(level).to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Base plus additive bumps, clamped to 100. The bump tables below are the
/// documented indicator thresholds for each sub-risk.
fn additive_score(base: f64, bumps: &[(bool, f64)]) -> f64 {
    let bumped: f64 = bumps
        .iter()
        .filter(|(applies, _)| *applies)
        .map(|(_, points)| points)
        .sum();
    (base + bumped).min(100.0)
}

fn score_volatility(state: &MarketSnapshot) -> f64 {
    let vix = state.num("vix", 15.0);
    let base = if vix < 15.0 {
        10.0
    } else if vix < 20.0 {
        25.0
    } else if vix < 30.0 {
        50.0
    } else if vix < 40.0 {
        75.0
    } else {
        95.0
    };

    let vix_change = state.num("vix_change_5d", 0.0);
    additive_score(base, &[(vix_change > 20.0, 15.0)])
}

fn score_liquidity(state: &MarketSnapshot) -> f64 {
    let volume_ratio = state.num("volume_ratio", 1.0);
    let move_index = state.num("move_index", 80.0);

    additive_score(
        20.0,
        &[
            (state.flag("spread_widening"), 25.0),
            (volume_ratio < 0.7, 20.0),
            (volume_ratio > 1.5, 15.0),
            (move_index > 150.0, 30.0),
            (move_index > 120.0 && move_index <= 150.0, 15.0),
        ],
    )
}

fn score_credit(state: &MarketSnapshot) -> f64 {
    let hyg_spread = state.num("hyg_spread", 3.0);
    let ig_spread = state.num("ig_spread", 1.0);
    let default_rate_change = state.num("default_rate_change", 0.0);

    additive_score(
        15.0,
        &[
            (hyg_spread > 7.0, 40.0),
            (hyg_spread > 5.0 && hyg_spread <= 7.0, 25.0),
            (hyg_spread > 4.0 && hyg_spread <= 5.0, 10.0),
            (ig_spread > 2.0, 20.0),
            (ig_spread > 1.5 && ig_spread <= 2.0, 10.0),
            (default_rate_change > 0.5, 25.0),
        ],
    )
}

fn score_currency(state: &MarketSnapshot) -> f64 {
    let dxy_change = state.num("dxy_change_1m", 0.0);
    let usdjpy_change = state.num("usdjpy_change_1w", 0.0);

    additive_score(
        20.0,
        &[
            (dxy_change > 5.0, 30.0),
            (dxy_change > 3.0 && dxy_change <= 5.0, 15.0),
            (state.flag("em_fx_stress"), 25.0),
            (usdjpy_change.abs() > 3.0, 20.0),
        ],
    )
}

fn score_geopolitical(state: &MarketSnapshot) -> f64 {
    let oil_volatility = state.num("oil_volatility", 0.0);
    let gold_change = state.num("gold_change_1m", 0.0);

    additive_score(
        30.0,
        &[(oil_volatility > 5.0, 25.0), (gold_change > 10.0, 20.0)],
    )
}

fn categorize(score: f64) -> RiskLevel {
    if score > 80.0 {
        RiskLevel::Extreme
    } else if score > 60.0 {
        RiskLevel::High
    } else if score > 40.0 {
        RiskLevel::Moderate
    } else if score > 20.0 {
        RiskLevel::Low
    } else {
        RiskLevel::Minimal
    }
}

fn recommendation(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Extreme => {
            "Maximum risk. Defensive positioning mandatory; maximize cash; \
             execute hedges immediately."
        }
        RiskLevel::High => {
            "Elevated risk. Reduce positions, prepare for volatility, enforce \
             stop-losses strictly."
        }
        RiskLevel::Moderate => {
            "Moderate risk. Proceed with caution, stay diversified, step up \
             market monitoring."
        }
        RiskLevel::Low => {
            "Low risk. Normal position management; stay ready to deploy on \
             opportunities."
        }
        RiskLevel::Minimal => {
            "Minimal risk. Aggressive strategies viable; lean into growth \
             opportunities."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RiskScorer {
        RiskScorer::new(RiskWeightsConfig::default()).unwrap()
    }

    #[test]
    fn test_baseline_snapshot_totals() {
        // All indicators at their documented defaults:
        // volatility 25, liquidity 20, credit 15, currency 20, geo 30.
        let score = scorer().calculate_risk_score(&MarketSnapshot::new());

        assert_eq!(score.components["market_volatility"], 25.0);
        assert_eq!(score.components["liquidity_risk"], 20.0);
        assert_eq!(score.components["credit_risk"], 15.0);
        assert_eq!(score.components["currency_risk"], 20.0);
        assert_eq!(score.components["geopolitical_risk"], 30.0);
        assert!((score.total - 21.25).abs() < 1e-9);
        assert_eq!(score.level, RiskLevel::Low);
    }

    #[test]
    fn test_components_clamped_to_100() {
        let mut state = MarketSnapshot::new();
        state.set("hyg_spread", 9.0);
        state.set("ig_spread", 3.0);
        state.set("default_rate_change", 1.0);

        let score = scorer().calculate_risk_score(&state);
        // 15 + 40 + 20 + 25 = 100, at the clamp.
        assert_eq!(score.components["credit_risk"], 100.0);
    }

    #[test]
    fn test_stressed_market_is_extreme() {
        let mut state = MarketSnapshot::new();
        state.set("vix", 45.0);
        state.set("vix_change_5d", 30.0);
        state.set("spread_widening", true);
        state.set("volume_ratio", 2.0);
        state.set("move_index", 170.0);
        state.set("hyg_spread", 8.0);
        state.set("ig_spread", 2.5);
        state.set("default_rate_change", 1.0);
        state.set("dxy_change_1m", 6.0);
        state.set("em_fx_stress", true);
        state.set("usdjpy_change_1w", -4.0);
        state.set("oil_volatility", 8.0);
        state.set("gold_change_1m", 12.0);

        let score = scorer().calculate_risk_score(&state);
        assert!(score.total > 80.0);
        assert_eq!(score.level, RiskLevel::Extreme);
        for component in score.components.values() {
            assert!(*component <= 100.0);
        }
    }

    #[test]
    fn test_calm_market_is_minimal_band() {
        let mut state = MarketSnapshot::new();
        state.set("vix", 12.0);

        let score = scorer().calculate_risk_score(&state);
        // volatility drops to 10: total 17.5, below the LOW cut.
        assert!((score.total - 17.5).abs() < 1e-9);
        assert_eq!(score.level, RiskLevel::Minimal);
    }

    #[test]
    fn test_level_boundaries() {
        assert_eq!(categorize(20.0), RiskLevel::Minimal);
        assert_eq!(categorize(20.1), RiskLevel::Low);
        assert_eq!(categorize(40.1), RiskLevel::Moderate);
        assert_eq!(categorize(60.1), RiskLevel::High);
        assert_eq!(categorize(80.1), RiskLevel::Extreme);
    }

    #[test]
    fn test_bad_weights_rejected() {
        let weights = RiskWeightsConfig {
            market_volatility: 0.5,
            liquidity_risk: 0.5,
            credit_risk: 0.5,
            currency_risk: 0.0,
            geopolitical_risk: 0.0,
        };
        assert!(RiskScorer::new(weights).is_err());
    }
}
