use crate::data::types::MarketSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::info;

/// Signal-side severity vocabulary. Distinct from the alert engine's
/// uppercase vocabulary; the engine owns the one mapping between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for SignalSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalSeverity::Info => "info",
            SignalSeverity::Warning => "warning",
            SignalSeverity::Critical => "critical",
            SignalSeverity::Emergency => "emergency",
        };
        write!(f, "{}", s)
    }
}

/// One scenario's evaluation outcome at one point in time. Stateless: no
/// identity persists between evaluations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub scenario: String,
    pub severity: SignalSeverity,
    pub confidence: f64,
    pub triggers: Vec<String>,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

type ConditionCheck = Box<dyn Fn(&MarketSnapshot) -> Option<String> + Send + Sync>;

enum SeverityPolicy {
    /// Same severity however many conditions fire.
    Fixed(SignalSeverity),
    /// Critical only when every condition fires.
    CriticalIfAll { otherwise: SignalSeverity },
}

enum ConfidencePolicy {
    /// conditions met / total conditions.
    FractionMet,
    Fixed(f64),
}

/// A scenario rule: an ordered list of condition checks (each yields a
/// trigger string when satisfied), a minimum count to emit, and policies
/// for severity, confidence and extra metadata.
struct ScenarioRule {
    scenario: &'static str,
    min_conditions: usize,
    recommendation: &'static str,
    severity: SeverityPolicy,
    confidence: ConfidencePolicy,
    conditions: Vec<ConditionCheck>,
    extra_metadata: Option<fn(usize) -> Vec<(&'static str, Value)>>,
}

/// Evaluates a market-state snapshot against the scenario rule table.
/// Every rule runs on every call; one call can emit zero to four signals.
pub struct SignalGenerator {
    rules: Vec<ScenarioRule>,
}

impl SignalGenerator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                korea_outflow_rule(),
                risk_off_rule(),
                liquidity_crisis_rule(),
                volatility_spike_rule(),
            ],
        }
    }

    pub fn generate_signals(&self, state: &MarketSnapshot) -> Vec<Signal> {
        let now = Utc::now();
        let signals: Vec<Signal> = self
            .rules
            .iter()
            .filter_map(|rule| evaluate_rule(rule, state, now))
            .collect();

        info!("Generated {} signals", signals.len());
        signals
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn evaluate_rule(
    rule: &ScenarioRule,
    state: &MarketSnapshot,
    now: DateTime<Utc>,
) -> Option<Signal> {
    let triggers: Vec<String> = rule
        .conditions
        .iter()
        .filter_map(|check| check(state))
        .collect();
    let met = triggers.len();
    let total = rule.conditions.len();

    if met < rule.min_conditions {
        return None;
    }

    let severity = match &rule.severity {
        SeverityPolicy::Fixed(s) => *s,
        SeverityPolicy::CriticalIfAll { otherwise } => {
            if met == total {
                SignalSeverity::Critical
            } else {
                *otherwise
            }
        }
    };

    let confidence = match &rule.confidence {
        ConfidencePolicy::FractionMet => (met as f64 / total as f64).min(1.0),
        ConfidencePolicy::Fixed(c) => *c,
    };

    let mut metadata = Map::new();
    metadata.insert("conditions_met".to_string(), json!(met));
    metadata.insert("total_conditions".to_string(), json!(total));
    if let Some(extra) = rule.extra_metadata {
        for (key, value) in extra(met) {
            metadata.insert(key.to_string(), value);
        }
    }

    Some(Signal {
        scenario: rule.scenario.to_string(),
        severity,
        confidence,
        triggers,
        recommendation: rule.recommendation.to_string(),
        timestamp: now,
        metadata,
    })
}

fn korea_outflow_rule() -> ScenarioRule {
    ScenarioRule {
        scenario: "korea_capital_outflow",
        min_conditions: 3,
        recommendation:
            "Consider trimming exposure or hedging. Prepare for won weakness.",
        severity: SeverityPolicy::CriticalIfAll {
            otherwise: SignalSeverity::Warning,
        },
        confidence: ConfidencePolicy::FractionMet,
        conditions: vec![
            Box::new(|s| {
                let rate_diff = s.num("korea_us_rate_diff", 0.0);
                (rate_diff < -0.5)
                    .then(|| format!("Korea-US rate differential inverted: {:.2}pp", rate_diff))
            }),
            Box::new(|s| {
                let change = s.num("usdkrw_change_1d", 0.0);
                (change > 1.0).then(|| format!("USD/KRW surge: +{:.2}%", change))
            }),
            Box::new(|s| {
                let flow = s.num("ewy_flow_3d", 0.0);
                (flow < 0.0).then(|| format!("EWY ETF net outflow: {:.0}", flow))
            }),
            Box::new(|s| {
                let flow = s.num("kospi_foreign_flow", 0.0);
                (flow < 0.0).then(|| format!("KOSPI foreign net selling: {:.0}", flow))
            }),
        ],
        extra_metadata: None,
    }
}

fn risk_off_rule() -> ScenarioRule {
    ScenarioRule {
        scenario: "risk_off_transition",
        min_conditions: 3,
        recommendation:
            "Reduce equity exposure, raise cash and short-duration bonds. \
             Wait for volatility to settle.",
        severity: SeverityPolicy::Fixed(SignalSeverity::Critical),
        confidence: ConfidencePolicy::FractionMet,
        conditions: vec![
            Box::new(|s| {
                let vix = s.num("vix", 0.0);
                (vix > 30.0).then(|| format!("VIX spike: {:.1}", vix))
            }),
            Box::new(|s| {
                let flow = s.num("tlt_flow", 0.0);
                (flow > 0.0).then(|| format!("TLT inflow surge: +{:.0}", flow))
            }),
            Box::new(|s| {
                let spread = s.num("hyg_spread", 0.0);
                (spread > 5.0)
                    .then(|| format!("High-yield spread widening: {:.2}pp", spread))
            }),
            Box::new(|s| {
                let gold = s.num("gold_change", 0.0);
                let dxy = s.num("dxy_change", 0.0);
                (gold > 1.0 && dxy > 0.5)
                    .then(|| "Gold rally and dollar strength together".to_string())
            }),
        ],
        extra_metadata: None,
    }
}

fn liquidity_crisis_rule() -> ScenarioRule {
    ScenarioRule {
        scenario: "liquidity_crisis",
        min_conditions: 2,
        recommendation:
            "Extremely defensive positioning required. Prioritize cash. \
             Pattern resembles 2008 funding stress.",
        severity: SeverityPolicy::Fixed(SignalSeverity::Emergency),
        confidence: ConfidencePolicy::FractionMet,
        conditions: vec![
            Box::new(|s| {
                let spread = s.num("libor_ois_spread", 0.0);
                (spread > 0.5)
                    .then(|| format!("LIBOR-OIS spread surge: {:.2}pp", spread))
            }),
            Box::new(|s| {
                s.flag("repo_rate_spike")
                    .then(|| "Repo rate spike detected".to_string())
            }),
            Box::new(|s| {
                let move_index = s.num("move_index", 0.0);
                (move_index > 150.0).then(|| format!("MOVE index surge: {:.1}", move_index))
            }),
            Box::new(|s| {
                let change = s.num("corp_bond_issuance_change", 0.0);
                (change < -50.0)
                    .then(|| format!("Corporate bond issuance collapse: {:.1}%", change))
            }),
        ],
        extra_metadata: Some(|met| {
            let level = if met >= 3 { "severe" } else { "moderate" };
            vec![("crisis_level", json!(level))]
        }),
    }
}

fn volatility_spike_rule() -> ScenarioRule {
    ScenarioRule {
        scenario: "volatility_spike",
        min_conditions: 1,
        recommendation: "Short-term volatility rising. Consider reducing position sizes.",
        severity: SeverityPolicy::Fixed(SignalSeverity::Warning),
        confidence: ConfidencePolicy::Fixed(0.8),
        conditions: vec![Box::new(|s| {
            let change = s.num("vix_change_1d", 0.0);
            let vix = s.num("vix", 0.0);
            (change > 20.0).then(|| format!("VIX jump: +{:.1}% (now {:.1})", change, vix))
        })],
        extra_metadata: None,
    }
}
