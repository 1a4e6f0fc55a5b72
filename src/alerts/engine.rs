use crate::alerts::notifiers::Notifier;
use crate::analysis::signals::{Signal, SignalSeverity};
use crate::config::AlertConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Bounded per-channel send time; a slower channel counts as failed.
const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Escalate one severity step when a signal is this confident.
const ESCALATION_CONFIDENCE: f64 = 0.9;

/// Alert-side severity vocabulary, ordered. Distinct from the signal-side
/// lowercase vocabulary; `alert_severity_for` is the one mapping between
/// them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::Emergency => "EMERGENCY",
        };
        write!(f, "{}", s)
    }
}

impl AlertSeverity {
    fn escalated(self) -> Self {
        match self {
            AlertSeverity::Info => AlertSeverity::Warning,
            AlertSeverity::Warning => AlertSeverity::Critical,
            AlertSeverity::Critical | AlertSeverity::Emergency => AlertSeverity::Emergency,
        }
    }
}

/// A dispatched (or dispatchable) alert. Created exactly once per qualifying
/// signal; triggers and recommendation are carried over verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub scenario: String,
    pub confidence: f64,
    pub message: String,
    pub triggers: Vec<String>,
    pub recommendation: String,
    pub metadata: Map<String, Value>,
}

impl Alert {
    pub fn from_signal(signal: &Signal, severity: AlertSeverity) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity,
            scenario: signal.scenario.clone(),
            confidence: signal.confidence,
            message: format_message(signal),
            triggers: signal.triggers.clone(),
            recommendation: signal.recommendation.clone(),
            metadata: signal.metadata.clone(),
        }
    }
}

/// Map signal severity into the alert vocabulary, escalating one step for
/// high-confidence signals (never past EMERGENCY).
fn alert_severity_for(signal: &Signal) -> AlertSeverity {
    let base = match signal.severity {
        SignalSeverity::Info => AlertSeverity::Info,
        SignalSeverity::Warning => AlertSeverity::Warning,
        SignalSeverity::Critical => AlertSeverity::Critical,
        SignalSeverity::Emergency => AlertSeverity::Emergency,
    };

    if signal.confidence > ESCALATION_CONFIDENCE && base < AlertSeverity::Emergency {
        base.escalated()
    } else {
        base
    }
}

fn format_message(signal: &Signal) -> String {
    let emoji = match signal.severity {
        SignalSeverity::Info => "ℹ️",
        SignalSeverity::Warning => "⚠️",
        SignalSeverity::Critical => "🔴",
        SignalSeverity::Emergency => "🚨",
    };

    let mut message = format!(
        "{} **{}**\n\nConfidence: {:.1}%\n\n**Detected signals:**\n",
        emoji,
        crate::alerts::notifiers::slack::title_case(&signal.scenario),
        signal.confidence * 100.0
    );
    for trigger in &signal.triggers {
        message.push_str(&format!("• {}\n", trigger));
    }
    message.push_str(&format!("\n**Recommendation:**\n{}", signal.recommendation));

    message
}

/// Turns qualifying signals into dispatched, recorded alerts.
///
/// History appends serialize on a mutex; channel sends run in detached
/// tasks with no lock held, so one stuck channel cannot delay the history
/// or the other channels.
pub struct AlertEngine {
    config: AlertConfig,
    notifiers: RwLock<HashMap<String, Arc<dyn Notifier>>>,
    history: Mutex<VecDeque<Alert>>,
    last_by_scenario: Mutex<HashMap<String, DateTime<Utc>>>,
    recent_creations: Mutex<VecDeque<DateTime<Utc>>>,
}

impl AlertEngine {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            notifiers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            last_by_scenario: Mutex::new(HashMap::new()),
            recent_creations: Mutex::new(VecDeque::new()),
        }
    }

    pub fn register_notifier(&self, name: impl Into<String>, notifier: Arc<dyn Notifier>) {
        let name = name.into();
        info!("Registered notifier: {}", name);
        self.notifiers
            .write()
            .expect("notifier registry poisoned")
            .insert(name, notifier);
    }

    /// Evaluate signals into alerts: map severity, drop sub-WARNING, apply
    /// rate limiting, record, dispatch. Must run inside a tokio runtime
    /// (sends are spawned).
    pub fn evaluate_alerts(&self, signals: &[Signal]) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for signal in signals {
            let severity = alert_severity_for(signal);
            if severity < AlertSeverity::Warning {
                continue;
            }

            let now = Utc::now();
            if self.is_rate_limited(&signal.scenario, now) {
                warn!(
                    "Alert for {} suppressed by rate limit",
                    signal.scenario
                );
                continue;
            }

            let alert = Alert::from_signal(signal, severity);
            self.record(&alert, now);
            self.dispatch(&alert);
            alerts.push(alert);
        }

        info!(
            "Generated {} alerts from {} signals",
            alerts.len(),
            signals.len()
        );
        alerts
    }

    /// Cooldown per scenario plus a rolling hourly cap; either knob at 0
    /// disables that check.
    fn is_rate_limited(&self, scenario: &str, now: DateTime<Utc>) -> bool {
        if self.config.cooldown_minutes > 0 {
            let last = self
                .last_by_scenario
                .lock()
                .expect("cooldown map poisoned");
            if let Some(previous) = last.get(scenario) {
                if now - *previous < Duration::minutes(self.config.cooldown_minutes) {
                    return true;
                }
            }
        }

        if self.config.max_alerts_per_hour > 0 {
            let mut recent = self
                .recent_creations
                .lock()
                .expect("creation log poisoned");
            let cutoff = now - Duration::hours(1);
            while recent.front().is_some_and(|t| *t < cutoff) {
                recent.pop_front();
            }
            if recent.len() >= self.config.max_alerts_per_hour {
                return true;
            }
        }

        false
    }

    fn record(&self, alert: &Alert, now: DateTime<Utc>) {
        {
            let mut history = self.history.lock().expect("alert history poisoned");
            if history.len() == self.config.max_history {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }
        self.last_by_scenario
            .lock()
            .expect("cooldown map poisoned")
            .insert(alert.scenario.clone(), now);
        self.recent_creations
            .lock()
            .expect("creation log poisoned")
            .push_back(now);
    }

    /// Fan out to the severity's routing set. The registry is read here, at
    /// dispatch time, so late registrations are included; each send runs in
    /// its own task under a bounded timeout.
    fn dispatch(&self, alert: &Alert) {
        let targets: Vec<Arc<dyn Notifier>> = {
            let registry = self.notifiers.read().expect("notifier registry poisoned");
            match alert.severity {
                AlertSeverity::Emergency => registry.values().cloned().collect(),
                AlertSeverity::Critical => ["slack", "email"]
                    .iter()
                    .filter_map(|name| registry.get(*name).cloned())
                    .collect(),
                AlertSeverity::Warning => registry.get("slack").cloned().into_iter().collect(),
                // Filtered before dispatch.
                AlertSeverity::Info => Vec::new(),
            }
        };

        for notifier in targets {
            let alert = alert.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(SEND_TIMEOUT, notifier.send(&alert)).await {
                    Ok(Ok(())) => {
                        info!("Alert {} sent to {}", alert.id, notifier.name());
                    }
                    Ok(Err(e)) => {
                        error!("Failed to send alert to {}: {}", notifier.name(), e);
                    }
                    Err(_) => {
                        error!(
                            "Send to {} timed out after {:?}",
                            notifier.name(),
                            SEND_TIMEOUT
                        );
                    }
                }
            });
        }
    }

    /// Most recent `limit` alerts, insertion order.
    pub fn get_recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.lock().expect("alert history poisoned");
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .expect("alert history poisoned")
            .clear();
        info!("Alert history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifiers::NotifyError;
    use async_trait::async_trait;

    struct RecordingNotifier {
        name: String,
        sent: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::Config("simulated failure".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, alert.scenario));
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn recording(name: &str) -> (Arc<RecordingNotifier>, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier {
            name: name.to_string(),
            sent: sent.clone(),
            fail: false,
        });
        (notifier, sent)
    }

    fn signal(scenario: &str, severity: SignalSeverity, confidence: f64) -> Signal {
        Signal {
            scenario: scenario.to_string(),
            severity,
            confidence,
            triggers: vec![format!("{} trigger", scenario)],
            recommendation: "Stay alert.".to_string(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    fn unlimited_config() -> AlertConfig {
        AlertConfig {
            max_history: 1000,
            max_alerts_per_hour: 0,
            cooldown_minutes: 0,
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_info_is_never_dispatched() {
        let engine = AlertEngine::new(unlimited_config());
        let (slack, sent) = recording("slack");
        engine.register_notifier("slack", slack);

        let alerts = engine.evaluate_alerts(&[signal("calm", SignalSeverity::Info, 0.5)]);
        settle().await;

        assert!(alerts.is_empty());
        assert!(engine.get_recent_alerts(10).is_empty());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_high_confidence_info_escalates_to_warning() {
        let engine = AlertEngine::new(unlimited_config());
        let alerts =
            engine.evaluate_alerts(&[signal("quiet_shift", SignalSeverity::Info, 0.95)]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_warning_routes_to_slack_only() {
        let engine = AlertEngine::new(unlimited_config());
        let (slack, slack_sent) = recording("slack");
        let (email, email_sent) = recording("email");
        engine.register_notifier("slack", slack);
        engine.register_notifier("email", email);

        engine.evaluate_alerts(&[signal("volatility_spike", SignalSeverity::Warning, 0.8)]);
        settle().await;

        assert_eq!(slack_sent.lock().unwrap().len(), 1);
        assert!(email_sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_reaches_every_registered_channel() {
        let engine = AlertEngine::new(unlimited_config());
        let (slack, slack_sent) = recording("slack");
        let (email, email_sent) = recording("email");
        let (pager, pager_sent) = recording("pager");
        engine.register_notifier("slack", slack);
        engine.register_notifier("email", email);
        engine.register_notifier("pager", pager);

        engine.evaluate_alerts(&[signal("liquidity_crisis", SignalSeverity::Emergency, 0.5)]);
        settle().await;

        assert_eq!(slack_sent.lock().unwrap().len(), 1);
        assert_eq!(email_sent.lock().unwrap().len(), 1);
        assert_eq!(pager_sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_critical_with_full_confidence_escalates_to_emergency() {
        let engine = AlertEngine::new(unlimited_config());
        let (pager, pager_sent) = recording("pager");
        engine.register_notifier("pager", pager);

        let alerts = engine.evaluate_alerts(&[signal(
            "risk_off_transition",
            SignalSeverity::Critical,
            1.0,
        )]);
        settle().await;

        assert_eq!(alerts[0].severity, AlertSeverity::Emergency);
        // EMERGENCY fans out to every channel, pager included.
        assert_eq!(pager_sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_block_others() {
        let engine = AlertEngine::new(unlimited_config());
        let sent = Arc::new(Mutex::new(Vec::new()));
        engine.register_notifier(
            "slack",
            Arc::new(RecordingNotifier {
                name: "slack".to_string(),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }),
        );
        engine.register_notifier(
            "email",
            Arc::new(RecordingNotifier {
                name: "email".to_string(),
                sent: sent.clone(),
                fail: false,
            }),
        );

        let alerts =
            engine.evaluate_alerts(&[signal("korea_capital_outflow", SignalSeverity::Critical, 0.75)]);
        settle().await;

        // The failed channel is logged; email still delivers and the alert
        // is recorded.
        assert_eq!(alerts.len(), 1);
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(engine.get_recent_alerts(10).len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_route_names_are_skipped() {
        let engine = AlertEngine::new(unlimited_config());
        // No notifiers at all: dispatch is a no-op, not an error.
        let alerts =
            engine.evaluate_alerts(&[signal("liquidity_crisis", SignalSeverity::Emergency, 0.5)]);
        assert_eq!(alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_late_registration_is_seen_by_next_dispatch() {
        let engine = AlertEngine::new(unlimited_config());
        engine.evaluate_alerts(&[signal("a", SignalSeverity::Warning, 0.5)]);

        let (slack, sent) = recording("slack");
        engine.register_notifier("slack", slack);
        engine.evaluate_alerts(&[signal("b", SignalSeverity::Warning, 0.5)]);
        settle().await;

        assert_eq!(sent.lock().unwrap().as_slice(), ["slack:b"]);
    }

    #[tokio::test]
    async fn test_alert_preserves_signal_content_verbatim() {
        let engine = AlertEngine::new(unlimited_config());
        let sig = signal("risk_off_transition", SignalSeverity::Critical, 0.75);
        let alerts = engine.evaluate_alerts(std::slice::from_ref(&sig));

        assert_eq!(alerts[0].triggers, sig.triggers);
        assert_eq!(alerts[0].recommendation, sig.recommendation);
        assert_eq!(alerts[0].confidence, sig.confidence);
        assert!(alerts[0].message.contains(&sig.triggers[0]));
        assert!(alerts[0].message.contains(&sig.recommendation));
    }

    #[tokio::test]
    async fn test_history_is_bounded_and_ordered() {
        let engine = AlertEngine::new(AlertConfig {
            max_history: 3,
            max_alerts_per_hour: 0,
            cooldown_minutes: 0,
        });

        for i in 0..5 {
            engine.evaluate_alerts(&[signal(
                &format!("scenario_{}", i),
                SignalSeverity::Warning,
                0.5,
            )]);
        }

        let recent = engine.get_recent_alerts(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].scenario, "scenario_2");
        assert_eq!(recent[2].scenario, "scenario_4");

        let last_two = engine.get_recent_alerts(2);
        assert_eq!(last_two[0].scenario, "scenario_3");

        engine.clear_history();
        assert!(engine.get_recent_alerts(10).is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_repeat_scenario() {
        let engine = AlertEngine::new(AlertConfig {
            max_history: 100,
            max_alerts_per_hour: 0,
            cooldown_minutes: 15,
        });

        let first = engine.evaluate_alerts(&[signal("vol", SignalSeverity::Warning, 0.5)]);
        let repeat = engine.evaluate_alerts(&[signal("vol", SignalSeverity::Warning, 0.5)]);
        let other = engine.evaluate_alerts(&[signal("other", SignalSeverity::Warning, 0.5)]);

        assert_eq!(first.len(), 1);
        assert!(repeat.is_empty());
        // A different scenario is unaffected by the first one's cooldown.
        assert_eq!(other.len(), 1);
        assert_eq!(engine.get_recent_alerts(10).len(), 2);
    }

    #[tokio::test]
    async fn test_hourly_cap_limits_creation() {
        let engine = AlertEngine::new(AlertConfig {
            max_history: 100,
            max_alerts_per_hour: 2,
            cooldown_minutes: 0,
        });

        let signals: Vec<Signal> = (0..4)
            .map(|i| signal(&format!("s{}", i), SignalSeverity::Warning, 0.5))
            .collect();
        let alerts = engine.evaluate_alerts(&signals);

        assert_eq!(alerts.len(), 2);
        assert_eq!(engine.get_recent_alerts(10).len(), 2);
    }
}
