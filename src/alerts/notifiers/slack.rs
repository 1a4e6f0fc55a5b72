use crate::alerts::engine::{Alert, AlertSeverity};
use crate::alerts::notifiers::{Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

/// Sends alerts to a Slack incoming webhook.
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    channel: Option<String>,
    username: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: Option<String>, username: String) -> Self {
        Self {
            client: Client::new(),
            webhook_url,
            channel,
            username,
        }
    }

    fn severity_color(severity: AlertSeverity) -> &'static str {
        match severity {
            AlertSeverity::Info => "#36a64f",
            AlertSeverity::Warning => "#ff9900",
            AlertSeverity::Critical => "#ff0000",
            AlertSeverity::Emergency => "#8b0000",
        }
    }

    fn build_payload(&self, alert: &Alert) -> Value {
        let attachment = json!({
            "color": Self::severity_color(alert.severity),
            "title": title_case(&alert.scenario),
            "text": alert.message,
            "fields": [
                {
                    "title": "Severity",
                    "value": alert.severity.to_string(),
                    "short": true
                },
                {
                    "title": "Confidence",
                    "value": format!("{:.1}%", alert.confidence * 100.0),
                    "short": true
                }
            ],
            "footer": "Market Sentinel",
            "ts": alert.timestamp.timestamp()
        });

        let mut payload = json!({
            "username": self.username,
            "attachments": [attachment]
        });
        if let Some(channel) = &self.channel {
            payload["channel"] = json!(channel);
        }

        payload
    }
}

/// "risk_off_transition" -> "Risk Off Transition".
pub(crate) fn title_case(scenario: &str) -> String {
    scenario
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = self.build_payload(alert);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Http {
                channel: "slack".to_string(),
                status: response.status().as_u16(),
            });
        }

        info!("Alert sent to Slack: {}", alert.id);
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signals::{Signal, SignalSeverity};
    use chrono::Utc;
    use serde_json::Map;

    fn sample_alert() -> Alert {
        let signal = Signal {
            scenario: "risk_off_transition".to_string(),
            severity: SignalSeverity::Critical,
            confidence: 0.75,
            triggers: vec!["VIX spike: 32.0".to_string()],
            recommendation: "Reduce exposure.".to_string(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        };
        Alert::from_signal(&signal, AlertSeverity::Critical)
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("risk_off_transition"), "Risk Off Transition");
        assert_eq!(title_case("vix"), "Vix");
    }

    #[test]
    fn test_payload_shape() {
        let notifier = SlackNotifier::new(
            "https://hooks.slack.invalid/services/T/B/X".to_string(),
            Some("#alerts".to_string()),
            "Market Sentinel".to_string(),
        );
        let payload = notifier.build_payload(&sample_alert());

        assert_eq!(payload["username"], "Market Sentinel");
        assert_eq!(payload["channel"], "#alerts");
        let attachment = &payload["attachments"][0];
        assert_eq!(attachment["color"], "#ff0000");
        assert_eq!(attachment["title"], "Risk Off Transition");
        assert_eq!(attachment["fields"][0]["value"], "CRITICAL");
        assert_eq!(attachment["fields"][1]["value"], "75.0%");
    }

    #[test]
    fn test_payload_without_channel_override() {
        let notifier = SlackNotifier::new(
            "https://hooks.slack.invalid/services/T/B/X".to_string(),
            None,
            "Market Sentinel".to_string(),
        );
        let payload = notifier.build_payload(&sample_alert());
        assert!(payload.get("channel").is_none());
    }
}
