use crate::alerts::engine::{Alert, AlertSeverity};
use crate::alerts::notifiers::slack::title_case;
use crate::alerts::notifiers::{Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::info;

/// Sends alerts through an HTTP mail-relay API (from/to/subject/body as
/// JSON). SMTP details live behind the relay.
pub struct EmailNotifier {
    client: Client,
    relay_url: String,
    api_key: String,
    from_address: String,
    to_addresses: Vec<String>,
}

impl EmailNotifier {
    pub fn new(
        relay_url: String,
        api_key: String,
        from_address: String,
        to_addresses: Vec<String>,
    ) -> Result<Self, NotifyError> {
        if to_addresses.is_empty() {
            return Err(NotifyError::Config(
                "email notifier needs at least one recipient".to_string(),
            ));
        }

        Ok(Self {
            client: Client::new(),
            relay_url,
            api_key,
            from_address,
            to_addresses,
        })
    }

    fn build_payload(&self, alert: &Alert) -> Value {
        json!({
            "from": self.from_address,
            "to": self.to_addresses,
            "subject": format!("[{}] {}", alert.severity, title_case(&alert.scenario)),
            "text": alert.message,
            "html": self.format_html(alert),
        })
    }

    fn format_html(&self, alert: &Alert) -> String {
        let color = match alert.severity {
            AlertSeverity::Info => "#36a64f",
            AlertSeverity::Warning => "#ff9900",
            AlertSeverity::Critical => "#ff0000",
            AlertSeverity::Emergency => "#8b0000",
        };

        let triggers: String = alert
            .triggers
            .iter()
            .map(|t| format!("<div class=\"trigger\">&bull; {}</div>", t))
            .collect();

        format!(
            r#"<html>
<head>
<style>
body {{ font-family: Arial, sans-serif; }}
.header {{ background-color: {color}; color: white; padding: 20px; }}
.content {{ padding: 20px; }}
.trigger {{ margin: 10px 0; padding: 10px; background-color: #f5f5f5; }}
.recommendation {{ margin: 20px 0; padding: 15px; background-color: #e3f2fd; border-left: 4px solid #2196f3; }}
.footer {{ padding: 10px; text-align: center; color: #666; font-size: 12px; }}
</style>
</head>
<body>
<div class="header">
<h2>{title}</h2>
<p>Severity: {severity} | Confidence: {confidence:.1}%</p>
</div>
<div class="content">
<h3>Detected signals:</h3>
{triggers}
<div class="recommendation">
<h3>Recommendation:</h3>
<p>{recommendation}</p>
</div>
<p><small>Alert ID: {id}</small></p>
<p><small>Time: {timestamp}</small></p>
</div>
<div class="footer">
<p>Market Sentinel</p>
</div>
</body>
</html>"#,
            color = color,
            title = title_case(&alert.scenario),
            severity = alert.severity,
            confidence = alert.confidence * 100.0,
            triggers = triggers,
            recommendation = alert.recommendation,
            id = alert.id,
            timestamp = alert.timestamp.to_rfc3339(),
        )
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = self.build_payload(alert);

        let response = self
            .client
            .post(&self.relay_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotifyError::Http {
                channel: "email".to_string(),
                status: response.status().as_u16(),
            });
        }

        info!("Alert sent via email: {}", alert.id);
        Ok(())
    }

    fn name(&self) -> &str {
        "email"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::signals::{Signal, SignalSeverity};
    use chrono::Utc;
    use serde_json::Map;

    fn notifier() -> EmailNotifier {
        EmailNotifier::new(
            "https://mail.relay.invalid/v1/send".to_string(),
            "test-key".to_string(),
            "sentinel@example.com".to_string(),
            vec!["ops@example.com".to_string()],
        )
        .unwrap()
    }

    fn sample_alert() -> Alert {
        let signal = Signal {
            scenario: "liquidity_crisis".to_string(),
            severity: SignalSeverity::Emergency,
            confidence: 0.5,
            triggers: vec![
                "LIBOR-OIS spread surge: 0.90pp".to_string(),
                "Repo rate spike detected".to_string(),
            ],
            recommendation: "Prioritize cash.".to_string(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        };
        Alert::from_signal(&signal, AlertSeverity::Emergency)
    }

    #[test]
    fn test_requires_recipients() {
        let result = EmailNotifier::new(
            "https://mail.relay.invalid/v1/send".to_string(),
            "key".to_string(),
            "sentinel@example.com".to_string(),
            vec![],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_payload_subject_and_recipients() {
        let payload = notifier().build_payload(&sample_alert());

        assert_eq!(payload["subject"], "[EMERGENCY] Liquidity Crisis");
        assert_eq!(payload["from"], "sentinel@example.com");
        assert_eq!(payload["to"][0], "ops@example.com");
    }

    #[test]
    fn test_html_contains_triggers_and_recommendation() {
        let alert = sample_alert();
        let html = notifier().format_html(&alert);

        assert!(html.contains("LIBOR-OIS spread surge: 0.90pp"));
        assert!(html.contains("Prioritize cash."));
        assert!(html.contains("#8b0000"));
        assert!(html.contains(&alert.id));
    }
}
