pub mod email;
pub mod slack;

use crate::alerts::engine::Alert;
use async_trait::async_trait;

/// Delivery failure for one channel. Non-fatal: the engine logs it and
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error from {channel}: status {status}")]
    Http { channel: String, status: u16 },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Channel misconfigured: {0}")]
    Config(String),
}

/// A notification channel. Delivery is best-effort, at-most-once per alert;
/// failures are the channel's to report, never to retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;

    fn name(&self) -> &str;
}
