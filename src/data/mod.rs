pub mod fred;
pub mod quotes;
pub mod scheduler;
pub mod snapshot;
pub mod types;

use anyhow::Result;
use async_trait::async_trait;
use types::Observation;

/// A market-data source. Collectors tolerate partial batches: a symbol
/// that fails is logged and skipped, never fails the cycle.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, symbols: &[String]) -> Result<Vec<Observation>>;

    /// Cheap connectivity probe, used at startup.
    async fn validate_connection(&self) -> bool;

    fn name(&self) -> &str;
}
