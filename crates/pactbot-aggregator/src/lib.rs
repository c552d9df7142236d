//! Stateful event aggregation for pact broker notifications.
//!
//! Buckets accepted events by minute, consolidates correlated events into
//! the current bucket, drains settled buckets for publishing, and tracks the
//! chat threads started by publication messages. One `Aggregator` per name is
//! driven by a single actor task so every method runs read-modify-persist
//! without interleaving.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod actor;
mod aggregator;
mod consolidation;
mod extraction;
mod state;
mod threads;

pub use actor::{AggregatorHandle, AggregatorRegistry};
pub use aggregator::Aggregator;
pub use consolidation::{consolidate, recent_version_numbers, ConsolidationReport};
pub use extraction::{drain_settled_buckets, ExtractionReport};
pub use pactbot_events::{EventId, PactEvent, StoredEvent, ThreadKey};
pub use state::{AggregatorSnapshot, AggregatorState, BucketKey, BucketSnapshot, ThreadInfo};

pub const DEFAULT_MINUTE_BUCKET_MS: u64 = 60_000;
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 30_000;
pub const DEFAULT_MAX_TIME_BEFORE_FLUSHING_MS: u64 = 300_000;
pub const DEFAULT_AGGREGATOR_NAME: &str = "main";

/// Result type for aggregator operations.
pub type AggregatorResult<T> = Result<T, AggregatorError>;

/// Errors surfaced by aggregator operations that do not degrade silently.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(transparent)]
    Store(#[from] pactbot_store::StoreError),
    #[error("persisted value for '{key}' is corrupt: {source}")]
    CorruptState {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode aggregator state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid aggregator config: {0}")]
    InvalidConfig(String),
    #[error("aggregator '{0}' is unavailable")]
    ActorUnavailable(String),
}

/// Timing knobs consumed by bucketing, consolidation and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub minute_bucket_ms: u64,
    pub quiet_period_ms: u64,
    pub max_time_before_flushing_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            minute_bucket_ms: DEFAULT_MINUTE_BUCKET_MS,
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            max_time_before_flushing_ms: DEFAULT_MAX_TIME_BEFORE_FLUSHING_MS,
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> AggregatorResult<()> {
        if self.minute_bucket_ms == 0 {
            return Err(AggregatorError::InvalidConfig(
                "minute_bucket_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bucket_for(&self, timestamp_unix_ms: u64) -> BucketKey {
        BucketKey::for_timestamp(timestamp_unix_ms, self.minute_bucket_ms)
    }
}
