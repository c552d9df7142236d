//! Publish-readiness: every bucket other than the current minute is settled.

use pactbot_events::StoredEvent;

use crate::{AggregatorConfig, AggregatorState, BucketKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Events drained by one extraction plus the buckets they came from.
pub struct ExtractionReport {
    pub events: Vec<StoredEvent>,
    pub drained_buckets: Vec<BucketKey>,
}

impl ExtractionReport {
    pub fn drained_any(&self) -> bool {
        !self.drained_buckets.is_empty()
    }
}

/// Removes and returns all events outside the current minute bucket, in
/// ascending bucket order and per-bucket insertion order. The current bucket
/// is never drained.
pub fn drain_settled_buckets(
    state: &mut AggregatorState,
    now_unix_ms: u64,
    config: &AggregatorConfig,
) -> ExtractionReport {
    let current = config.bucket_for(now_unix_ms);
    let drained_buckets = state
        .buckets
        .keys()
        .copied()
        .filter(|key| *key != current)
        .collect::<Vec<_>>();

    let mut events = Vec::new();
    for key in &drained_buckets {
        if let Some(bucket) = state.buckets.remove(key) {
            events.extend(bucket);
        }
    }

    ExtractionReport {
        events,
        drained_buckets,
    }
}
