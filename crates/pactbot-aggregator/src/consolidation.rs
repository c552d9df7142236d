//! Re-homes correlated events into the current bucket before extraction so a
//! single release burst is not split across two publish calls.

use std::collections::BTreeSet;

use pactbot_events::StoredEvent;

use crate::{AggregatorConfig, AggregatorState, BucketKey};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Outcome of one consolidation pass.
pub struct ConsolidationReport {
    pub current_bucket: Option<BucketKey>,
    pub recent_versions: BTreeSet<String>,
    pub moved: usize,
    pub left_for_flush: usize,
}

impl ConsolidationReport {
    pub fn changed(&self) -> bool {
        self.moved > 0
    }
}

/// Versions seen in the current bucket plus previous-bucket versions that
/// arrived inside the quiet period.
pub fn recent_version_numbers(
    state: &AggregatorState,
    now_unix_ms: u64,
    config: &AggregatorConfig,
) -> BTreeSet<String> {
    let current = config.bucket_for(now_unix_ms);
    let mut versions = BTreeSet::new();

    if let Some(events) = state.buckets.get(&current) {
        versions.extend(
            events
                .iter()
                .map(|event| event.pacticipant_version_number().to_string()),
        );
    }

    let quiet_period_start = now_unix_ms.saturating_sub(config.quiet_period_ms);
    if let Some(events) = current
        .previous()
        .and_then(|previous| state.buckets.get(&previous))
    {
        versions.extend(
            events
                .iter()
                .filter(|event| event.ts > quiet_period_start)
                .map(|event| event.pacticipant_version_number().to_string()),
        );
    }

    versions
}

/// Moves every non-current event whose version is recent and whose age is
/// under the flush ceiling into the current bucket. Buckets emptied by the
/// move are dropped.
pub fn consolidate(
    state: &mut AggregatorState,
    now_unix_ms: u64,
    config: &AggregatorConfig,
) -> ConsolidationReport {
    let current = config.bucket_for(now_unix_ms);
    let recent_versions = recent_version_numbers(state, now_unix_ms, config);
    let mut report = ConsolidationReport {
        current_bucket: Some(current),
        ..ConsolidationReport::default()
    };
    if recent_versions.is_empty() {
        return report;
    }

    let mut relocated: Vec<StoredEvent> = Vec::new();
    let mut emptied: Vec<BucketKey> = Vec::new();
    let mut left_for_flush = 0_usize;

    for (key, events) in state.buckets.iter_mut() {
        if *key == current {
            continue;
        }
        let (moving, staying): (Vec<StoredEvent>, Vec<StoredEvent>) = std::mem::take(events)
            .into_iter()
            .partition(|event| {
                if !recent_versions.contains(event.pacticipant_version_number()) {
                    return false;
                }
                let under_ceiling = event.age_ms(now_unix_ms) < config.max_time_before_flushing_ms;
                if !under_ceiling {
                    left_for_flush = left_for_flush.saturating_add(1);
                }
                under_ceiling
            });
        relocated.extend(moving);
        if staying.is_empty() {
            emptied.push(*key);
        }
        *events = staying;
    }

    for key in emptied {
        state.buckets.remove(&key);
    }

    report.moved = relocated.len();
    report.left_for_flush = left_for_flush;
    report.recent_versions = recent_versions;
    if !relocated.is_empty() {
        state.buckets.entry(current).or_default().extend(relocated);
    }
    report
}
