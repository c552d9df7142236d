use std::sync::Arc;

use pactbot_core::Clock;
use pactbot_events::{PactEvent, StoredEvent, ThreadKey};
use pactbot_store::KeyValueStore;

use crate::consolidation::consolidate;
use crate::extraction::drain_settled_buckets;
use crate::state::StateField;
use crate::{
    AggregatorConfig, AggregatorResult, AggregatorSnapshot, AggregatorState, ThreadInfo,
};

/// Single-writer aggregation logic for one named instance.
///
/// Methods take `&mut self`; concurrent callers go through
/// [`crate::AggregatorHandle`], which serializes them. Every mutation works on
/// a copy of the cached state and only commits it after the store accepted
/// the write, so a failed persist leaves the previous state in place.
pub struct Aggregator {
    name: String,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    state: Option<AggregatorState>,
}

impl Aggregator {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> AggregatorResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            store,
            clock,
            config,
            state: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Appends `event` to the current minute bucket. Storage failures are
    /// logged and the event is dropped.
    pub async fn add_event(&mut self, event: PactEvent) {
        let now = self.clock.now_unix_ms();
        let group_key = event.group_key();
        if let Err(error) = self.try_add_event(event, now).await {
            tracing::warn!(
                aggregator = %self.name,
                group = %group_key,
                error = %error,
                "failed to record event; dropping it"
            );
        }
    }

    async fn try_add_event(&mut self, event: PactEvent, now: u64) -> AggregatorResult<()> {
        let mut next = self.load_state().await?;
        let bucket = self.config.bucket_for(now);
        let id = next.allocate_event_id(now);
        tracing::debug!(
            aggregator = %self.name,
            bucket = %bucket,
            event_id = %id,
            kind = event.kind(),
            "event accepted"
        );
        next.buckets.entry(bucket).or_default().push(StoredEvent {
            id,
            ts: now,
            event,
        });
        next.last_event_time = now;
        self.commit(
            next,
            &[
                StateField::Buckets,
                StateField::LastEventTime,
                StateField::NextEventSeq,
            ],
        )
        .await
    }

    /// Consolidates, then drains every settled bucket. Storage failures are
    /// logged and yield an empty list; undrained buckets stay for the next call.
    pub async fn get_events_to_publish(&mut self) -> Vec<StoredEvent> {
        let now = self.clock.now_unix_ms();
        match self.try_get_events_to_publish(now).await {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(
                    aggregator = %self.name,
                    error = %error,
                    "failed to extract events to publish"
                );
                Vec::new()
            }
        }
    }

    async fn try_get_events_to_publish(&mut self, now: u64) -> AggregatorResult<Vec<StoredEvent>> {
        let mut next = self.load_state().await?;
        let consolidation = consolidate(&mut next, now, &self.config);
        if consolidation.changed() {
            tracing::debug!(
                aggregator = %self.name,
                moved = consolidation.moved,
                left_for_flush = consolidation.left_for_flush,
                recent_versions = consolidation.recent_versions.len(),
                "consolidated correlated events into current bucket"
            );
            self.commit(next.clone(), &[StateField::Buckets]).await?;
        }

        let extraction = drain_settled_buckets(&mut next, now, &self.config);
        next.last_process_time = now;
        if !extraction.drained_any() {
            self.commit(next, &[StateField::LastProcessTime]).await?;
            return Ok(Vec::new());
        }

        let drained = u64::try_from(extraction.events.len()).unwrap_or(u64::MAX);
        next.total_processed = next.total_processed.saturating_add(drained);
        next.last_processed_count = drained;
        self.commit(
            next,
            &[
                StateField::Buckets,
                StateField::LastProcessTime,
                StateField::TotalProcessed,
                StateField::LastProcessedCount,
            ],
        )
        .await?;
        tracing::info!(
            aggregator = %self.name,
            drained = extraction.events.len(),
            buckets = extraction.drained_buckets.len(),
            "drained settled buckets"
        );
        Ok(extraction.events)
    }

    pub async fn get_debug_info(&mut self) -> AggregatorResult<AggregatorSnapshot> {
        let now = self.clock.now_unix_ms();
        let state = self.load_state().await?;
        Ok(state.snapshot(&self.name, now, self.config))
    }

    /// Wipes all durable state for this instance.
    pub async fn clear_all(&mut self) -> AggregatorResult<()> {
        self.store.delete_all().await?;
        self.state = Some(AggregatorState::default());
        tracing::info!(aggregator = %self.name, "aggregator state cleared");
        Ok(())
    }

    pub async fn set_thread_info(
        &mut self,
        key: &ThreadKey,
        ts: String,
        channel_id: Option<String>,
        payload: PactEvent,
    ) -> AggregatorResult<()> {
        let mut next = self.load_state().await?;
        let pruned = next.upsert_thread_info(
            key,
            ThreadInfo {
                ts,
                channel_id,
                payload,
            },
        );
        if pruned > 0 {
            tracing::debug!(
                aggregator = %self.name,
                thread_key = %key,
                pruned,
                "pruned stale publication threads"
            );
        }
        self.commit(next, &[StateField::PublicationThreads]).await
    }

    pub async fn get_thread_info(&mut self, key: &ThreadKey) -> AggregatorResult<Option<ThreadInfo>> {
        let state = self.load_state().await?;
        Ok(state.thread_info(key).cloned())
    }

    pub async fn get_thread_ts(&mut self, key: &ThreadKey) -> AggregatorResult<Option<String>> {
        Ok(self.get_thread_info(key).await?.map(|info| info.ts))
    }

    pub async fn get_channel_id(&mut self, key: &ThreadKey) -> AggregatorResult<Option<String>> {
        Ok(self
            .get_thread_info(key)
            .await?
            .and_then(|info| info.channel_id))
    }

    pub async fn get_payload(&mut self, key: &ThreadKey) -> AggregatorResult<Option<PactEvent>> {
        Ok(self.get_thread_info(key).await?.map(|info| info.payload))
    }

    /// Returns a working copy of the cached state, loading it on first use.
    async fn load_state(&mut self) -> AggregatorResult<AggregatorState> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let loaded = AggregatorState::load(self.store.as_ref()).await?;
        self.state = Some(loaded.clone());
        Ok(loaded)
    }

    async fn commit(&mut self, next: AggregatorState, fields: &[StateField]) -> AggregatorResult<()> {
        let entries = next.encode(fields)?;
        self.store.put_many(entries).await?;
        self.state = Some(next);
        Ok(())
    }
}
