use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use pactbot_events::{EventId, PactEvent, StoredEvent};
use pactbot_store::KeyValueStore;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{AggregatorConfig, AggregatorError, AggregatorResult};

const BUCKET_KEY_PREFIX: &str = "events:";

/// Minute-window identifier: `floor(ts / minute_bucket_ms)`, rendered `events:{minute}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey(u64);

impl BucketKey {
    pub fn new(minute: u64) -> Self {
        Self(minute)
    }

    pub fn for_timestamp(timestamp_unix_ms: u64, minute_bucket_ms: u64) -> Self {
        Self(timestamp_unix_ms / minute_bucket_ms.max(1))
    }

    pub fn minute(self) -> u64 {
        self.0
    }

    /// The bucket immediately before this one, if any.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BUCKET_KEY_PREFIX}{}", self.0)
    }
}

impl FromStr for BucketKey {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let minute = raw
            .strip_prefix(BUCKET_KEY_PREFIX)
            .ok_or_else(|| format!("bucket key '{raw}' must start with '{BUCKET_KEY_PREFIX}'"))?;
        minute
            .parse::<u64>()
            .map(Self)
            .map_err(|error| format!("bucket key '{raw}' has invalid minute: {error}"))
    }
}

impl Serialize for BucketKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BucketKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Chat thread started for a publication event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub ts: String,
    #[serde(default)]
    pub channel_id: Option<String>,
    pub payload: PactEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StateField {
    LastEventTime,
    LastProcessTime,
    Buckets,
    TotalProcessed,
    LastProcessedCount,
    PublicationThreads,
    NextEventSeq,
}

impl StateField {
    pub(crate) fn key(self) -> &'static str {
        match self {
            Self::LastEventTime => "last_event_time",
            Self::LastProcessTime => "last_process_time",
            Self::Buckets => "buckets",
            Self::TotalProcessed => "total_processed",
            Self::LastProcessedCount => "last_processed_count",
            Self::PublicationThreads => "publication_threads",
            Self::NextEventSeq => "next_event_seq",
        }
    }
}

/// Durable state owned by one aggregator instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatorState {
    pub last_event_time: u64,
    pub last_process_time: u64,
    pub buckets: BTreeMap<BucketKey, Vec<StoredEvent>>,
    pub total_processed: u64,
    pub last_processed_count: u64,
    pub publication_threads: BTreeMap<String, ThreadInfo>,
    pub next_event_seq: u64,
}

impl AggregatorState {
    pub(crate) async fn load(store: &dyn KeyValueStore) -> AggregatorResult<Self> {
        Ok(Self {
            last_event_time: load_field(store, StateField::LastEventTime).await?,
            last_process_time: load_field(store, StateField::LastProcessTime).await?,
            buckets: load_field(store, StateField::Buckets).await?,
            total_processed: load_field(store, StateField::TotalProcessed).await?,
            last_processed_count: load_field(store, StateField::LastProcessedCount).await?,
            publication_threads: load_field(store, StateField::PublicationThreads).await?,
            next_event_seq: load_field(store, StateField::NextEventSeq).await?,
        })
    }

    pub(crate) fn encode(&self, fields: &[StateField]) -> AggregatorResult<Vec<(String, Value)>> {
        fields
            .iter()
            .map(|field| {
                let value = match field {
                    StateField::LastEventTime => serde_json::to_value(self.last_event_time),
                    StateField::LastProcessTime => serde_json::to_value(self.last_process_time),
                    StateField::Buckets => serde_json::to_value(&self.buckets),
                    StateField::TotalProcessed => serde_json::to_value(self.total_processed),
                    StateField::LastProcessedCount => {
                        serde_json::to_value(self.last_processed_count)
                    }
                    StateField::PublicationThreads => {
                        serde_json::to_value(&self.publication_threads)
                    }
                    StateField::NextEventSeq => serde_json::to_value(self.next_event_seq),
                }
                .map_err(AggregatorError::Encode)?;
                Ok((field.key().to_string(), value))
            })
            .collect()
    }

    /// Allocates the next unique event id for this instance.
    pub(crate) fn allocate_event_id(&mut self, now_unix_ms: u64) -> EventId {
        self.next_event_seq = self.next_event_seq.saturating_add(1);
        EventId::new(now_unix_ms, self.next_event_seq)
    }

    pub fn total_events(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn snapshot(
        &self,
        name: &str,
        generated_unix_ms: u64,
        config: AggregatorConfig,
    ) -> AggregatorSnapshot {
        AggregatorSnapshot {
            name: name.to_string(),
            generated_unix_ms,
            last_event_time: self.last_event_time,
            last_process_time: self.last_process_time,
            total_processed: self.total_processed,
            last_processed_count: self.last_processed_count,
            total_events: self.total_events(),
            bucket_count: self.buckets.len(),
            buckets: self
                .buckets
                .iter()
                .map(|(key, events)| BucketSnapshot {
                    key: key.to_string(),
                    count: events.len(),
                    events: events.clone(),
                })
                .collect(),
            publication_threads: self.publication_threads.clone(),
            config,
        }
    }
}

async fn load_field<T>(store: &dyn KeyValueStore, field: StateField) -> AggregatorResult<T>
where
    T: DeserializeOwned + Default,
{
    let key = field.key();
    match store.get(key).await? {
        Some(Value::Null) | None => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|source| AggregatorError::CorruptState { key, source }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Per-bucket slice of a debug snapshot.
pub struct BucketSnapshot {
    pub key: String,
    pub count: usize,
    pub events: Vec<StoredEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
/// Read-only view of the full aggregator state for operators.
pub struct AggregatorSnapshot {
    pub name: String,
    pub generated_unix_ms: u64,
    pub last_event_time: u64,
    pub last_process_time: u64,
    pub total_processed: u64,
    pub last_processed_count: u64,
    pub total_events: usize,
    pub bucket_count: usize,
    pub buckets: Vec<BucketSnapshot>,
    pub publication_threads: BTreeMap<String, ThreadInfo>,
    pub config: AggregatorConfig,
}
