//! Per-name actor: one task owns one `Aggregator` and applies commands in
//! arrival order, so no two method bodies ever interleave.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pactbot_core::Clock;
use pactbot_events::{PactEvent, StoredEvent, ThreadKey};
use pactbot_store::StoreFactory;
use tokio::sync::{mpsc, oneshot};

use crate::{
    Aggregator, AggregatorConfig, AggregatorError, AggregatorResult, AggregatorSnapshot,
    ThreadInfo,
};

const COMMAND_QUEUE_CAPACITY: usize = 256;

enum AggregatorCommand {
    AddEvent {
        event: PactEvent,
        reply: oneshot::Sender<()>,
    },
    GetEventsToPublish {
        reply: oneshot::Sender<Vec<StoredEvent>>,
    },
    GetDebugInfo {
        reply: oneshot::Sender<AggregatorResult<AggregatorSnapshot>>,
    },
    ClearAll {
        reply: oneshot::Sender<AggregatorResult<()>>,
    },
    SetThreadInfo {
        key: ThreadKey,
        ts: String,
        channel_id: Option<String>,
        payload: PactEvent,
        reply: oneshot::Sender<AggregatorResult<()>>,
    },
    GetThreadInfo {
        key: ThreadKey,
        reply: oneshot::Sender<AggregatorResult<Option<ThreadInfo>>>,
    },
}

#[derive(Clone)]
/// Cloneable handle to a running aggregator actor.
pub struct AggregatorHandle {
    name: Arc<str>,
    sender: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    /// Spawns the actor task on the current Tokio runtime.
    pub fn spawn(aggregator: Aggregator) -> AggregatorResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            AggregatorError::ActorUnavailable(format!(
                "{} (no active Tokio runtime)",
                aggregator.name()
            ))
        })?;
        let name: Arc<str> = Arc::from(aggregator.name());
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        runtime.spawn(run_aggregator_actor(aggregator, receiver));
        Ok(Self { name, sender })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues the event and waits until the actor has processed it. Never fails
    /// loudly: storage errors are logged by the aggregator.
    pub async fn add_event(&self, event: PactEvent) {
        let (reply, response) = oneshot::channel();
        if let Err(error) = self
            .request(AggregatorCommand::AddEvent { event, reply }, response)
            .await
        {
            tracing::warn!(aggregator = %self.name, error = %error, "add_event not delivered");
        }
    }

    pub async fn get_events_to_publish(&self) -> Vec<StoredEvent> {
        let (reply, response) = oneshot::channel();
        match self
            .request(AggregatorCommand::GetEventsToPublish { reply }, response)
            .await
        {
            Ok(events) => events,
            Err(error) => {
                tracing::warn!(
                    aggregator = %self.name,
                    error = %error,
                    "get_events_to_publish not delivered"
                );
                Vec::new()
            }
        }
    }

    pub async fn get_debug_info(&self) -> AggregatorResult<AggregatorSnapshot> {
        let (reply, response) = oneshot::channel();
        self.request(AggregatorCommand::GetDebugInfo { reply }, response)
            .await?
    }

    pub async fn clear_all(&self) -> AggregatorResult<()> {
        let (reply, response) = oneshot::channel();
        self.request(AggregatorCommand::ClearAll { reply }, response)
            .await?
    }

    pub async fn set_thread_info(
        &self,
        key: ThreadKey,
        ts: impl Into<String>,
        channel_id: Option<String>,
        payload: PactEvent,
    ) -> AggregatorResult<()> {
        let (reply, response) = oneshot::channel();
        self.request(
            AggregatorCommand::SetThreadInfo {
                key,
                ts: ts.into(),
                channel_id,
                payload,
                reply,
            },
            response,
        )
        .await?
    }

    pub async fn get_thread_info(&self, key: &ThreadKey) -> AggregatorResult<Option<ThreadInfo>> {
        let (reply, response) = oneshot::channel();
        self.request(
            AggregatorCommand::GetThreadInfo {
                key: key.clone(),
                reply,
            },
            response,
        )
        .await?
    }

    pub async fn get_thread_ts(&self, key: &ThreadKey) -> AggregatorResult<Option<String>> {
        Ok(self.get_thread_info(key).await?.map(|info| info.ts))
    }

    pub async fn get_channel_id(&self, key: &ThreadKey) -> AggregatorResult<Option<String>> {
        Ok(self
            .get_thread_info(key)
            .await?
            .and_then(|info| info.channel_id))
    }

    pub async fn get_payload(&self, key: &ThreadKey) -> AggregatorResult<Option<PactEvent>> {
        Ok(self.get_thread_info(key).await?.map(|info| info.payload))
    }

    async fn request<T>(
        &self,
        command: AggregatorCommand,
        response: oneshot::Receiver<T>,
    ) -> AggregatorResult<T> {
        self.sender
            .send(command)
            .await
            .map_err(|_| AggregatorError::ActorUnavailable(self.name.to_string()))?;
        response
            .await
            .map_err(|_| AggregatorError::ActorUnavailable(self.name.to_string()))
    }
}

async fn run_aggregator_actor(
    mut aggregator: Aggregator,
    mut receiver: mpsc::Receiver<AggregatorCommand>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            AggregatorCommand::AddEvent { event, reply } => {
                aggregator.add_event(event).await;
                let _ = reply.send(());
            }
            AggregatorCommand::GetEventsToPublish { reply } => {
                let events = aggregator.get_events_to_publish().await;
                deliver_drained(aggregator.name(), reply, events);
            }
            AggregatorCommand::GetDebugInfo { reply } => {
                let _ = reply.send(aggregator.get_debug_info().await);
            }
            AggregatorCommand::ClearAll { reply } => {
                let _ = reply.send(aggregator.clear_all().await);
            }
            AggregatorCommand::SetThreadInfo {
                key,
                ts,
                channel_id,
                payload,
                reply,
            } => {
                let result = aggregator
                    .set_thread_info(&key, ts, channel_id, payload)
                    .await;
                let _ = reply.send(result);
            }
            AggregatorCommand::GetThreadInfo { key, reply } => {
                let _ = reply.send(aggregator.get_thread_info(&key).await);
            }
        }
    }
    tracing::debug!(aggregator = aggregator.name(), "aggregator actor stopped");
}

/// Hands drained events to the caller. Drained events are already removed
/// from the store, so a vanished caller loses them; that loss is logged.
pub(crate) fn deliver_drained(
    name: &str,
    reply: oneshot::Sender<Vec<StoredEvent>>,
    events: Vec<StoredEvent>,
) -> bool {
    match reply.send(events) {
        Ok(()) => true,
        Err(unsent) => {
            if !unsent.is_empty() {
                tracing::warn!(
                    aggregator = name,
                    dropped = unsent.len(),
                    "caller went away; drained events were not delivered"
                );
            }
            false
        }
    }
}

/// Maps each aggregator name to exactly one running actor.
pub struct AggregatorRegistry {
    factory: Arc<dyn StoreFactory>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    handles: Mutex<HashMap<String, AggregatorHandle>>,
}

impl AggregatorRegistry {
    pub fn new(
        factory: Arc<dyn StoreFactory>,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> AggregatorResult<Self> {
        config.validate()?;
        Ok(Self {
            factory,
            clock,
            config,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.factory.backend_name()
    }

    /// Returns the actor for `name`, spawning it and opening its store
    /// namespace on first use.
    pub fn handle(&self, name: &str) -> AggregatorResult<AggregatorHandle> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| AggregatorError::ActorUnavailable(name.to_string()))?;
        if let Some(handle) = handles.get(name) {
            if !handle.sender.is_closed() {
                return Ok(handle.clone());
            }
        }

        let store = self.factory.open(name)?;
        let aggregator = Aggregator::new(name, store, self.clock.clone(), self.config)?;
        let handle = AggregatorHandle::spawn(aggregator)?;
        tracing::debug!(
            aggregator = name,
            backend = self.factory.backend_name(),
            "aggregator actor started"
        );
        handles.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Starts an actor for every namespace the store already holds state
    /// for, so events persisted before a restart are drained again. Returns
    /// the names that were started.
    pub fn restore_persisted(&self) -> AggregatorResult<Vec<String>> {
        let names = self.factory.namespaces()?;
        for name in &names {
            self.handle(name)?;
        }
        if !names.is_empty() {
            tracing::info!(
                aggregators = names.len(),
                backend = self.factory.backend_name(),
                "restored persisted aggregators"
            );
        }
        Ok(names)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = self
            .handles
            .lock()
            .map(|handles| handles.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();
        names
    }
}
