use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pactbot_aggregator::{AggregatorHandle, AggregatorRegistry};
use pactbot_core::Clock;
use pactbot_slack::ChatClient;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{publish_events, PublishPolicy, PublishReport};

#[derive(Clone)]
pub struct PublishSchedulerConfig {
    pub channel: String,
    /// Spawned up front so it is drained even before its first webhook.
    pub default_aggregator: String,
    pub tick_interval: Duration,
    pub policy: PublishPolicy,
}

/// Running publish loop; dropped handles leave the task running until
/// `shutdown` or runtime exit.
#[derive(Debug)]
pub struct PublishSchedulerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PublishSchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Drains `aggregator` once and publishes whatever came out.
pub async fn run_publish_cycle(
    aggregator: &AggregatorHandle,
    chat: &dyn ChatClient,
    channel: &str,
) -> PublishReport {
    let events = aggregator.get_events_to_publish().await;
    if events.is_empty() {
        return PublishReport::default();
    }
    let report = publish_events(aggregator, chat, channel, events).await;
    tracing::info!(
        aggregator = aggregator.name(),
        events = report.events,
        groups = report.groups,
        channel_messages = report.channel_messages,
        thread_replies = report.thread_replies,
        failures = report.failures,
        "publish cycle completed"
    );
    report
}

/// Drains every aggregator the registry holds, in name order, and sums the
/// per-aggregator reports.
pub async fn run_registry_publish_cycle(
    registry: &AggregatorRegistry,
    chat: &dyn ChatClient,
    channel: &str,
) -> PublishReport {
    let mut total = PublishReport::default();
    for name in registry.names() {
        let handle = match registry.handle(&name) {
            Ok(handle) => handle,
            Err(error) => {
                tracing::warn!(
                    aggregator = %name,
                    error = %error,
                    "skipping aggregator in publish cycle"
                );
                continue;
            }
        };
        total.absorb(&run_publish_cycle(&handle, chat, channel).await);
    }
    total
}

pub fn start_publish_scheduler(
    config: PublishSchedulerConfig,
    registry: Arc<AggregatorRegistry>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
) -> Result<PublishSchedulerHandle> {
    if config.tick_interval.is_zero() {
        anyhow::bail!("publish scheduler tick interval must be greater than zero");
    }
    if config.channel.trim().is_empty() {
        anyhow::bail!("publish scheduler requires a channel");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("publish scheduler requires an active Tokio runtime")?;
    registry
        .handle(&config.default_aggregator)
        .with_context(|| {
            format!(
                "failed to start aggregator '{}'",
                config.default_aggregator
            )
        })?;

    tracing::info!(
        default_aggregator = %config.default_aggregator,
        channel = %config.channel,
        tick_interval_ms = u64::try_from(config.tick_interval.as_millis()).unwrap_or(u64::MAX),
        timezone = %config.policy.timezone(),
        "publish scheduler started"
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = handle.spawn(async move {
        run_publish_loop(config, registry, chat, clock, shutdown_rx).await;
    });
    Ok(PublishSchedulerHandle {
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_publish_loop(
    config: PublishSchedulerConfig,
    registry: Arc<AggregatorRegistry>,
    chat: Arc<dyn ChatClient>,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut last_run_unix_ms = clock.now_unix_ms();
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_unix_ms = clock.now_unix_ms();
                if !config.policy.is_due(last_run_unix_ms, now_unix_ms) {
                    continue;
                }
                last_run_unix_ms = now_unix_ms;
                run_registry_publish_cycle(&registry, chat.as_ref(), &config.channel).await;
            }
            _ = &mut shutdown_rx => {
                tracing::info!("publish scheduler stopped");
                break;
            }
        }
    }
}
