//! Delivers drained events: thread replies for verifications of known
//! publications, one channel message per remaining group.

use std::collections::BTreeMap;

use pactbot_aggregator::{AggregatorHandle, ThreadInfo};
use pactbot_events::{StoredEvent, ThreadKey};
use pactbot_slack::{group_events, render_group_message, render_thread_reply, ChatClient, EventGroup};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Counters for one publish pass.
pub struct PublishReport {
    pub events: usize,
    pub groups: usize,
    pub channel_messages: usize,
    pub thread_replies: usize,
    pub threads_recorded: usize,
    pub failures: usize,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    pub fn absorb(&mut self, other: &PublishReport) {
        self.events = self.events.saturating_add(other.events);
        self.groups = self.groups.saturating_add(other.groups);
        self.channel_messages = self.channel_messages.saturating_add(other.channel_messages);
        self.thread_replies = self.thread_replies.saturating_add(other.thread_replies);
        self.threads_recorded = self.threads_recorded.saturating_add(other.threads_recorded);
        self.failures = self.failures.saturating_add(other.failures);
    }
}

struct ThreadTarget {
    info: ThreadInfo,
    events: Vec<StoredEvent>,
}

/// Publishes `events` to `channel`. Chat failures are counted and logged;
/// failed events are not re-queued.
pub async fn publish_events(
    handle: &AggregatorHandle,
    chat: &dyn ChatClient,
    channel: &str,
    events: Vec<StoredEvent>,
) -> PublishReport {
    let mut report = PublishReport {
        events: events.len(),
        ..PublishReport::default()
    };
    let groups = group_events(&events);
    report.groups = groups.len();

    for group in groups {
        let (threads, remaining) = route_group(handle, channel, group.events).await;

        for (key, target) in threads {
            let reply = render_thread_reply(&target.events.iter().collect::<Vec<_>>());
            let reply_channel = target.info.channel_id.as_deref().unwrap_or(channel);
            match chat
                .post_message(reply_channel, &reply, Some(&target.info.ts))
                .await
            {
                Ok(_) => report.thread_replies = report.thread_replies.saturating_add(1),
                Err(error) => {
                    report.failures = report.failures.saturating_add(1);
                    tracing::warn!(
                        aggregator = handle.name(),
                        thread_key = %key,
                        error = %error,
                        "thread reply failed"
                    );
                }
            }
        }

        if remaining.is_empty() {
            continue;
        }
        let group = EventGroup {
            events: remaining,
            ..group
        };
        let message = render_group_message(&group);
        let posted = match chat.post_message(channel, &message, None).await {
            Ok(posted) => posted,
            Err(error) => {
                report.failures = report.failures.saturating_add(1);
                tracing::warn!(
                    aggregator = handle.name(),
                    group = %group.key,
                    events = group.events.len(),
                    error = %error,
                    "channel message failed"
                );
                continue;
            }
        };
        report.channel_messages = report.channel_messages.saturating_add(1);

        for stored in &group.events {
            if stored.event.as_publication().is_none() {
                continue;
            }
            let Some(key) = ThreadKey::for_event(&stored.event, channel) else {
                continue;
            };
            match handle
                .set_thread_info(
                    key.clone(),
                    posted.ts.clone(),
                    Some(posted.channel.clone()),
                    stored.event.clone(),
                )
                .await
            {
                Ok(()) => report.threads_recorded = report.threads_recorded.saturating_add(1),
                Err(error) => tracing::warn!(
                    aggregator = handle.name(),
                    thread_key = %key,
                    error = %error,
                    "failed to record publication thread"
                ),
            }
        }
    }

    report
}

/// Splits a group into per-thread verification replies and the events that
/// still need a channel message.
async fn route_group(
    handle: &AggregatorHandle,
    channel: &str,
    events: Vec<StoredEvent>,
) -> (BTreeMap<String, ThreadTarget>, Vec<StoredEvent>) {
    let mut threads: BTreeMap<String, ThreadTarget> = BTreeMap::new();
    let mut remaining = Vec::new();
    for stored in events {
        let key = stored
            .event
            .as_verification()
            .and_then(|_| ThreadKey::for_event(&stored.event, channel));
        let Some(key) = key else {
            remaining.push(stored);
            continue;
        };
        let rendered = key.to_string();
        if let Some(target) = threads.get_mut(&rendered) {
            target.events.push(stored);
            continue;
        }
        match handle.get_thread_info(&key).await {
            Ok(Some(info)) => {
                threads.insert(
                    rendered,
                    ThreadTarget {
                        info,
                        events: vec![stored],
                    },
                );
            }
            Ok(None) => remaining.push(stored),
            Err(error) => {
                tracing::warn!(
                    aggregator = handle.name(),
                    thread_key = %rendered,
                    error = %error,
                    "thread lookup failed; posting to channel"
                );
                remaining.push(stored);
            }
        }
    }
    (threads, remaining)
}
