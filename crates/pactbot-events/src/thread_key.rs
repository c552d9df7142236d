use std::fmt;

use crate::PactEvent;

const PACT_VERSION_SEGMENT: &str = "/pact-version/";
const THREAD_KEY_SEPARATOR: char = '|';

/// Correlates a publication message with later verification results.
///
/// Rendered as `{provider}|{consumer}|{consumer_branch}|{pact_version}|{channel}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub provider_name: String,
    pub consumer_name: String,
    pub consumer_version_branch: String,
    pub pact_version: String,
    pub channel: String,
}

impl ThreadKey {
    /// Derives the key for `event` posted to `channel`. Returns `None` when the
    /// event URL carries no pact version.
    pub fn for_event(event: &PactEvent, channel: &str) -> Option<Self> {
        let pact_version = extract_pact_version(event.correlation_url())?;
        Some(Self {
            provider_name: event.provider_name().to_string(),
            consumer_name: event.consumer_name().to_string(),
            consumer_version_branch: event.consumer_version_branch().unwrap_or("").to_string(),
            pact_version,
            channel: channel.to_string(),
        })
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let parts = raw.split(THREAD_KEY_SEPARATOR).collect::<Vec<_>>();
        let [provider, consumer, branch, pact_version, channel] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            provider_name: provider.to_string(),
            consumer_name: consumer.to_string(),
            consumer_version_branch: branch.to_string(),
            pact_version: pact_version.to_string(),
            channel: channel.to_string(),
        })
    }

    /// True when both keys address the same provider/consumer/branch/channel,
    /// regardless of pact version.
    pub fn same_lineage(&self, other: &Self) -> bool {
        self.provider_name == other.provider_name
            && self.consumer_name == other.consumer_name
            && self.consumer_version_branch == other.consumer_version_branch
            && self.channel == other.channel
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.provider_name,
            self.consumer_name,
            self.consumer_version_branch,
            self.pact_version,
            self.channel
        )
    }
}

/// Extracts `<value>` from a `/pact-version/<value>` URL path segment.
pub fn extract_pact_version(url: &str) -> Option<String> {
    let start = url.find(PACT_VERSION_SEGMENT)? + PACT_VERSION_SEGMENT.len();
    let rest = &url[start..];
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
