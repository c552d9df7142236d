//! Pact broker event model shared by ingress, aggregation and publishing.
//!
//! Defines the normalized `PactEvent` union, the `StoredEvent` envelope the
//! aggregator persists, the publication-thread correlation key, and the
//! webhook payload normalizer.

use std::fmt;

use serde::{Deserialize, Serialize};

mod thread_key;
mod webhook;

pub use thread_key::{extract_pact_version, ThreadKey};
pub use webhook::{normalize_webhook_payload, WebhookPayloadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Outcome reported by a provider verification.
pub enum VerificationStatus {
    Success,
    Failure,
    Pending,
    Error,
}

impl VerificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "success" | "succeeded" | "true" => Some(Self::Success),
            "failure" | "failed" | "false" => Some(Self::Failure),
            "pending" => Some(Self::Pending),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A provider published verification results for a pact.
pub struct VerificationEvent {
    pub provider_name: String,
    pub consumer_name: String,
    pub verification_status: VerificationStatus,
    pub verification_result_url: String,
    pub provider_version_number: String,
    #[serde(default)]
    pub provider_version_branch: Option<String>,
    pub consumer_version_number: String,
    #[serde(default)]
    pub consumer_version_branch: Option<String>,
    pub pacticipant: String,
    pub pacticipant_version_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A consumer published (or changed) a pact.
pub struct PublicationEvent {
    pub provider_name: String,
    pub consumer_name: String,
    pub pact_url: String,
    pub consumer_version_number: String,
    #[serde(default)]
    pub consumer_version_branch: Option<String>,
    #[serde(default)]
    pub provider_version_descriptions: Vec<String>,
    pub pacticipant: String,
    pub pacticipant_version_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// Normalized broker event. Immutable once created.
pub enum PactEvent {
    Verification(VerificationEvent),
    Publication(PublicationEvent),
}

impl PactEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Verification(_) => "verification",
            Self::Publication(_) => "publication",
        }
    }

    /// Party responsible for the event: provider for verifications, consumer
    /// for publications.
    pub fn pacticipant(&self) -> &str {
        match self {
            Self::Verification(event) => &event.pacticipant,
            Self::Publication(event) => &event.pacticipant,
        }
    }

    pub fn pacticipant_version_number(&self) -> &str {
        match self {
            Self::Verification(event) => &event.pacticipant_version_number,
            Self::Publication(event) => &event.pacticipant_version_number,
        }
    }

    pub fn provider_name(&self) -> &str {
        match self {
            Self::Verification(event) => &event.provider_name,
            Self::Publication(event) => &event.provider_name,
        }
    }

    pub fn consumer_name(&self) -> &str {
        match self {
            Self::Verification(event) => &event.consumer_name,
            Self::Publication(event) => &event.consumer_name,
        }
    }

    pub fn consumer_version_branch(&self) -> Option<&str> {
        match self {
            Self::Verification(event) => event.consumer_version_branch.as_deref(),
            Self::Publication(event) => event.consumer_version_branch.as_deref(),
        }
    }

    /// URL carrying the `/pact-version/<sha>` segment used for thread correlation.
    pub fn correlation_url(&self) -> &str {
        match self {
            Self::Verification(event) => &event.verification_result_url,
            Self::Publication(event) => &event.pact_url,
        }
    }

    pub fn as_verification(&self) -> Option<&VerificationEvent> {
        match self {
            Self::Verification(event) => Some(event),
            Self::Publication(_) => None,
        }
    }

    pub fn as_publication(&self) -> Option<&PublicationEvent> {
        match self {
            Self::Publication(event) => Some(event),
            Self::Verification(_) => None,
        }
    }

    /// Grouping key handed to the formatter: `{pacticipant}:{version}`.
    pub fn group_key(&self) -> String {
        format!(
            "{}:{}",
            self.pacticipant(),
            self.pacticipant_version_number()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Identifier assigned to an event when the aggregator accepts it.
pub struct EventId(String);

impl EventId {
    pub fn new(ts: u64, sequence: u64) -> Self {
        Self(format!("evt-{ts}-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// An accepted event plus its ingestion timestamp.
pub struct StoredEvent {
    pub id: EventId,
    pub ts: u64,
    pub event: PactEvent,
}

impl StoredEvent {
    pub fn pacticipant_version_number(&self) -> &str {
        self.event.pacticipant_version_number()
    }

    pub fn age_ms(&self, now_unix_ms: u64) -> u64 {
        now_unix_ms.saturating_sub(self.ts)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    pub(crate) fn sample_verification(version: &str) -> PactEvent {
        PactEvent::Verification(VerificationEvent {
            provider_name: "billing-api".to_string(),
            consumer_name: "web-app".to_string(),
            verification_status: VerificationStatus::Success,
            verification_result_url: "https://broker.example/pacts/provider/billing-api/consumer/web-app/pact-version/abc123/verification-results/7".to_string(),
            provider_version_number: version.to_string(),
            provider_version_branch: Some("main".to_string()),
            consumer_version_number: "c-1".to_string(),
            consumer_version_branch: Some("feature-x".to_string()),
            pacticipant: "billing-api".to_string(),
            pacticipant_version_number: version.to_string(),
        })
    }

    #[test]
    fn unit_pacticipant_accessors_follow_event_kind() {
        let event = sample_verification("p-9");
        assert_eq!(event.kind(), "verification");
        assert_eq!(event.pacticipant(), "billing-api");
        assert_eq!(event.pacticipant_version_number(), "p-9");
        assert_eq!(event.group_key(), "billing-api:p-9");
        assert_eq!(event.consumer_version_branch(), Some("feature-x"));
        assert!(event.as_publication().is_none());
    }

    #[test]
    fn unit_stored_event_serializes_with_kind_tag() {
        let stored = StoredEvent {
            id: EventId::new(60_000, 1),
            ts: 60_000,
            event: sample_verification("p-1"),
        };
        let value = serde_json::to_value(&stored).expect("serialize");
        assert_eq!(value["id"], json!("evt-60000-1"));
        assert_eq!(value["event"]["kind"], json!("verification"));
        assert_eq!(value["event"]["verification_status"], json!("success"));

        let decoded: StoredEvent = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded, stored);
    }

    #[test]
    fn unit_verification_status_parse_accepts_broker_vocabulary() {
        assert_eq!(
            VerificationStatus::parse(" Success "),
            Some(VerificationStatus::Success)
        );
        assert_eq!(
            VerificationStatus::parse("failed"),
            Some(VerificationStatus::Failure)
        );
        assert_eq!(VerificationStatus::parse("bogus"), None);
    }

    #[test]
    fn unit_stored_event_age_saturates() {
        let stored = StoredEvent {
            id: EventId::new(5_000, 1),
            ts: 5_000,
            event: sample_verification("p-1"),
        };
        assert_eq!(stored.age_ms(7_500), 2_500);
        assert_eq!(stored.age_ms(1_000), 0);
    }
}
