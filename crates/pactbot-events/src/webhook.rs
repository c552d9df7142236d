//! Normalization of pact broker webhook bodies into `PactEvent`s.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{PactEvent, PublicationEvent, VerificationEvent, VerificationStatus};

/// Errors raised while normalizing a webhook body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookPayloadError {
    #[error("webhook payload is not a JSON object")]
    NotAnObject,
    #[error("webhook payload field '{0}' is missing or empty")]
    MissingField(&'static str),
    #[error("unsupported webhook event name '{0}'")]
    UnsupportedEventName(String),
    #[error("invalid verification status '{0}'")]
    InvalidVerificationStatus(String),
    #[error("invalid webhook payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerWebhookPayload {
    #[serde(default)]
    event_name: Option<String>,
    #[serde(default)]
    provider_name: Option<String>,
    #[serde(default)]
    consumer_name: Option<String>,
    #[serde(default)]
    pact_url: Option<String>,
    #[serde(default)]
    verification_result_url: Option<String>,
    #[serde(default)]
    github_verification_status: Option<String>,
    #[serde(default)]
    provider_version_number: Option<String>,
    #[serde(default)]
    provider_version_branch: Option<String>,
    #[serde(default)]
    consumer_version_number: Option<String>,
    #[serde(default)]
    consumer_version_branch: Option<String>,
    #[serde(default)]
    provider_version_descriptions: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BrokerEventKind {
    Publication,
    Verification(Option<VerificationStatus>),
}

fn classify_event_name(raw: &str) -> Option<BrokerEventKind> {
    match raw.trim() {
        "contract_published"
        | "contract_content_changed"
        | "contract_requiring_verification_published" => Some(BrokerEventKind::Publication),
        "provider_verification_published" => Some(BrokerEventKind::Verification(None)),
        "provider_verification_succeeded" => Some(BrokerEventKind::Verification(Some(
            VerificationStatus::Success,
        ))),
        "provider_verification_failed" => Some(BrokerEventKind::Verification(Some(
            VerificationStatus::Failure,
        ))),
        _ => None,
    }
}

/// Parses a broker webhook body into a normalized event, deriving
/// `pacticipant` and `pacticipant_version_number` once.
pub fn normalize_webhook_payload(value: &Value) -> Result<PactEvent, WebhookPayloadError> {
    if !value.is_object() {
        return Err(WebhookPayloadError::NotAnObject);
    }
    let payload = BrokerWebhookPayload::deserialize(value)
        .map_err(|error| WebhookPayloadError::Malformed(error.to_string()))?;

    let event_name = required(payload.event_name.as_deref(), "eventName")?;
    let kind = classify_event_name(&event_name)
        .ok_or_else(|| WebhookPayloadError::UnsupportedEventName(event_name.clone()))?;

    let provider_name = required(payload.provider_name.as_deref(), "providerName")?;
    let consumer_name = required(payload.consumer_name.as_deref(), "consumerName")?;
    let consumer_version_number = required(
        payload.consumer_version_number.as_deref(),
        "consumerVersionNumber",
    )?;
    let consumer_version_branch = optional(payload.consumer_version_branch.as_deref());

    match kind {
        BrokerEventKind::Publication => {
            let pact_url = required(payload.pact_url.as_deref(), "pactUrl")?;
            Ok(PactEvent::Publication(PublicationEvent {
                provider_name,
                consumer_name: consumer_name.clone(),
                pact_url,
                consumer_version_number: consumer_version_number.clone(),
                consumer_version_branch,
                provider_version_descriptions: parse_descriptions(
                    payload.provider_version_descriptions.as_ref(),
                ),
                pacticipant: consumer_name,
                pacticipant_version_number: consumer_version_number,
            }))
        }
        BrokerEventKind::Verification(implied_status) => {
            let verification_result_url = required(
                payload.verification_result_url.as_deref(),
                "verificationResultUrl",
            )?;
            let provider_version_number = required(
                payload.provider_version_number.as_deref(),
                "providerVersionNumber",
            )?;
            let verification_status =
                match optional(payload.github_verification_status.as_deref()) {
                    Some(raw) => VerificationStatus::parse(&raw)
                        .ok_or(WebhookPayloadError::InvalidVerificationStatus(raw))?,
                    None => implied_status
                        .ok_or(WebhookPayloadError::MissingField("githubVerificationStatus"))?,
                };
            Ok(PactEvent::Verification(VerificationEvent {
                provider_name: provider_name.clone(),
                consumer_name,
                verification_status,
                verification_result_url,
                provider_version_number: provider_version_number.clone(),
                provider_version_branch: optional(payload.provider_version_branch.as_deref()),
                consumer_version_number,
                consumer_version_branch,
                pacticipant: provider_name,
                pacticipant_version_number: provider_version_number,
            }))
        }
    }
}

fn optional(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn required(raw: Option<&str>, field: &'static str) -> Result<String, WebhookPayloadError> {
    optional(raw).ok_or(WebhookPayloadError::MissingField(field))
}

fn parse_descriptions(raw: Option<&Value>) -> Vec<String> {
    match raw {
        Some(Value::String(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
