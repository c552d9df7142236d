//! Backoff and error summaries for Slack Web API calls.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

/// Upper bound for any single wait, including server-provided hints.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const ERROR_BODY_MAX_CHARS: usize = 800;

/// Slack rate limits answer 429 with `Retry-After` in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Wait before retry `attempt` (1-based). A `Retry-After` hint is honoured
/// within `[base, MAX_RETRY_DELAY]`; otherwise the base delay doubles per
/// attempt up to the same cap.
pub fn retry_delay(base_delay_ms: u64, attempt: usize, retry_after: Option<Duration>) -> Duration {
    let base = Duration::from_millis(base_delay_ms);
    let delay = match retry_after {
        Some(hint) => hint.max(base),
        None => {
            let doublings = u32::try_from(attempt.saturating_sub(1))
                .unwrap_or(u32::MAX)
                .min(16);
            base.saturating_mul(1_u32 << doublings)
        }
    };
    delay.min(MAX_RETRY_DELAY)
}

pub fn is_retryable_slack_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// Only failures where the request may not have reached Slack are retried,
/// so a timed-out post can at worst duplicate a message.
pub fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Short description of a failed response body: Slack's `error` code when the
/// body is a Web API envelope, otherwise the leading text.
pub fn summarize_error_body(body: &str) -> String {
    if let Ok(Value::Object(envelope)) = serde_json::from_str::<Value>(body) {
        if let Some(code) = envelope.get("error").and_then(Value::as_str) {
            return code.to_string();
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(ERROR_BODY_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
