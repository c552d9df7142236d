//! Slack delivery for aggregated pact events: message rendering plus a Web
//! API client with retry handling.

mod client;
mod formatter;
mod retry;

pub use client::{ChatClient, PostedMessage, SlackApiClient, SlackClientConfig};
pub use formatter::{
    group_events, render_group_message, render_thread_reply, status_emoji, EventGroup,
};
pub use retry::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    summarize_error_body, MAX_RETRY_DELAY,
};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
