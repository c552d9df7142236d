use std::path::PathBuf;

use clap::{ArgAction, Parser};
use pactbot_aggregator::{
    DEFAULT_AGGREGATOR_NAME, DEFAULT_MAX_TIME_BEFORE_FLUSHING_MS, DEFAULT_MINUTE_BUCKET_MS,
    DEFAULT_QUIET_PERIOD_MS,
};
use pactbot_runtime::{
    DEFAULT_BUSINESS_HOURS_CRON, DEFAULT_OFF_HOURS_CRON, DEFAULT_POLICY_TIMEZONE,
    DEFAULT_WEEKEND_CRON,
};
use pactbot_slack::DEFAULT_SLACK_API_BASE;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "pactbot",
    about = "Aggregates pact broker webhooks and publishes batched Slack notifications",
    version
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "PACTBOT_BIND",
        default_value = "127.0.0.1:8787",
        help = "Socket address the webhook gateway binds to."
    )]
    pub(crate) bind: String,

    #[arg(
        long = "state-db",
        env = "PACTBOT_STATE_DB",
        conflicts_with = "state_dir",
        help = "SQLite database holding aggregator state."
    )]
    pub(crate) state_db: Option<PathBuf>,

    #[arg(
        long = "state-dir",
        env = "PACTBOT_STATE_DIR",
        help = "Directory of per-aggregator JSON state files. State is in-memory when neither --state-db nor --state-dir is set."
    )]
    pub(crate) state_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "PACTBOT_AGGREGATOR",
        default_value = DEFAULT_AGGREGATOR_NAME,
        help = "Aggregator instance used for unnamed webhook and debug routes and for publishing."
    )]
    pub(crate) aggregator: String,

    #[arg(
        long = "minute-bucket-ms",
        env = "PACTBOT_MINUTE_BUCKET_MS",
        default_value_t = DEFAULT_MINUTE_BUCKET_MS,
        value_parser = parse_positive_u64
    )]
    pub(crate) minute_bucket_ms: u64,

    #[arg(
        long = "quiet-period-ms",
        env = "PACTBOT_QUIET_PERIOD_MS",
        default_value_t = DEFAULT_QUIET_PERIOD_MS,
        help = "Previous-bucket events newer than this still count as recent for consolidation."
    )]
    pub(crate) quiet_period_ms: u64,

    #[arg(
        long = "max-time-before-flushing-ms",
        env = "PACTBOT_MAX_TIME_BEFORE_FLUSHING_MS",
        default_value_t = DEFAULT_MAX_TIME_BEFORE_FLUSHING_MS,
        help = "Events at least this old are never held back by consolidation."
    )]
    pub(crate) max_time_before_flushing_ms: u64,

    #[arg(
        long = "slack-api-base",
        env = "PACTBOT_SLACK_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE
    )]
    pub(crate) slack_api_base: String,

    #[arg(
        long = "slack-bot-token",
        env = "PACTBOT_SLACK_BOT_TOKEN",
        hide_env_values = true,
        help = "Bot token used for chat.postMessage. Publishing is disabled without it."
    )]
    pub(crate) slack_bot_token: Option<String>,

    #[arg(long = "slack-channel", env = "PACTBOT_SLACK_CHANNEL")]
    pub(crate) slack_channel: Option<String>,

    #[arg(
        long = "slack-request-timeout-ms",
        env = "PACTBOT_SLACK_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64
    )]
    pub(crate) slack_request_timeout_ms: u64,

    #[arg(
        long = "slack-retry-max-attempts",
        env = "PACTBOT_SLACK_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize
    )]
    pub(crate) slack_retry_max_attempts: usize,

    #[arg(
        long = "slack-retry-base-delay-ms",
        env = "PACTBOT_SLACK_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64
    )]
    pub(crate) slack_retry_base_delay_ms: u64,

    #[arg(
        long = "business-hours-cron",
        env = "PACTBOT_BUSINESS_HOURS_CRON",
        default_value = DEFAULT_BUSINESS_HOURS_CRON
    )]
    pub(crate) business_hours_cron: String,

    #[arg(
        long = "off-hours-cron",
        env = "PACTBOT_OFF_HOURS_CRON",
        default_value = DEFAULT_OFF_HOURS_CRON
    )]
    pub(crate) off_hours_cron: String,

    #[arg(
        long = "weekend-cron",
        env = "PACTBOT_WEEKEND_CRON",
        default_value = DEFAULT_WEEKEND_CRON
    )]
    pub(crate) weekend_cron: String,

    #[arg(
        long = "publish-timezone",
        env = "PACTBOT_PUBLISH_TIMEZONE",
        default_value = DEFAULT_POLICY_TIMEZONE
    )]
    pub(crate) publish_timezone: String,

    #[arg(
        long = "publish-tick-ms",
        env = "PACTBOT_PUBLISH_TICK_MS",
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "How often the scheduler checks whether a publish cycle is due."
    )]
    pub(crate) publish_tick_ms: u64,

    #[arg(
        long = "debug-key",
        env = "PACTBOT_DEBUG_KEY",
        hide_env_values = true,
        help = "Enables the /debug routes, which then require this key."
    )]
    pub(crate) debug_key: Option<String>,

    #[arg(
        long = "webhook-secret",
        env = "PACTBOT_WEBHOOK_SECRET",
        hide_env_values = true,
        help = "Requires webhooks to carry an x-pactbot-signature HMAC-SHA256 header."
    )]
    pub(crate) webhook_secret: Option<String>,

    #[arg(
        long = "inspect-state",
        action = ArgAction::SetTrue,
        conflicts_with = "clear_state",
        help = "Print the aggregator debug snapshot as JSON and exit."
    )]
    pub(crate) inspect_state: bool,

    #[arg(
        long = "clear-state",
        action = ArgAction::SetTrue,
        help = "Wipe all persisted aggregator state and exit."
    )]
    pub(crate) clear_state: bool,
}
