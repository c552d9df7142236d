use std::sync::Arc;

use clap::Parser;
use pactbot_aggregator::{PactEvent, DEFAULT_QUIET_PERIOD_MS};
use pactbot_core::ManualClock;
use pactbot_events::normalize_webhook_payload;
use serde_json::{json, Value};
use tempfile::tempdir;

use crate::cli_args::Cli;
use crate::startup::{
    aggregator_config_from_cli, build_chat_client, build_registry, build_store_factory,
    clear_state, inspect_state, publish_policy_config_from_cli,
};

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["pactbot"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).expect("parse cli")
}

fn publication() -> PactEvent {
    normalize_webhook_payload(&json!({
        "eventName": "contract_published",
        "providerName": "billing-api",
        "consumerName": "web-app",
        "pactUrl": "https://broker/pacts/provider/billing-api/consumer/web-app/pact-version/abc",
        "consumerVersionNumber": "1.4.0"
    }))
    .expect("event")
}

#[test]
fn unit_cli_defaults_match_aggregator_defaults() {
    let cli = parse(&[]);
    assert_eq!(cli.bind, "127.0.0.1:8787");
    assert_eq!(cli.aggregator, "main");
    let config = aggregator_config_from_cli(&cli);
    assert_eq!(config.minute_bucket_ms, 60_000);
    assert_eq!(config.quiet_period_ms, DEFAULT_QUIET_PERIOD_MS);
    assert_eq!(config.max_time_before_flushing_ms, 300_000);
    let policy = publish_policy_config_from_cli(&cli);
    assert_eq!(policy.business_hours_cron, "0 * 9-17 * * Mon-Fri");
    assert_eq!(policy.timezone, "UTC");
    assert!(!cli.inspect_state);
    assert!(!cli.clear_state);
}

#[test]
fn regression_cli_rejects_zero_bucket_width_and_conflicting_modes() {
    let mut argv = vec!["pactbot", "--minute-bucket-ms", "0"];
    assert!(Cli::try_parse_from(&argv).is_err());

    argv = vec!["pactbot", "--inspect-state", "--clear-state"];
    assert!(Cli::try_parse_from(&argv).is_err());

    argv = vec!["pactbot", "--state-db", "a.sqlite", "--state-dir", "state"];
    assert!(Cli::try_parse_from(&argv).is_err());
}

#[test]
fn unit_store_factory_follows_state_flags() {
    assert_eq!(build_store_factory(&parse(&[])).backend_name(), "memory");
    assert_eq!(
        build_store_factory(&parse(&["--state-db", "state.sqlite"])).backend_name(),
        "sqlite"
    );
    assert_eq!(
        build_store_factory(&parse(&["--state-dir", "state"])).backend_name(),
        "json_file"
    );
}

#[test]
fn regression_chat_client_requires_token_and_channel_together() {
    assert!(build_chat_client(&parse(&[])).expect("disabled").is_none());
    assert!(build_chat_client(&parse(&["--slack-bot-token", "xoxb-1"])).is_err());
    assert!(build_chat_client(&parse(&["--slack-channel", "#pacts"])).is_err());
    let (_, channel) = build_chat_client(&parse(&[
        "--slack-bot-token",
        "xoxb-1",
        "--slack-channel",
        "#pacts",
    ]))
    .expect("client")
    .expect("enabled");
    assert_eq!(channel, "#pacts");
}

#[tokio::test]
async fn integration_inspect_and_clear_state_against_sqlite() {
    let temp = tempdir().expect("tempdir");
    let db = temp.path().join("pactbot.sqlite");
    let db_arg = db.display().to_string();
    let cli = parse(&["--state-db", &db_arg, "--aggregator", "team-a"]);

    let registry = build_registry(&cli, Arc::new(ManualClock::new(60_000))).expect("registry");
    registry
        .handle("team-a")
        .expect("handle")
        .add_event(publication())
        .await;

    let reopened = build_registry(&cli, Arc::new(ManualClock::new(61_000))).expect("registry");
    let rendered = inspect_state(&reopened, "team-a").await.expect("inspect");
    let snapshot: Value = serde_json::from_str(&rendered).expect("json");
    assert_eq!(snapshot["name"], "team-a");
    assert_eq!(snapshot["total_events"], 1);

    clear_state(&reopened, "team-a").await.expect("clear");
    let rendered = inspect_state(&reopened, "team-a").await.expect("inspect");
    let snapshot: Value = serde_json::from_str(&rendered).expect("json");
    assert_eq!(snapshot["total_events"], 0);
    assert_eq!(snapshot["bucket_count"], 0);
}
