use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use pactbot_aggregator::{AggregatorConfig, AggregatorRegistry};
use pactbot_core::{Clock, SystemClock};
use pactbot_gateway::{run_gateway_server, GatewayConfig};
use pactbot_runtime::{
    start_publish_scheduler, PublishPolicy, PublishPolicyConfig, PublishSchedulerConfig,
    PublishSchedulerHandle,
};
use pactbot_slack::{ChatClient, SlackApiClient, SlackClientConfig};
use pactbot_store::{InMemoryStoreFactory, JsonFileStoreFactory, SqliteStoreFactory, StoreFactory};

use crate::cli_args::Cli;

pub(crate) fn aggregator_config_from_cli(cli: &Cli) -> AggregatorConfig {
    AggregatorConfig {
        minute_bucket_ms: cli.minute_bucket_ms,
        quiet_period_ms: cli.quiet_period_ms,
        max_time_before_flushing_ms: cli.max_time_before_flushing_ms,
    }
}

pub(crate) fn publish_policy_config_from_cli(cli: &Cli) -> PublishPolicyConfig {
    PublishPolicyConfig {
        business_hours_cron: cli.business_hours_cron.clone(),
        off_hours_cron: cli.off_hours_cron.clone(),
        weekend_cron: cli.weekend_cron.clone(),
        timezone: cli.publish_timezone.clone(),
    }
}

pub(crate) fn build_store_factory(cli: &Cli) -> Arc<dyn StoreFactory> {
    if let Some(path) = &cli.state_db {
        return Arc::new(SqliteStoreFactory::new(path));
    }
    if let Some(dir) = &cli.state_dir {
        return Arc::new(JsonFileStoreFactory::new(dir));
    }
    Arc::new(InMemoryStoreFactory::new())
}

pub(crate) fn build_registry(cli: &Cli, clock: Arc<dyn Clock>) -> Result<Arc<AggregatorRegistry>> {
    let registry = AggregatorRegistry::new(
        build_store_factory(cli),
        clock,
        aggregator_config_from_cli(cli),
    )
    .context("invalid aggregator configuration")?;
    Ok(Arc::new(registry))
}

/// Renders the debug snapshot of `name` as pretty JSON.
pub(crate) async fn inspect_state(registry: &AggregatorRegistry, name: &str) -> Result<String> {
    let snapshot = registry
        .handle(name)?
        .get_debug_info()
        .await
        .with_context(|| format!("failed to load state for aggregator '{name}'"))?;
    serde_json::to_string_pretty(&snapshot).context("failed to render aggregator snapshot")
}

pub(crate) async fn clear_state(registry: &AggregatorRegistry, name: &str) -> Result<()> {
    registry
        .handle(name)?
        .clear_all()
        .await
        .with_context(|| format!("failed to clear state for aggregator '{name}'"))
}

/// Builds the Slack client when both a token and a channel are configured.
pub(crate) fn build_chat_client(cli: &Cli) -> Result<Option<(Arc<dyn ChatClient>, String)>> {
    let token = cli
        .slack_bot_token
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let channel = cli
        .slack_channel
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let (token, channel) = match (token, channel) {
        (Some(token), Some(channel)) => (token, channel),
        (None, None) => return Ok(None),
        (Some(_), None) => bail!("--slack-bot-token requires --slack-channel"),
        (None, Some(_)) => bail!("--slack-channel requires --slack-bot-token"),
    };
    let client = SlackApiClient::new(SlackClientConfig {
        api_base: cli.slack_api_base.clone(),
        bot_token: token.to_string(),
        request_timeout_ms: cli.slack_request_timeout_ms,
        retry_max_attempts: cli.slack_retry_max_attempts,
        retry_base_delay_ms: cli.slack_retry_base_delay_ms,
    })?;
    let chat: Arc<dyn ChatClient> = Arc::new(client);
    Ok(Some((chat, channel.to_string())))
}

fn start_publishing(
    cli: &Cli,
    registry: &Arc<AggregatorRegistry>,
    clock: Arc<dyn Clock>,
) -> Result<Option<PublishSchedulerHandle>> {
    let Some((chat, channel)) = build_chat_client(cli)? else {
        tracing::warn!("slack publishing disabled: no bot token or channel configured");
        return Ok(None);
    };
    let policy = PublishPolicy::from_config(&publish_policy_config_from_cli(cli))?;
    let scheduler = start_publish_scheduler(
        PublishSchedulerConfig {
            channel,
            tick_interval: Duration::from_millis(cli.publish_tick_ms),
            policy,
            default_aggregator: cli.aggregator.clone(),
        },
        Arc::clone(registry),
        chat,
        clock,
    )?;
    Ok(Some(scheduler))
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = build_registry(&cli, clock.clone())?;

    if cli.inspect_state || cli.clear_state {
        if cli.state_db.is_none() && cli.state_dir.is_none() {
            bail!("--inspect-state and --clear-state require --state-db or --state-dir");
        }
        if cli.inspect_state {
            println!("{}", inspect_state(&registry, &cli.aggregator).await?);
        } else {
            clear_state(&registry, &cli.aggregator).await?;
            println!("cleared aggregator state: aggregator={}", cli.aggregator);
        }
        return Ok(());
    }

    tracing::info!(
        backend = registry.backend_name(),
        aggregator = %cli.aggregator,
        "starting pactbot"
    );
    registry
        .restore_persisted()
        .context("failed to restore persisted aggregators")?;
    let mut scheduler = start_publishing(&cli, &registry, clock)?;

    let gateway_config = GatewayConfig {
        bind: cli.bind.clone(),
        default_aggregator: cli.aggregator.clone(),
        webhook_secret: cli.webhook_secret.clone(),
        debug_key: cli.debug_key.clone(),
    };
    let serve_result = run_gateway_server(gateway_config, registry, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    if let Some(scheduler) = scheduler.as_mut() {
        scheduler.shutdown().await;
    }
    serve_result
}
