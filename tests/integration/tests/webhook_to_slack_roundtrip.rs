use std::sync::Arc;

use httpmock::prelude::*;
use pactbot_aggregator::{AggregatorConfig, AggregatorRegistry};
use pactbot_core::ManualClock;
use pactbot_gateway::{
    build_gateway_router, sign_sha256_hmac, GatewayConfig, GatewayState, DEBUG_KEY_HEADER,
    SIGNATURE_HEADER,
};
use pactbot_runtime::{run_publish_cycle, run_registry_publish_cycle};
use pactbot_slack::{SlackApiClient, SlackClientConfig};
use pactbot_store::SqliteStoreFactory;
use serde_json::{json, Value};
use tempfile::tempdir;
use tokio::net::TcpListener;

const SECRET: &str = "broker-secret";
const DEBUG_KEY: &str = "ops-key";

fn sqlite_registry(path: &std::path::Path, clock: Arc<ManualClock>) -> Arc<AggregatorRegistry> {
    Arc::new(
        AggregatorRegistry::new(
            Arc::new(SqliteStoreFactory::new(path.join("pactbot.sqlite"))),
            clock,
            AggregatorConfig::default(),
        )
        .expect("registry"),
    )
}

fn publication_body() -> Value {
    json!({
        "eventName": "contract_published",
        "providerName": "billing-api",
        "consumerName": "web-app",
        "pactUrl": "https://broker/pacts/provider/billing-api/consumer/web-app/pact-version/abc",
        "consumerVersionNumber": "1.4.0"
    })
}

fn verification_body() -> Value {
    json!({
        "eventName": "provider_verification_published",
        "providerName": "billing-api",
        "consumerName": "web-app",
        "verificationResultUrl": "https://broker/pacts/provider/billing-api/consumer/web-app/pact-version/abc/verification-results/3",
        "githubVerificationStatus": "failure",
        "providerVersionNumber": "2.0.1",
        "consumerVersionNumber": "1.4.0"
    })
}

async fn spawn_gateway(registry: Arc<AggregatorRegistry>) -> String {
    let config = GatewayConfig {
        bind: "127.0.0.1:0".to_string(),
        default_aggregator: "main".to_string(),
        webhook_secret: Some(SECRET.to_string()),
        debug_key: Some(DEBUG_KEY.to_string()),
    };
    let app = build_gateway_router(Arc::new(GatewayState::new(config, registry)));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve gateway");
    });
    format!("http://{addr}")
}

async fn post_signed(client: &reqwest::Client, url: &str, body: &Value) -> reqwest::StatusCode {
    let bytes = serde_json::to_vec(body).expect("encode");
    let signature = sign_sha256_hmac(&bytes, SECRET).expect("sign");
    client
        .post(url)
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(bytes)
        .send()
        .await
        .expect("webhook request")
        .status()
}

async fn debug_snapshot(client: &reqwest::Client, url: &str) -> Value {
    client
        .get(url)
        .header(DEBUG_KEY_HEADER, DEBUG_KEY)
        .send()
        .await
        .expect("debug request")
        .json::<Value>()
        .await
        .expect("debug json")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_signed_webhooks_flow_through_aggregator_into_slack_thread() {
    let temp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(60_000));
    let registry = sqlite_registry(temp.path(), clock.clone());
    let base = spawn_gateway(registry.clone()).await;
    let webhook_url = format!("{base}/webhooks/pact");
    let debug_url = format!("{base}/debug");
    let http = reqwest::Client::new();

    let unsigned = http
        .post(format!("{base}/webhooks/pact"))
        .header("content-type", "application/json")
        .body(serde_json::to_vec(&publication_body()).expect("encode"))
        .send()
        .await
        .expect("unsigned request");
    assert_eq!(unsigned.status(), reqwest::StatusCode::UNAUTHORIZED);

    assert_eq!(
        post_signed(&http, &webhook_url, &publication_body()).await,
        reqwest::StatusCode::ACCEPTED
    );
    assert_eq!(
        post_signed(&http, &webhook_url, &verification_body()).await,
        reqwest::StatusCode::ACCEPTED
    );

    let snapshot = debug_snapshot(&http, &debug_url).await;
    assert_eq!(snapshot["total_events"], 2);
    assert_eq!(snapshot["bucket_count"], 1);

    let slack = MockServer::start();
    let channel_post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("published a pact for billing-api");
        then.status(200).json_body(json!({
            "ok": true,
            "channel": "C777",
            "ts": "1700.1"
        }));
    });
    let thread_reply = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("\"channel\":\"C777\"")
            .body_includes("\"thread_ts\":\"1700.1\"");
        then.status(200).json_body(json!({
            "ok": true,
            "channel": "C777",
            "ts": "1700.2"
        }));
    });
    let chat = SlackApiClient::new(SlackClientConfig {
        api_base: slack.base_url(),
        bot_token: "xoxb-test".to_string(),
        request_timeout_ms: 2_000,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
    })
    .expect("slack client");

    let handle = registry.handle("main").expect("handle");
    let early = run_publish_cycle(&handle, &chat, "#pacts").await;
    assert!(early.is_empty());
    assert_eq!(channel_post.calls(), 0);

    clock.set(120_000);
    let report = run_publish_cycle(&handle, &chat, "#pacts").await;
    assert_eq!(report.events, 2);
    assert_eq!(report.channel_messages, 1);
    assert_eq!(report.thread_replies, 1);
    assert_eq!(report.failures, 0);
    channel_post.assert_calls(1);
    thread_reply.assert_calls(1);

    let snapshot = debug_snapshot(&http, &debug_url).await;
    assert_eq!(snapshot["total_events"], 0);
    assert_eq!(snapshot["total_processed"], 2);
    assert_eq!(snapshot["last_processed_count"], 2);
    assert_eq!(
        snapshot["publication_threads"]
            .as_object()
            .expect("threads")
            .len(),
        1
    );

    let cleared = http
        .post(format!("{base}/debug/clear"))
        .header(DEBUG_KEY_HEADER, DEBUG_KEY)
        .send()
        .await
        .expect("clear request");
    assert_eq!(cleared.status(), reqwest::StatusCode::OK);
    let snapshot = debug_snapshot(&http, &debug_url).await;
    assert_eq!(snapshot["total_processed"], 0);
    assert!(snapshot["publication_threads"]
        .as_object()
        .expect("threads")
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_named_route_webhook_is_published_and_survives_restart() {
    let temp = tempdir().expect("tempdir");
    let clock = Arc::new(ManualClock::new(60_000));
    let registry = sqlite_registry(temp.path(), clock.clone());
    let base = spawn_gateway(registry.clone()).await;
    let http = reqwest::Client::new();

    assert_eq!(
        post_signed(
            &http,
            &format!("{base}/webhooks/pact/team-a"),
            &verification_body()
        )
        .await,
        reqwest::StatusCode::ACCEPTED
    );
    let snapshot = debug_snapshot(&http, &format!("{base}/debug/team-a")).await;
    assert_eq!(snapshot["total_events"], 1);

    let restarted = sqlite_registry(temp.path(), clock.clone());
    assert_eq!(
        restarted.restore_persisted().expect("restore"),
        vec!["team-a".to_string()]
    );

    let slack = MockServer::start();
    let channel_post = slack.mock(|when, then| {
        when.method(POST)
            .path("/chat.postMessage")
            .body_includes("billing-api `2.0.1`");
        then.status(200).json_body(json!({
            "ok": true,
            "channel": "C777",
            "ts": "1800.1"
        }));
    });
    let chat = SlackApiClient::new(SlackClientConfig {
        api_base: slack.base_url(),
        bot_token: "xoxb-test".to_string(),
        request_timeout_ms: 2_000,
        retry_max_attempts: 1,
        retry_base_delay_ms: 1,
    })
    .expect("slack client");

    clock.set(120_000);
    let report = run_registry_publish_cycle(&restarted, &chat, "#pacts").await;
    assert_eq!(report.events, 1);
    assert_eq!(report.channel_messages, 1);
    assert_eq!(report.failures, 0);
    channel_post.assert_calls(1);

    let info = restarted
        .handle("team-a")
        .expect("handle")
        .get_debug_info()
        .await
        .expect("debug");
    assert_eq!(info.total_events, 0);
    assert_eq!(info.total_processed, 1);
}
