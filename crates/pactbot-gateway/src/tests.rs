use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use pactbot_aggregator::{AggregatorConfig, AggregatorRegistry};
use pactbot_core::ManualClock;
use pactbot_store::InMemoryStoreFactory;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::*;

const SECRET: &str = "broker-secret";
const DEBUG_KEY: &str = "let-me-in";

struct Harness {
    app: Router,
    registry: Arc<AggregatorRegistry>,
}

fn harness(webhook_secret: Option<&str>, debug_key: Option<&str>) -> Harness {
    let registry = Arc::new(
        AggregatorRegistry::new(
            Arc::new(InMemoryStoreFactory::default()),
            Arc::new(ManualClock::new(60_000)),
            AggregatorConfig::default(),
        )
        .expect("registry"),
    );
    let config = GatewayConfig {
        bind: "127.0.0.1:0".to_string(),
        default_aggregator: "main".to_string(),
        webhook_secret: webhook_secret.map(str::to_string),
        debug_key: debug_key.map(str::to_string),
    };
    let app = build_gateway_router(Arc::new(GatewayState::new(config, registry.clone())));
    Harness { app, registry }
}

fn verification_body() -> Value {
    json!({
        "eventName": "provider_verification_published",
        "providerName": "billing-api",
        "consumerName": "web-app",
        "verificationResultUrl": "https://broker/pacts/provider/billing-api/consumer/web-app/pact-version/abc/verification-results/3",
        "githubVerificationStatus": "success",
        "providerVersionNumber": "2.0.1",
        "consumerVersionNumber": "1.4.0"
    })
}

fn post_json(uri: &str, body: &[u8], signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body.to_vec())).expect("request")
}

fn get(uri: &str, debug_key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = debug_key {
        builder = builder.header(DEBUG_KEY_HEADER, key);
    }
    builder.body(Body::empty()).expect("request")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}

async fn total_events(registry: &AggregatorRegistry, name: &str) -> usize {
    registry
        .handle(name)
        .expect("handle")
        .get_debug_info()
        .await
        .expect("debug")
        .total_events
}

#[test]
fn unit_signature_round_trips_and_rejects_tampering() {
    let signature = sign_sha256_hmac(b"payload", SECRET).expect("sign");
    assert!(signature.starts_with("sha256="));
    verify_sha256_hmac_signature(b"payload", &signature, SECRET).expect("valid");
    assert!(verify_sha256_hmac_signature(b"payload!", &signature, SECRET).is_err());
    assert!(verify_sha256_hmac_signature(b"payload", "md5=00", SECRET).is_err());
    assert!(decode_hex("abc").is_err());
    assert_eq!(decode_hex("0aff").expect("hex"), vec![0x0a, 0xff]);
}

#[test]
fn unit_debug_key_comparison_matches_only_exact_key() {
    assert!(debug_key_matches("ops-key", "ops-key"));
    assert!(!debug_key_matches("ops-kez", "ops-key"));
    assert!(!debug_key_matches("ops", "ops-key"));
    assert!(!debug_key_matches("ops-key-extra", "ops-key"));
    assert!(!debug_key_matches("", "ops-key"));
}

#[tokio::test]
async fn functional_health_reports_ok() {
    let harness = harness(None, None);
    let (status, body) = send(&harness.app, get(HEALTH_ENDPOINT, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn functional_webhook_accepts_event_into_default_aggregator() {
    let harness = harness(None, None);
    let body = serde_json::to_vec(&verification_body()).expect("encode");
    let (status, response) = send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(response["status"], "accepted");
    assert_eq!(response["kind"], "verification");
    assert_eq!(response["aggregator"], "main");
    assert_eq!(total_events(&harness.registry, "main").await, 1);
}

#[tokio::test]
async fn functional_named_webhook_routes_to_named_aggregator() {
    let harness = harness(None, None);
    let body = serde_json::to_vec(&verification_body()).expect("encode");
    let (status, _) = send(
        &harness.app,
        post_json("/webhooks/pact/team-a", &body, None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(total_events(&harness.registry, "team-a").await, 1);
    assert_eq!(total_events(&harness.registry, "main").await, 0);
}

#[tokio::test]
async fn regression_webhook_rejects_malformed_json_and_payloads() {
    let harness = harness(None, None);
    let (status, body) = send(&harness.app, post_json(WEBHOOK_ENDPOINT, b"{not json", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "malformed_json");

    let unsupported = serde_json::to_vec(&json!({"eventName": "contract_deleted"})).expect("encode");
    let (status, body) = send(&harness.app, post_json(WEBHOOK_ENDPOINT, &unsupported, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_payload");
    assert_eq!(total_events(&harness.registry, "main").await, 0);
}

#[tokio::test]
async fn regression_webhook_rejects_invalid_aggregator_name() {
    let harness = harness(None, None);
    let body = serde_json::to_vec(&verification_body()).expect("encode");
    let (status, response) = send(
        &harness.app,
        post_json("/webhooks/pact/bad%20name", &body, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"]["code"], "invalid_aggregator");
}

#[tokio::test]
async fn functional_signed_webhooks_require_valid_signature() {
    let harness = harness(Some(SECRET), None);
    let body = serde_json::to_vec(&verification_body()).expect("encode");

    let (status, response) = send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["code"], "missing_signature");

    let wrong = sign_sha256_hmac(&body, "other-secret").expect("sign");
    let (status, response) =
        send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, Some(&wrong))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"]["code"], "invalid_signature");
    assert_eq!(total_events(&harness.registry, "main").await, 0);

    let valid = sign_sha256_hmac(&body, SECRET).expect("sign");
    let (status, _) = send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, Some(&valid))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(total_events(&harness.registry, "main").await, 1);
}

#[tokio::test]
async fn functional_debug_routes_are_hidden_without_key() {
    let harness = harness(None, None);
    let (status, body) = send(&harness.app, get(DEBUG_ENDPOINT, Some("anything"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn functional_debug_snapshot_requires_matching_key() {
    let harness = harness(None, Some(DEBUG_KEY));
    let body = serde_json::to_vec(&verification_body()).expect("encode");
    send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, None)).await;

    let (status, _) = send(&harness.app, get(DEBUG_ENDPOINT, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&harness.app, get(DEBUG_ENDPOINT, Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, snapshot) = send(&harness.app, get(DEBUG_ENDPOINT, Some(DEBUG_KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["name"], "main");
    assert_eq!(snapshot["total_events"], 1);
    assert_eq!(snapshot["buckets"][0]["key"], "events:1");

    let (status, snapshot) = send(
        &harness.app,
        get(&format!("/debug/team-b?key={DEBUG_KEY}"), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["name"], "team-b");
    assert_eq!(snapshot["total_events"], 0);
}

#[tokio::test]
async fn functional_debug_clear_wipes_named_state() {
    let harness = harness(None, Some(DEBUG_KEY));
    let body = serde_json::to_vec(&verification_body()).expect("encode");
    send(&harness.app, post_json(WEBHOOK_ENDPOINT, &body, None)).await;
    send(&harness.app, post_json("/webhooks/pact/team-a", &body, None)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/debug/team-a/clear")
        .header(DEBUG_KEY_HEADER, DEBUG_KEY)
        .body(Body::empty())
        .expect("request");
    let (status, response) = send(&harness.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, json!({"status": "cleared", "aggregator": "team-a"}));
    assert_eq!(total_events(&harness.registry, "team-a").await, 0);
    assert_eq!(total_events(&harness.registry, "main").await, 1);

    let request = Request::builder()
        .method("POST")
        .uri(format!("{DEBUG_CLEAR_ENDPOINT}?key={DEBUG_KEY}"))
        .body(Body::empty())
        .expect("request");
    let (status, _) = send(&harness.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(total_events(&harness.registry, "main").await, 0);
}
