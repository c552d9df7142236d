use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use pactbot_events::normalize_webhook_payload;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::server::GatewayState;
use crate::{
    debug_key_matches, verify_sha256_hmac_signature, GatewayApiError, DEBUG_KEY_HEADER,
    SIGNATURE_HEADER,
};

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DebugQuery {
    key: Option<String>,
}

pub(crate) async fn handle_health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

pub(crate) async fn handle_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let name = state.config.default_aggregator.clone();
    accept_webhook(&state, &name, &headers, &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) async fn handle_named_webhook(
    State(state): State<Arc<GatewayState>>,
    AxumPath(aggregator): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    accept_webhook(&state, &aggregator, &headers, &body)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) async fn handle_debug(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<DebugQuery>,
) -> Response {
    let name = state.config.default_aggregator.clone();
    debug_snapshot(&state, &name, &headers, &query)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) async fn handle_named_debug(
    State(state): State<Arc<GatewayState>>,
    AxumPath(aggregator): AxumPath<String>,
    headers: HeaderMap,
    Query(query): Query<DebugQuery>,
) -> Response {
    debug_snapshot(&state, &aggregator, &headers, &query)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) async fn handle_clear(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<DebugQuery>,
) -> Response {
    let name = state.config.default_aggregator.clone();
    clear_aggregator(&state, &name, &headers, &query)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

pub(crate) async fn handle_named_clear(
    State(state): State<Arc<GatewayState>>,
    AxumPath(aggregator): AxumPath<String>,
    headers: HeaderMap,
    Query(query): Query<DebugQuery>,
) -> Response {
    clear_aggregator(&state, &aggregator, &headers, &query)
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn accept_webhook(
    state: &GatewayState,
    aggregator: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Response, GatewayApiError> {
    if let Some(secret) = state.config.webhook_secret() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                GatewayApiError::unauthorized(
                    "missing_signature",
                    format!("missing {SIGNATURE_HEADER} header"),
                )
            })?;
        verify_sha256_hmac_signature(body, signature, secret).map_err(|error| {
            tracing::warn!(aggregator, error = %error, "rejected webhook signature");
            GatewayApiError::unauthorized("invalid_signature", error.to_string())
        })?;
    }

    let payload = serde_json::from_slice::<Value>(body).map_err(|error| {
        GatewayApiError::bad_request("malformed_json", format!("invalid JSON body: {error}"))
    })?;
    let event = normalize_webhook_payload(&payload)
        .map_err(|error| GatewayApiError::bad_request("invalid_payload", error.to_string()))?;
    let handle = state.aggregator(aggregator)?;
    let kind = event.kind();
    tracing::debug!(
        aggregator,
        kind,
        group = %event.group_key(),
        "webhook accepted"
    );
    handle.add_event(event).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "kind": kind,
            "aggregator": aggregator,
        })),
    )
        .into_response())
}

async fn debug_snapshot(
    state: &GatewayState,
    aggregator: &str,
    headers: &HeaderMap,
    query: &DebugQuery,
) -> Result<Response, GatewayApiError> {
    authorize_debug(state, headers, query)?;
    let handle = state.aggregator(aggregator)?;
    let snapshot = handle
        .get_debug_info()
        .await
        .map_err(|error| GatewayApiError::internal(error.to_string()))?;
    Ok((StatusCode::OK, Json(snapshot)).into_response())
}

async fn clear_aggregator(
    state: &GatewayState,
    aggregator: &str,
    headers: &HeaderMap,
    query: &DebugQuery,
) -> Result<Response, GatewayApiError> {
    authorize_debug(state, headers, query)?;
    let handle = state.aggregator(aggregator)?;
    handle
        .clear_all()
        .await
        .map_err(|error| GatewayApiError::internal(error.to_string()))?;
    tracing::info!(aggregator, "aggregator cleared via debug route");
    Ok((
        StatusCode::OK,
        Json(json!({"status": "cleared", "aggregator": aggregator})),
    )
        .into_response())
}

fn authorize_debug(
    state: &GatewayState,
    headers: &HeaderMap,
    query: &DebugQuery,
) -> Result<(), GatewayApiError> {
    let Some(expected) = state.config.debug_key() else {
        return Err(GatewayApiError::not_found(
            "not_found",
            "debug routes are disabled",
        ));
    };
    let observed = headers
        .get(DEBUG_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(query.key.as_deref())
        .map(str::trim);
    if !observed.is_some_and(|observed| debug_key_matches(observed, expected)) {
        return Err(GatewayApiError::unauthorized(
            "invalid_debug_key",
            "missing or invalid debug key",
        ));
    }
    Ok(())
}
