use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use pactbot_aggregator::{AggregatorError, AggregatorHandle, AggregatorRegistry};
use pactbot_store::StoreError;
use tokio::net::TcpListener;

use crate::handlers::{
    handle_clear, handle_debug, handle_health, handle_named_clear, handle_named_debug,
    handle_named_webhook, handle_webhook,
};
use crate::{
    GatewayApiError, DEBUG_CLEAR_ENDPOINT, DEBUG_ENDPOINT, HEALTH_ENDPOINT,
    NAMED_DEBUG_CLEAR_ENDPOINT, NAMED_DEBUG_ENDPOINT, NAMED_WEBHOOK_ENDPOINT, WEBHOOK_ENDPOINT,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: String,
    pub default_aggregator: String,
    /// When set, webhooks must carry a valid `x-pactbot-signature`.
    pub webhook_secret: Option<String>,
    /// When unset, the debug routes answer 404.
    pub debug_key: Option<String>,
}

impl GatewayConfig {
    pub(crate) fn webhook_secret(&self) -> Option<&str> {
        non_empty(self.webhook_secret.as_deref())
    }

    pub(crate) fn debug_key(&self) -> Option<&str> {
        non_empty(self.debug_key.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub struct GatewayState {
    pub(crate) config: GatewayConfig,
    pub(crate) registry: Arc<AggregatorRegistry>,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, registry: Arc<AggregatorRegistry>) -> Self {
        Self { config, registry }
    }

    pub(crate) fn aggregator(&self, name: &str) -> Result<AggregatorHandle, GatewayApiError> {
        self.registry.handle(name).map_err(|error| match error {
            AggregatorError::Store(StoreError::InvalidNamespace(_)) => {
                GatewayApiError::bad_request("invalid_aggregator", error.to_string())
            }
            other => GatewayApiError::unavailable(other.to_string()),
        })
    }
}

pub fn build_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(WEBHOOK_ENDPOINT, post(handle_webhook))
        .route(NAMED_WEBHOOK_ENDPOINT, post(handle_named_webhook))
        .route(DEBUG_ENDPOINT, get(handle_debug))
        .route(DEBUG_CLEAR_ENDPOINT, post(handle_clear))
        .route(NAMED_DEBUG_ENDPOINT, get(handle_named_debug))
        .route(NAMED_DEBUG_CLEAR_ENDPOINT, post(handle_named_clear))
        .with_state(state)
}

/// Binds `config.bind` and serves until `shutdown` resolves.
pub async fn run_gateway_server<F>(
    config: GatewayConfig,
    registry: Arc<AggregatorRegistry>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind pactbot gateway on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound gateway address")?;
    tracing::info!(
        addr = %local_addr,
        default_aggregator = %config.default_aggregator,
        signed_webhooks = config.webhook_secret().is_some(),
        debug_routes = config.debug_key().is_some(),
        "pactbot gateway listening"
    );

    let app = build_gateway_router(Arc::new(GatewayState::new(config, registry)));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("pactbot gateway exited unexpectedly")
}
