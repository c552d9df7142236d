//! HTTP ingress for broker webhooks plus the operator debug surface.

mod error;
mod handlers;
mod server;
mod signature;

pub use error::GatewayApiError;
pub use server::{build_gateway_router, run_gateway_server, GatewayConfig, GatewayState};
pub use signature::{
    debug_key_matches, decode_hex, sign_sha256_hmac, verify_sha256_hmac_signature,
};

pub const HEALTH_ENDPOINT: &str = "/healthz";
pub const WEBHOOK_ENDPOINT: &str = "/webhooks/pact";
pub const NAMED_WEBHOOK_ENDPOINT: &str = "/webhooks/pact/{aggregator}";
pub const DEBUG_ENDPOINT: &str = "/debug";
pub const NAMED_DEBUG_ENDPOINT: &str = "/debug/{aggregator}";
pub const DEBUG_CLEAR_ENDPOINT: &str = "/debug/clear";
pub const NAMED_DEBUG_CLEAR_ENDPOINT: &str = "/debug/{aggregator}/clear";
pub const SIGNATURE_HEADER: &str = "x-pactbot-signature";
pub const DEBUG_KEY_HEADER: &str = "x-debug-key";

#[cfg(test)]
mod tests;
