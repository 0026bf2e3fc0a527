//! Remote collaborators: fullnode RPC, prover, faucet

pub mod chain;
pub mod faucet;
pub mod prover;

use std::time::Duration;

/// Shared HTTP client settings for all services
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}
