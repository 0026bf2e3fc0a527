//! Remote proving service

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, WalletError};
use crate::models::{ProofRequest, ZkProof};

#[async_trait]
pub trait Prover: Send + Sync {
    async fn prove(&self, request: &ProofRequest) -> Result<ZkProof>;
}

pub struct HttpProver {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    message: String,
}

impl HttpProver {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl Prover for HttpProver {
    async fn prove(&self, request: &ProofRequest) -> Result<ZkProof> {
        let resp = self.client.post(&self.url).json(request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            let message = serde_json::from_str::<RejectionBody>(&text)
                .map(|body| body.message)
                .unwrap_or_else(|_| format!("{}: {}", status, text));
            return Err(WalletError::ProverRejected(message));
        }

        Ok(resp.json().await?)
    }
}

impl std::fmt::Debug for HttpProver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProver").field("url", &self.url).finish()
    }
}
