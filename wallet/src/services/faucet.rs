//! Devnet faucet

use std::time::Duration;

use crate::error::{Result, WalletError};
use crate::models::{FaucetRequest, FixedAmountRequest};
use crate::validate::validate_address;

#[derive(Debug, Clone)]
pub struct FaucetClient {
    client: reqwest::Client,
    url: String,
}

impl FaucetClient {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
            url: url.to_string(),
        }
    }

    /// Ask the faucet to fund `recipient`. Only success or failure is reported.
    pub async fn request(&self, recipient: &str) -> Result<()> {
        validate_address(recipient)?;

        let body = FaucetRequest {
            fixed_amount_request: FixedAmountRequest {
                recipient: recipient.to_string(),
            },
        };
        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(WalletError::FaucetFailed(format!("{}: {}", status, text)));
        }

        tracing::info!("Faucet funded {}", recipient);
        Ok(())
    }
}
