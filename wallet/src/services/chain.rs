//! Fullnode interaction over Sui JSON-RPC

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Result, WalletError};

const SUI_COIN_TYPE: &str = "0x2::sui::SUI";

/// Chain operations the workflow consumes
#[async_trait]
pub trait Chain: Send + Sync {
    async fn current_epoch(&self) -> Result<u64>;

    /// Total SUI balance in MIST
    async fn balance(&self, owner: &str) -> Result<u64>;

    /// Unsigned transaction bytes moving `amount_mist` from `sender` to `recipient`
    async fn build_transfer(&self, sender: &str, recipient: &str, amount_mist: u64) -> Result<Vec<u8>>;

    /// Submit signed transaction bytes; returns the digest
    async fn execute(&self, tx_bytes: &[u8], signature: &str) -> Result<String>;
}

pub struct SuiRpcClient {
    client: reqwest::Client,
    url: String,
    gas_budget: u64,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemState {
    epoch: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Balance {
    total_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoinPage {
    data: Vec<Coin>,
    #[serde(default)]
    has_next_page: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Coin {
    coin_object_id: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBytes {
    tx_bytes: String,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    digest: String,
    effects: Option<Effects>,
}

#[derive(Debug, Deserialize)]
struct Effects {
    status: ExecutionStatus,
}

#[derive(Debug, Deserialize)]
struct ExecutionStatus {
    status: String,
    error: Option<String>,
}

fn parse_u64(raw: &str, what: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| WalletError::Rpc { code: 0, message: format!("{} is not a number: {}", what, raw) })
}

impl SuiRpcClient {
    pub fn new(url: &str, gas_budget: u64, timeout: Duration) -> Self {
        Self {
            client: super::http_client(timeout),
            url: url.to_string(),
            gas_budget,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("rpc #{} {}", id, method);

        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = resp.error {
            return Err(WalletError::Rpc { code: error.code, message: error.message });
        }
        let result = resp.result.ok_or_else(|| WalletError::Rpc {
            code: 0,
            message: format!("{} returned no result", method),
        })?;
        Ok(serde_json::from_value(result)?)
    }

    /// Every SUI coin owned by `owner`, following the page cursor
    async fn owned_coins(&self, owner: &str) -> Result<Vec<Coin>> {
        let mut coins = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page: CoinPage = self
                .call("suix_getCoins", json!([owner, SUI_COIN_TYPE, cursor, Value::Null]))
                .await?;
            coins.extend(page.data);
            match page.next_cursor {
                Some(next) if page.has_next_page => cursor = Some(next),
                _ => return Ok(coins),
            }
        }
    }
}

#[async_trait]
impl Chain for SuiRpcClient {
    async fn current_epoch(&self) -> Result<u64> {
        let state: SystemState = self.call("suix_getLatestSuiSystemState", json!([])).await?;
        parse_u64(&state.epoch, "epoch")
    }

    async fn balance(&self, owner: &str) -> Result<u64> {
        let balance: Balance = self.call("suix_getBalance", json!([owner])).await?;
        parse_u64(&balance.total_balance, "balance")
    }

    async fn build_transfer(&self, sender: &str, recipient: &str, amount_mist: u64) -> Result<Vec<u8>> {
        let needed = amount_mist.saturating_add(self.gas_budget);
        let mut total = 0u64;
        let mut coin_ids = Vec::new();
        for coin in self.owned_coins(sender).await? {
            total = total.saturating_add(parse_u64(&coin.balance, "coin balance")?);
            coin_ids.push(coin.coin_object_id);
        }
        if total < needed {
            return Err(WalletError::InsufficientFunds { balance: total, requested: needed });
        }

        // all coins are merged; the first one pays for gas
        let tx: TransactionBytes = self
            .call(
                "unsafe_paySui",
                json!([
                    sender,
                    coin_ids,
                    [recipient],
                    [amount_mist.to_string()],
                    self.gas_budget.to_string()
                ]),
            )
            .await?;
        STANDARD
            .decode(tx.tx_bytes)
            .map_err(|e| WalletError::Rpc { code: 0, message: format!("txBytes not base64: {}", e) })
    }

    async fn execute(&self, tx_bytes: &[u8], signature: &str) -> Result<String> {
        let resp: ExecuteResponse = self
            .call(
                "sui_executeTransactionBlock",
                json!([
                    STANDARD.encode(tx_bytes),
                    [signature],
                    { "showEffects": true },
                    "WaitForLocalExecution"
                ]),
            )
            .await?;

        if let Some(effects) = resp.effects {
            if effects.status.status != "success" {
                return Err(WalletError::TransactionFailed(
                    effects.status.error.unwrap_or(effects.status.status),
                ));
            }
        }
        Ok(resp.digest)
    }
}

impl std::fmt::Debug for SuiRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiRpcClient").field("url", &self.url).finish()
    }
}
