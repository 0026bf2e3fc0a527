//! Signed value transfer
//!
//! Inputs are validated before any chain call. The executor never touches
//! workflow state; whether a failure consumes anything is the caller's call.

use crate::error::{Result, WalletError};
use crate::models::{TransferReceipt, ZkProof};
use crate::sdk::{self, EphemeralKeyPair, KEY_CLAIM_NAME};
use crate::services::chain::Chain;
use crate::validate::{normalize_address, positive_mist, validate_address};

#[derive(Debug, Clone)]
pub struct TransferRequest<'a> {
    pub sender: &'a str,
    pub recipient: &'a str,
    pub amount_sui: &'a str,
    pub signer: &'a EphemeralKeyPair,
    pub jwt_sub: &'a str,
    pub jwt_aud: &'a str,
    pub user_salt: &'a str,
    pub proof: &'a ZkProof,
    pub max_epoch: u64,
    /// Last balance seen for `sender`, if any
    pub known_balance: Option<u64>,
}

/// Validation shared with the confirm-dialog step: address format, positive
/// amount, and the best-effort balance check.
pub fn check_transfer(recipient: &str, amount_sui: &str, known_balance: Option<u64>) -> Result<u64> {
    validate_address(recipient)?;
    let amount_mist = positive_mist(amount_sui)?;
    if let Some(balance) = known_balance {
        if balance < amount_mist {
            return Err(WalletError::InsufficientFunds { balance, requested: amount_mist });
        }
    }
    Ok(amount_mist)
}

pub struct TransferExecutor<'a> {
    chain: &'a dyn Chain,
}

impl<'a> TransferExecutor<'a> {
    pub fn new(chain: &'a dyn Chain) -> Self {
        Self { chain }
    }

    pub async fn execute(&self, request: &TransferRequest<'_>) -> Result<TransferReceipt> {
        let amount_mist = check_transfer(request.recipient, request.amount_sui, request.known_balance)?;
        let recipient = normalize_address(request.recipient);
        let address_seed = sdk::address_seed(request.user_salt, KEY_CLAIM_NAME, request.jwt_sub, request.jwt_aud)?;

        tracing::info!(
            "Transferring {} MIST from {} to {}",
            amount_mist,
            request.sender,
            recipient
        );

        let tx_bytes = self
            .chain
            .build_transfer(request.sender, &recipient, amount_mist)
            .await?;
        let user_signature = request.signer.sign_transaction(&tx_bytes);
        let signature = sdk::zk_login_signature(request.proof, &address_seed, request.max_epoch, &user_signature)?;
        let digest = self.chain.execute(&tx_bytes, &signature).await?;

        tracing::info!("Transfer complete: digest={}", digest);
        Ok(TransferReceipt {
            digest,
            sender: request.sender.to_string(),
            recipient,
            amount_mist,
        })
    }
}
