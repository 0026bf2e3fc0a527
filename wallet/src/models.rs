//! Data models for the workflow and its wire formats

use serde::{Deserialize, Serialize};

/// Groth16 proof points as returned by the prover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPoints {
    pub a: Vec<String>,
    pub b: Vec<Vec<String>>,
    pub c: Vec<String>,
}

/// The `iss` claim location inside the token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssBase64Details {
    pub value: String,
    pub index_mod_4: u8,
}

/// Proof artifact from the remote prover: the zkLogin signature inputs
/// minus the address seed, which is added at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkProof {
    pub proof_points: ProofPoints,
    pub iss_base64_details: IssBase64Details,
    pub header_base64: String,
}

/// Body POSTed to the prover service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofRequest {
    pub jwt: String,
    pub extended_ephemeral_public_key: String,
    pub max_epoch: u64,
    pub jwt_randomness: String,
    pub salt: String,
    pub key_claim_name: String,
}

/// Body POSTed to the faucet service
#[derive(Debug, Clone, Serialize)]
pub struct FaucetRequest {
    #[serde(rename = "FixedAmountRequest")]
    pub fixed_amount_request: FixedAmountRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixedAmountRequest {
    pub recipient: String,
}

/// Recipient and amount entered by the user, awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub recipient: String,
    /// Decimal SUI amount as typed
    pub amount: String,
    pub amount_mist: u64,
}

/// Result of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub digest: String,
    pub sender: String,
    pub recipient: String,
    pub amount_mist: u64,
}
