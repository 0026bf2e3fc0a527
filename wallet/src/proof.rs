//! Proof fetching
//!
//! A proof is only valid for the exact (key pair, max-epoch, randomness,
//! salt, token) tuple it was produced for. Requests are keyed by a digest of
//! that tuple so duplicates can be skipped and late answers for an outdated
//! tuple discarded.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::models::{ProofRequest, ZkProof};
use crate::sdk::KEY_CLAIM_NAME;
use crate::services::prover::Prover;
use crate::workflow::FlowState;

/// SHA-256 over the full input tuple, hex encoded
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ProofKey(String);

impl ProofKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofKey({}..)", &self.0[..12])
    }
}

impl fmt::Display for ProofKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the prover needs, taken from one consistent state snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofInputs {
    pub jwt: String,
    pub extended_ephemeral_public_key: String,
    pub max_epoch: u64,
    pub randomness: String,
    pub salt: String,
}

impl ProofInputs {
    /// `None` unless all five inputs are present.
    pub fn from_state(state: &FlowState) -> Option<Self> {
        Some(Self {
            jwt: state.token.as_ref()?.raw.clone(),
            extended_ephemeral_public_key: state.keypair.as_ref()?.extended_public_key(),
            max_epoch: state.max_epoch?,
            randomness: state.randomness.clone()?,
            salt: state.salt.clone()?,
        })
    }

    pub fn key(&self) -> ProofKey {
        let epoch = self.max_epoch.to_be_bytes();
        let fields: [&[u8]; 5] = [
            self.jwt.as_bytes(),
            self.extended_ephemeral_public_key.as_bytes(),
            &epoch,
            self.randomness.as_bytes(),
            self.salt.as_bytes(),
        ];

        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        ProofKey(hex::encode(hasher.finalize()))
    }

    pub fn request(&self) -> ProofRequest {
        ProofRequest {
            jwt: self.jwt.clone(),
            extended_ephemeral_public_key: self.extended_ephemeral_public_key.clone(),
            max_epoch: self.max_epoch,
            jwt_randomness: self.randomness.clone(),
            salt: self.salt.clone(),
            key_claim_name: KEY_CLAIM_NAME.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct ProofFetcher {
    prover: Arc<dyn Prover>,
}

impl ProofFetcher {
    pub fn new(prover: Arc<dyn Prover>) -> Self {
        Self { prover }
    }

    pub async fn fetch(&self, inputs: &ProofInputs) -> Result<ZkProof> {
        let key = inputs.key();
        tracing::info!("Requesting proof {:?} (max_epoch={})", key, inputs.max_epoch);

        let started = Instant::now();
        let result = self.prover.prove(&inputs.request()).await;
        match &result {
            Ok(_) => tracing::info!("Proof {:?} ready in {:?}", key, started.elapsed()),
            Err(e) => tracing::warn!("Proof {:?} failed: {}", key, e),
        }
        result
    }
}

impl fmt::Debug for ProofFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofFetcher").finish_non_exhaustive()
    }
}
