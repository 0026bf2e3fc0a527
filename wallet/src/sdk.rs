//! zkLogin primitives
//!
//! Thin wrappers over the crates that actually implement the cryptography:
//! `ed25519-dalek` for the ephemeral key, `fastcrypto-zkp` for the
//! Poseidon-based nonce and address seed, `bcs` for the signature encoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use blake2::{digest::consts::U32, Blake2b, Digest};
use ed25519_dalek::{Signer, SigningKey};
use fastcrypto_zkp::bn254::utils::{gen_address_seed, get_nonce};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use serde::Serialize;
use std::fmt;

use crate::error::{Result, WalletError};
use crate::models::{IssBase64Details, ProofPoints, ZkProof};
use crate::oauth::IdentityClaims;

type Blake2b256 = Blake2b<U32>;

/// Claim the address is bound to
pub const KEY_CLAIM_NAME: &str = "sub";

const ED25519_FLAG: u8 = 0x00;
const ZK_LOGIN_FLAG: u8 = 0x05;
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

/// Short-lived signing identity bound into the login nonce.
#[derive(Clone)]
pub struct EphemeralKeyPair {
    signing: SigningKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore from the base64 secret produced by [`Self::secret_base64`].
    pub fn from_secret_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| WalletError::Storage(format!("ephemeral key is not base64: {}", e)))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| WalletError::Storage("ephemeral key must be 32 bytes".into()))?;
        Ok(Self {
            signing: SigningKey::from_bytes(&secret),
        })
    }

    pub fn secret_base64(&self) -> String {
        STANDARD.encode(self.signing.to_bytes())
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    /// `flag ‖ pk`, the form hashed into the nonce
    pub fn sui_public_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(33);
        bytes.push(ED25519_FLAG);
        bytes.extend_from_slice(&self.public_key());
        bytes
    }

    /// Extended ephemeral public key as sent to the prover
    pub fn extended_public_key(&self) -> String {
        STANDARD.encode(self.sui_public_key())
    }

    /// Sign transaction bytes under the transaction intent.
    /// Returns the serialized `flag ‖ signature ‖ pk`.
    pub fn sign_transaction(&self, tx_bytes: &[u8]) -> Vec<u8> {
        let digest = transaction_digest(tx_bytes);
        let signature = self.signing.sign(&digest);

        let mut out = Vec::with_capacity(1 + 64 + 32);
        out.push(ED25519_FLAG);
        out.extend_from_slice(&signature.to_bytes());
        out.extend_from_slice(&self.public_key());
        out
    }
}

impl fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

impl PartialEq for EphemeralKeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public_key() == other.public_key()
    }
}

impl Eq for EphemeralKeyPair {}

pub(crate) fn transaction_digest(tx_bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(TRANSACTION_INTENT);
    hasher.update(tx_bytes);
    hasher.finalize().into()
}

/// 128 random bits as a decimal string; used for nonce randomness and salts.
pub fn generate_randomness() -> String {
    rand::random::<u128>().to_string()
}

pub fn generate_salt() -> String {
    generate_randomness()
}

pub fn nonce(keypair: &EphemeralKeyPair, max_epoch: u64, randomness: &str) -> Result<String> {
    get_nonce(&keypair.sui_public_key(), max_epoch, randomness)
        .map_err(|e| WalletError::Sdk(format!("nonce: {}", e)))
}

pub fn address_seed(salt: &str, claim_name: &str, claim_value: &str, aud: &str) -> Result<String> {
    gen_address_seed(salt, claim_name, claim_value, aud)
        .map_err(|e| WalletError::Sdk(format!("address seed: {}", e)))
}

/// Google issues tokens with a bare host as `iss`; the chain hashes the URL form.
pub fn normalize_issuer(iss: &str) -> &str {
    if iss == "accounts.google.com" {
        "https://accounts.google.com"
    } else {
        iss
    }
}

/// Deterministic account address for a (token, salt) pair.
pub fn jwt_to_address(claims: &IdentityClaims, salt: &str) -> Result<String> {
    let aud = claims
        .aud
        .primary()
        .ok_or(WalletError::InvalidToken("token has no audience".into()))?;
    let seed = address_seed(salt, KEY_CLAIM_NAME, &claims.sub, aud)?;
    let seed_bytes = seed_to_bytes(&seed)?;
    let iss = normalize_issuer(&claims.iss).as_bytes();
    let iss_len = u8::try_from(iss.len())
        .map_err(|_| WalletError::InvalidToken("issuer too long".into()))?;

    let mut hasher = Blake2b256::new();
    hasher.update([ZK_LOGIN_FLAG, iss_len]);
    hasher.update(iss);
    hasher.update(seed_bytes);
    Ok(format!("0x{}", hex::encode(hasher.finalize())))
}

fn seed_to_bytes(seed: &str) -> Result<[u8; 32]> {
    let value = BigUint::parse_bytes(seed.as_bytes(), 10)
        .ok_or_else(|| WalletError::Sdk(format!("address seed '{}' is not decimal", seed)))?;
    let be = value.to_bytes_be();
    if be.len() > 32 {
        return Err(WalletError::Sdk("address seed exceeds 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out[32 - be.len()..].copy_from_slice(&be);
    Ok(out)
}

#[derive(Serialize)]
struct ZkLoginInputsBcs<'a> {
    proof_points: &'a ProofPoints,
    iss_base64_details: &'a IssBase64Details,
    header_base64: &'a str,
    address_seed: &'a str,
}

#[derive(Serialize)]
struct ZkLoginSignatureBcs<'a> {
    inputs: ZkLoginInputsBcs<'a>,
    max_epoch: u64,
    user_signature: &'a [u8],
}

/// Assemble the base64 zkLogin signature from the proof, address seed and
/// the ephemeral key's signature over the transaction.
pub fn zk_login_signature(
    proof: &ZkProof,
    address_seed: &str,
    max_epoch: u64,
    user_signature: &[u8],
) -> Result<String> {
    let signature = ZkLoginSignatureBcs {
        inputs: ZkLoginInputsBcs {
            proof_points: &proof.proof_points,
            iss_base64_details: &proof.iss_base64_details,
            header_base64: &proof.header_base64,
            address_seed,
        },
        max_epoch,
        user_signature,
    };
    let body = bcs::to_bytes(&signature).map_err(|e| WalletError::Sdk(e.to_string()))?;

    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(ZK_LOGIN_FLAG);
    out.extend_from_slice(&body);
    Ok(STANDARD.encode(out))
}
