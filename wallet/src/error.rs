//! Error types for the zkLogin workflow

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient SUI: balance {balance} MIST, requested {requested} MIST")]
    InsufficientFunds { balance: u64, requested: u64 },

    #[error("Missing input: {0}")]
    MissingInput(&'static str),

    #[error("Not available at step {step}: {action}")]
    WrongStep { step: usize, action: &'static str },

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Prover rejected request: {0}")]
    ProverRejected(String),

    #[error("Faucet request failed: {0}")]
    FaucetFailed(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("zkLogin SDK error: {0}")]
    Sdk(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse failure classes, used by front ends to decide how to react.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any network call
    Validation,
    /// The action needs inputs that are not there yet
    Precondition,
    /// Network or remote service failure; the user may retry
    Remote,
    /// Local persistence or configuration
    Storage,
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::InvalidAddress(_)
            | WalletError::InvalidAmount(_)
            | WalletError::InsufficientFunds { .. }
            | WalletError::InvalidToken(_)
            | WalletError::Sdk(_) => ErrorKind::Validation,
            WalletError::MissingInput(_) | WalletError::WrongStep { .. } => ErrorKind::Precondition,
            WalletError::ProverRejected(_)
            | WalletError::FaucetFailed(_)
            | WalletError::Rpc { .. }
            | WalletError::TransactionFailed(_)
            | WalletError::Http(_)
            | WalletError::Json(_) => ErrorKind::Remote,
            WalletError::Storage(_)
            | WalletError::Config(_)
            | WalletError::Io(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Remote
    }
}
