//! zkLogin wallet workflow
//!
//! Walks an account through the zkLogin flow:
//! 1. Generate an ephemeral keypair and bind it into a login nonce
//! 2. Obtain an OAuth identity token from the provider redirect
//! 3. Derive a salted on-chain address
//! 4. Fetch a zero-knowledge proof from a remote prover
//! 5. Sign and submit a transfer
//!
//! Cryptography and chain access are delegated to the collaborators in
//! [`services`] and [`sdk`]; this crate owns the coordination.

pub mod config;
pub mod error;
pub mod models;
pub mod oauth;
pub mod proof;
pub mod sdk;
pub mod services;
pub mod session;
pub mod store;
pub mod transfer;
pub mod validate;
pub mod workflow;

pub use config::Config;
pub use error::{ErrorKind, Result, WalletError};
pub use session::{FlowMode, ZkLoginSession};
pub use workflow::{Event, FlowState, Step};
