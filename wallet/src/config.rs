//! Configuration management

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

pub const DEFAULT_FULLNODE_URL: &str = "https://fullnode.devnet.sui.io";
pub const DEFAULT_PROVER_URL: &str = "https://prover-dev.mystenlabs.com/v1";
pub const DEFAULT_FAUCET_URL: &str = "https://faucet.devnet.sui.io/v2/gas";
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_CLIENT_ID: &str =
    "649946277331-cmsolqpfq8go9gji3eaq6hkqhvgcs9fk.apps.googleusercontent.com";
pub const DEFAULT_REDIRECT_URI: &str = "https://zklogin-dun.vercel.app";

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub fullnode_url: String,
    pub prover_url: String,
    pub faucet_url: String,
    pub auth_endpoint: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// Durable scope (salt, max-epoch) lives here
    pub state_dir: PathBuf,
    /// Session scope (ephemeral key, randomness) lives here
    pub session_dir: PathBuf,
    pub max_epoch_offset: u64,
    pub gas_budget: u64,
    pub balance_poll_ms: u64,
    pub request_timeout_secs: u64,
}

impl Config {
    /// Defaults, then `file` if given, then `ZKLOGIN_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let session_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir())
            .join("zklogin-session");

        let mut builder = config::Config::builder()
            .set_default("fullnode_url", DEFAULT_FULLNODE_URL)?
            .set_default("prover_url", DEFAULT_PROVER_URL)?
            .set_default("faucet_url", DEFAULT_FAUCET_URL)?
            .set_default("auth_endpoint", DEFAULT_AUTH_ENDPOINT)?
            .set_default("client_id", DEFAULT_CLIENT_ID)?
            .set_default("redirect_uri", DEFAULT_REDIRECT_URI)?
            .set_default("scope", "openid")?
            .set_default("state_dir", ".zklogin")?
            .set_default("session_dir", session_dir.to_string_lossy().into_owned())?
            .set_default("max_epoch_offset", 10_u64)?
            .set_default("gas_budget", 10_000_000_u64)?
            .set_default("balance_poll_ms", 1_500_u64)?
            .set_default("request_timeout_secs", 30_u64)?;

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("ZKLOGIN"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
