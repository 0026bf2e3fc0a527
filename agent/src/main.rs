//! zkLogin wallet CLI
//!
//! `login` runs the streamlined flow: one sign-in, then address and proof
//! follow on their own. `guided` walks the seven steps one command at a
//! time and shows every intermediate value.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zklogin_wallet::services::chain::{Chain, SuiRpcClient};
use zklogin_wallet::services::faucet::FaucetClient;
use zklogin_wallet::session::poll_balance;
use zklogin_wallet::store::{Entry, SessionStore};
use zklogin_wallet::validate::{format_sui, validate_address};
use zklogin_wallet::{Config, FlowMode, ZkLoginSession};

mod repl;

use repl::Console;

#[derive(Parser)]
#[command(name = "agent")]
#[command(about = "zkLogin wallet: OAuth sign-in, salted address, ZK proof, signed transfers")]
struct Cli {
    /// Config file (TOML, JSON or YAML); ZKLOGIN_* variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and send in as few steps as possible
    Login,

    /// Walk through every step by hand
    Guided,

    /// Show the balance of an address
    Balance {
        address: String,

        /// Keep polling and print changes until Ctrl-C
        #[arg(long)]
        watch: bool,
    },

    /// Request devnet SUI for an address
    Faucet { address: String },

    /// Wipe the stored key, randomness, salt and max epoch
    Reset,

    /// Show what is stored and how far a resumed session gets
    Status,
}

/// Balance printer that only reports changes
fn on_change() -> impl FnMut(&str, u64) + Send {
    let mut last = None;
    move |owner, balance| {
        if last != Some(balance) {
            last = Some(balance);
            tracing::info!("Balance of {}: {} SUI", owner, format_sui(balance));
        }
    }
}

fn spawn_poller(session: &ZkLoginSession, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(poll_balance(session.chain(), session.address_watch(), every, on_change()))
}

async fn login(config: &Config) -> Result<()> {
    let mut session = ZkLoginSession::from_config(config, FlowMode::Streamlined);
    let poller = spawn_poller(&session, config.balance_poll_interval());
    let mut console = Console::new();

    println!("\n[*] zkLogin: preparing ephemeral key and nonce");
    let url = session.login().await?;
    let state = session.state();
    println!("    Current epoch: {}", state.current_epoch.unwrap_or_default());
    println!("    Max epoch:     {}", state.max_epoch.unwrap_or_default());
    println!("    Nonce:         {}", state.nonce.as_deref().unwrap_or("-"));
    println!("\n[1] Sign in with the provider:\n    {}", url);

    loop {
        let Some(location) = console.prompt("\nPaste the redirect URL:").await? else {
            poller.abort();
            return Ok(());
        };
        match session.complete_login(&location).await {
            Ok(true) => break,
            Ok(false) => println!("    No id_token in that URL; still waiting."),
            Err(e) => {
                repl::report(&e.into());
                if session.state().token.is_some() {
                    println!("    Use 'proof' to retry.");
                    break;
                }
            }
        }
    }

    if let Some(address) = &session.state().address {
        println!("\n[2] Address: {}", address);
    }
    repl::run(&mut session, &mut console).await?;
    poller.abort();
    Ok(())
}

async fn guided(config: &Config) -> Result<()> {
    let mut session = ZkLoginSession::from_config(config, FlowMode::Guided);
    session.restore();
    let poller = spawn_poller(&session, config.balance_poll_interval());

    repl::show(session.state());
    repl::run(&mut session, &mut Console::new()).await?;
    poller.abort();
    Ok(())
}

fn status(config: &Config) {
    let store = SessionStore::on_disk(&config.session_dir, &config.state_dir);
    println!("Stored state:");
    for entry in Entry::ALL {
        let present = if store.contains(entry) { "present" } else { "-" };
        println!("  {:<16} {:<8} ({:?})", entry.key(), present, entry.scope());
    }

    let mut session = ZkLoginSession::from_config(config, FlowMode::Guided);
    session.restore();
    println!("\nResumed session:");
    repl::show(session.state());

    println!("\nEndpoints:");
    println!("  Fullnode: {}", config.fullnode_url);
    println!("  Prover:   {}", config.prover_url);
    println!("  Faucet:   {}", config.faucet_url);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zklogin_agent=info,zklogin_wallet=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    tracing::debug!("Fullnode: {}", config.fullnode_url);

    match cli.command {
        Commands::Login => login(&config).await?,

        Commands::Guided => guided(&config).await?,

        Commands::Balance { address, watch } => {
            validate_address(&address)?;
            let chain: Arc<dyn Chain> = Arc::new(SuiRpcClient::new(
                &config.fullnode_url,
                config.gas_budget,
                config.request_timeout(),
            ));
            if watch {
                let (tx, rx) = tokio::sync::watch::channel(Some(address));
                let poller = tokio::spawn(poll_balance(chain, rx, config.balance_poll_interval(), on_change()));
                tokio::signal::ctrl_c().await?;
                drop(tx);
                poller.await?;
            } else {
                let balance = chain.balance(&address).await?;
                println!("{} SUI", format_sui(balance));
            }
        }

        Commands::Faucet { address } => {
            FaucetClient::new(&config.faucet_url, config.request_timeout())
                .request(&address)
                .await?;
            println!("Faucet request accepted for {}", address);
        }

        Commands::Reset => {
            SessionStore::on_disk(&config.session_dir, &config.state_dir).clear_all()?;
            println!("Cleared session and durable state.");
        }

        Commands::Status => status(&config),
    }

    Ok(())
}
