//! Line-oriented console shared by the guided and streamlined flows

use anyhow::{bail, Context, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use zklogin_wallet::validate::format_sui;
use zklogin_wallet::{FlowMode, FlowState, Step, WalletError, ZkLoginSession};

const GUIDED_HELP: &str = "\
Commands:
  show | next | back | reset | quit
  keygen                      step 1: new ephemeral key pair
  epoch | randomness | nonce  step 2
  url                         provider sign-in URL
  token <redirect-url>        step 3: take the id_token from the redirect
  salt                        step 4
  address                     step 5
  proof                       step 6: request the ZK proof
  balance | faucet            step 7
  send <recipient> <amount>   step 7: transfer SUI (asks to confirm)";

const STREAMLINED_HELP: &str = "\
Commands:
  show | balance | faucet | reset | quit
  send <recipient> <amount>   transfer SUI (asks to confirm)
  proof                       retry a failed proof request";

pub struct Console {
    lines: Lines<BufReader<Stdin>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// `None` on end of input.
    pub async fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{} ", label);
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?.map(|line| line.trim().to_string()))
    }
}

pub fn report(err: &anyhow::Error) {
    match err.downcast_ref::<WalletError>() {
        Some(e) if e.is_retryable() => println!("[!] {} (you can retry)", e),
        Some(e) => println!("[!] {}", e),
        None => println!("[!] {:#}", err),
    }
}

pub fn show(state: &FlowState) {
    println!(
        "\nStep {}/{}: {}",
        state.step.index() + 1,
        Step::ALL.len(),
        state.step.label()
    );

    let field = |label: &str, value: Option<String>| {
        println!("  {:<15} {}", label, value.unwrap_or_else(|| "-".to_string()));
    };
    let claims = state.token.as_ref().map(|token| &token.claims);

    field("Public key:", state.keypair.as_ref().map(|k| k.extended_public_key()));
    field("Current epoch:", state.current_epoch.map(|e| e.to_string()));
    field("Max epoch:", state.max_epoch.map(|e| e.to_string()));
    field("Randomness:", state.randomness.clone());
    field("Nonce:", state.nonce.clone());
    field("Issuer:", claims.map(|c| c.iss.clone()));
    field("Subject:", claims.map(|c| c.sub.clone()));
    field("Audience:", claims.and_then(|c| c.aud.primary().map(str::to_string)));
    field("Salt:", state.salt.clone());
    field("Address:", state.address.clone());
    field(
        "Proof:",
        match (&state.proof, &state.pending_proof) {
            (Some(_), _) => Some("ready".to_string()),
            (None, Some(key)) => Some(format!("requested ({})", key)),
            (None, None) => None,
        },
    );
    field("Last digest:", state.last_digest.clone());
}

enum Flow {
    Continue,
    Quit,
}

pub async fn run(session: &mut ZkLoginSession, console: &mut Console) -> Result<()> {
    println!("\n{}", help(session.mode()));
    loop {
        let label = format!("\n[{}]>", session.state().step.index() + 1);
        let Some(line) = console.prompt(&label).await? else {
            return Ok(());
        };
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match dispatch(session, console, command, &args).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return Ok(()),
            Err(e) => report(&e),
        }
    }
}

fn help(mode: FlowMode) -> &'static str {
    match mode {
        FlowMode::Guided => GUIDED_HELP,
        FlowMode::Streamlined => STREAMLINED_HELP,
    }
}

async fn dispatch(session: &mut ZkLoginSession, console: &mut Console, command: &str, args: &[&str]) -> Result<Flow> {
    match command {
        "help" | "?" => println!("{}", help(session.mode())),
        "show" => show(session.state()),
        "next" => {
            if !session.next() {
                println!("This step is not complete yet.");
            }
            show(session.state());
        }
        "back" => {
            session.back();
            show(session.state());
        }
        "reset" => {
            session.reset()?;
            println!("Session reset.");
        }
        "keygen" => {
            session.generate_keypair()?;
            if let Some(keypair) = &session.state().keypair {
                println!("Public key: {}", keypair.extended_public_key());
            }
        }
        "epoch" => {
            let current = session.fetch_epoch().await?;
            println!(
                "Current epoch {}, max epoch {}",
                current,
                session.state().max_epoch.unwrap_or_default()
            );
        }
        "randomness" => {
            session.generate_randomness()?;
            println!("Randomness: {}", session.state().randomness.as_deref().unwrap_or("-"));
        }
        "nonce" => println!("Nonce: {}", session.derive_nonce()?),
        "url" => println!("{}", session.authorization_url()?),
        "token" => {
            let location = args.first().context("usage: token <redirect-url>")?;
            if !session.handle_redirect(location) {
                println!("No id_token in that URL; still waiting.");
                return Ok(Flow::Continue);
            }
            if session.mode() == FlowMode::Streamlined {
                session.refresh().await?;
            }
            show(session.state());
        }
        "salt" => println!("Salt: {}", session.generate_salt()?),
        "address" => println!("Address: {}", session.derive_address()?),
        "proof" => {
            match session.mode() {
                FlowMode::Guided => session.fetch_proof().await?,
                FlowMode::Streamlined => session.refresh().await?,
            }
            if session.state().proof.is_some() {
                println!("Proof ready.");
            }
        }
        "balance" => match session.balance().await? {
            Some(balance) => println!("{} SUI", format_sui(balance)),
            None => println!("No address yet."),
        },
        "faucet" => {
            session.request_faucet().await?;
            println!("Faucet request accepted.");
        }
        "send" => {
            let &[recipient, amount] = args else {
                bail!("usage: send <recipient> <amount-sui>");
            };
            send(session, console, recipient, amount).await?;
        }
        "quit" | "exit" => return Ok(Flow::Quit),
        other => println!("Unknown command '{}'; try 'help'.", other),
    }
    Ok(Flow::Continue)
}

async fn send(session: &mut ZkLoginSession, console: &mut Console, recipient: &str, amount: &str) -> Result<()> {
    let pending = session.prepare_transfer(recipient, amount).await?;
    println!("\n  Send {} SUI ({} MIST)", pending.amount, pending.amount_mist);
    println!("  to   {}", pending.recipient);

    let answer = console.prompt("Confirm? [y/N]").await?.unwrap_or_default();
    if !answer.eq_ignore_ascii_case("y") {
        session.cancel_transfer();
        println!("Cancelled.");
        return Ok(());
    }

    let receipt = session.confirm_transfer().await?;
    println!("\n[$] TRANSFER COMPLETE");
    println!("    Digest: {}", receipt.digest);
    println!("    From:   {}", receipt.sender);
    println!("    Amount: {} SUI", format_sui(receipt.amount_mist));
    Ok(())
}
