//! Session controller
//!
//! Owns one [`FlowState`] and feeds it events produced by the collaborators.
//! Two deployments share it: the guided flow performs each step on request
//! and only at its own step; the streamlined flow logs in in one go and
//! recomputes address and proof as soon as their inputs exist.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::Config;
use crate::error::{Result, WalletError};
use crate::models::{PendingTransfer, TransferReceipt};
use crate::oauth::{authorization_url, token_from_redirect, AuthRequest};
use crate::proof::ProofFetcher;
use crate::sdk::{self, EphemeralKeyPair};
use crate::services::chain::{Chain, SuiRpcClient};
use crate::services::faucet::FaucetClient;
use crate::services::prover::{HttpProver, Prover};
use crate::store::{Entry, SessionStore};
use crate::transfer::{check_transfer, TransferExecutor, TransferRequest};
use crate::validate::{normalize_address, positive_mist, validate_address};
use crate::workflow::{advance_while_met, apply, Event, FlowState, Node, Step};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowMode {
    /// Every intermediate value exposed, manual advancement
    Guided,
    /// Login runs steps 0-3 at once, address and proof follow automatically
    Streamlined,
}

pub struct ZkLoginSession {
    config: Config,
    mode: FlowMode,
    state: FlowState,
    store: SessionStore,
    chain: Arc<dyn Chain>,
    proofs: ProofFetcher,
    faucet: FaucetClient,
    address_tx: watch::Sender<Option<String>>,
    last_balance: Option<u64>,
}

fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

impl ZkLoginSession {
    pub fn new(
        config: &Config,
        mode: FlowMode,
        store: SessionStore,
        chain: Arc<dyn Chain>,
        prover: Arc<dyn Prover>,
        faucet: FaucetClient,
    ) -> Self {
        let (address_tx, _) = watch::channel(None);
        Self {
            config: config.clone(),
            mode,
            state: FlowState::default(),
            store,
            chain,
            proofs: ProofFetcher::new(prover),
            faucet,
            address_tx,
            last_balance: None,
        }
    }

    /// Wire the real fullnode, prover, faucet and on-disk storage.
    pub fn from_config(config: &Config, mode: FlowMode) -> Self {
        let timeout = config.request_timeout();
        Self::new(
            config,
            mode,
            SessionStore::on_disk(&config.session_dir, &config.state_dir),
            Arc::new(SuiRpcClient::new(&config.fullnode_url, config.gas_budget, timeout)),
            Arc::new(HttpProver::new(&config.prover_url, timeout)),
            FaucetClient::new(&config.faucet_url, timeout),
        )
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn mode(&self) -> FlowMode {
        self.mode
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn chain(&self) -> Arc<dyn Chain> {
        Arc::clone(&self.chain)
    }

    pub fn last_balance(&self) -> Option<u64> {
        self.last_balance
    }

    /// Follows the derived address; `None` while there is none.
    pub fn address_watch(&self) -> watch::Receiver<Option<String>> {
        self.address_tx.subscribe()
    }

    fn dispatch(&mut self, event: Event) {
        let state = std::mem::take(&mut self.state);
        self.state = apply(state, event);
        self.publish_address();
    }

    fn publish_address(&mut self) {
        let address = self.state.address.clone();
        if address.is_none() {
            self.last_balance = None;
        }
        self.address_tx.send_if_modified(|current| {
            if *current != address {
                *current = address;
                true
            } else {
                false
            }
        });
    }

    fn require_step(&self, step: Step, action: &'static str) -> Result<()> {
        if self.mode == FlowMode::Guided && self.state.step != step {
            return Err(WalletError::WrongStep { step: self.state.step.index(), action });
        }
        Ok(())
    }

    /// Load persisted entries. Anything unreadable is treated as absent.
    pub fn restore(&mut self) {
        if let Some(secret) = self.store.load_entry::<String>(Entry::EphemeralKey) {
            match EphemeralKeyPair::from_secret_base64(&secret) {
                Ok(keypair) => self.dispatch(Event::KeyPairGenerated(keypair)),
                Err(e) => tracing::warn!("ignoring stored ephemeral key: {}", e),
            }
        }
        if let Some(randomness) = self.store.load_entry::<String>(Entry::Randomness) {
            self.dispatch(Event::RandomnessGenerated(randomness));
        }
        match self.store.load_entry::<String>(Entry::UserSalt) {
            Some(salt) if is_decimal(&salt) => self.dispatch(Event::SaltSet(salt)),
            Some(_) => tracing::warn!("ignoring stored salt: not a decimal string"),
            None => {}
        }
        if let Some(max_epoch) = self.store.load_entry::<u64>(Entry::MaxEpoch) {
            self.dispatch(Event::MaxEpochRestored(max_epoch));
        }
        tracing::debug!("restored session at step {:?}", self.state.step);
    }

    pub fn next(&mut self) -> bool {
        let before = self.state.step;
        self.dispatch(Event::Next);
        before != self.state.step
    }

    pub fn back(&mut self) -> bool {
        let before = self.state.step;
        self.dispatch(Event::Back);
        before != self.state.step
    }

    /// Wipe both storage scopes and return to step 0.
    pub fn reset(&mut self) -> Result<()> {
        let cleared = self.store.clear_all();
        self.dispatch(Event::Reset);
        tracing::info!("Session reset");
        cleared
    }

    pub fn generate_keypair(&mut self) -> Result<()> {
        self.require_step(Step::EphemeralKey, "generate key pair")?;
        let keypair = EphemeralKeyPair::generate();
        self.store.save_entry(Entry::EphemeralKey, &keypair.secret_base64())?;
        self.dispatch(Event::KeyPairGenerated(keypair));
        Ok(())
    }

    /// Fetch the current epoch; max-epoch is that plus the configured offset.
    pub async fn fetch_epoch(&mut self) -> Result<u64> {
        self.require_step(Step::EpochNonce, "fetch epoch")?;
        let current = self.chain.current_epoch().await?;
        let max_epoch = current.saturating_add(self.config.max_epoch_offset);
        self.store.save_entry(Entry::MaxEpoch, &max_epoch.to_string())?;
        self.dispatch(Event::EpochFetched {
            current,
            offset: self.config.max_epoch_offset,
        });
        Ok(current)
    }

    pub fn generate_randomness(&mut self) -> Result<()> {
        self.require_step(Step::EpochNonce, "generate randomness")?;
        let randomness = sdk::generate_randomness();
        self.store.save_entry(Entry::Randomness, &randomness)?;
        self.dispatch(Event::RandomnessGenerated(randomness));
        Ok(())
    }

    pub fn derive_nonce(&mut self) -> Result<String> {
        self.require_step(Step::EpochNonce, "derive nonce")?;
        let keypair = self.state.keypair.as_ref().ok_or(WalletError::MissingInput("ephemeral key pair"))?;
        let max_epoch = self.state.max_epoch.ok_or(WalletError::MissingInput("max epoch"))?;
        let randomness = self.state.randomness.as_deref().ok_or(WalletError::MissingInput("randomness"))?;

        let nonce = sdk::nonce(keypair, max_epoch, randomness)?;
        self.dispatch(Event::NonceDerived(nonce.clone()));
        Ok(nonce)
    }

    /// Provider URL the user must visit; needs the nonce.
    pub fn authorization_url(&self) -> Result<Url> {
        let nonce = self.state.nonce.as_deref().ok_or(WalletError::MissingInput("nonce"))?;
        let request = AuthRequest::new(
            &self.config.auth_endpoint,
            &self.config.client_id,
            &self.config.redirect_uri,
            nonce,
        )
        .scope(&self.config.scope);
        authorization_url(&request)
    }

    /// Take the identity token from a redirect location. Returns `false` when
    /// the location carries no usable token; the flow just keeps waiting.
    pub fn handle_redirect(&mut self, location: &str) -> bool {
        let Some(token) = token_from_redirect(location) else {
            return false;
        };
        if token.claims.nonce.is_some() && token.claims.nonce != self.state.nonce {
            tracing::warn!("identity token nonce does not match the current nonce");
        }
        if token.claims.is_expired(chrono::Utc::now()) {
            tracing::warn!("identity token is already expired");
        }
        tracing::info!("Identity token received for subject {}", token.claims.sub);
        self.dispatch(Event::TokenReceived(token));
        true
    }

    /// The salt is created once, persisted durably and reused until reset.
    pub fn ensure_salt(&mut self) -> Result<String> {
        if let Some(salt) = &self.state.salt {
            return Ok(salt.clone());
        }
        let salt = match self.store.load_entry::<String>(Entry::UserSalt) {
            Some(stored) if is_decimal(&stored) => stored,
            _ => {
                let fresh = sdk::generate_salt();
                self.store.save_entry(Entry::UserSalt, &fresh)?;
                tracing::info!("Generated new user salt");
                fresh
            }
        };
        self.dispatch(Event::SaltSet(salt.clone()));
        Ok(salt)
    }

    pub fn generate_salt(&mut self) -> Result<String> {
        self.require_step(Step::Salt, "generate salt")?;
        self.ensure_salt()
    }

    pub fn derive_address(&mut self) -> Result<String> {
        self.require_step(Step::Address, "derive address")?;
        let token = self.state.token.as_ref().ok_or(WalletError::MissingInput("identity token"))?;
        let salt = self.state.salt.as_deref().ok_or(WalletError::MissingInput("user salt"))?;

        let address = sdk::jwt_to_address(&token.claims, salt)?;
        self.dispatch(Event::AddressDerived(address.clone()));
        Ok(address)
    }

    /// Fetch a proof for the current inputs. On failure the proof stays
    /// absent and the call can be repeated.
    pub async fn fetch_proof(&mut self) -> Result<()> {
        self.require_step(Step::Proof, "fetch proof")?;
        let inputs = self
            .state
            .proof_inputs()
            .ok_or(WalletError::MissingInput("key pair, max epoch, randomness, salt and token"))?;
        if self.state.proof.is_some() {
            return Ok(());
        }

        let key = inputs.key();
        self.dispatch(Event::ProofRequested(key.clone()));
        match self.proofs.fetch(&inputs).await {
            Ok(proof) => {
                self.dispatch(Event::ProofFetched { key, proof });
                Ok(())
            }
            Err(e) => {
                self.dispatch(Event::ProofFailed { key });
                Err(e)
            }
        }
    }

    /// Streamlined login: key pair, epoch, randomness, nonce and salt in one
    /// go. Returns the provider URL to visit.
    pub async fn login(&mut self) -> Result<Url> {
        let keypair = EphemeralKeyPair::generate();
        self.store.save_entry(Entry::EphemeralKey, &keypair.secret_base64())?;
        self.dispatch(Event::KeyPairGenerated(keypair));

        let current = self.chain.current_epoch().await?;
        let max_epoch = current.saturating_add(self.config.max_epoch_offset);
        self.store.save_entry(Entry::MaxEpoch, &max_epoch.to_string())?;
        self.dispatch(Event::EpochFetched {
            current,
            offset: self.config.max_epoch_offset,
        });

        let randomness = sdk::generate_randomness();
        self.store.save_entry(Entry::Randomness, &randomness)?;
        self.dispatch(Event::RandomnessGenerated(randomness));

        self.derive_nonce()?;
        self.ensure_salt()?;
        self.state = advance_while_met(std::mem::take(&mut self.state));
        self.authorization_url()
    }

    /// Streamlined: accept the redirect and derive everything that follows.
    pub async fn complete_login(&mut self, location: &str) -> Result<bool> {
        if !self.handle_redirect(location) {
            return Ok(false);
        }
        self.refresh().await?;
        Ok(true)
    }

    /// Recompute derived values whose inputs are present. The guided flow
    /// recomputes nothing on its own.
    pub async fn refresh(&mut self) -> Result<()> {
        if self.mode == FlowMode::Guided {
            return Ok(());
        }
        for node in self.state.pending_recomputations() {
            match node {
                Node::Nonce => {
                    self.derive_nonce()?;
                }
                Node::Address => {
                    self.derive_address()?;
                }
                Node::Proof => {
                    self.fetch_proof().await?;
                }
                _ => {}
            }
        }
        self.state = advance_while_met(std::mem::take(&mut self.state));
        Ok(())
    }

    pub async fn balance(&mut self) -> Result<Option<u64>> {
        let Some(address) = self.state.address.clone() else {
            return Ok(None);
        };
        let balance = self.chain.balance(&address).await?;
        self.last_balance = Some(balance);
        Ok(Some(balance))
    }

    pub async fn request_faucet(&self) -> Result<()> {
        let address = self.state.address.as_deref().ok_or(WalletError::MissingInput("address"))?;
        self.faucet.request(address).await
    }

    /// Validate a transfer and hold it for confirmation.
    pub async fn prepare_transfer(&mut self, recipient: &str, amount: &str) -> Result<PendingTransfer> {
        if self.state.step != Step::Execute {
            return Err(WalletError::WrongStep { step: self.state.step.index(), action: "send" });
        }
        if self.state.proof.is_none() {
            return Err(WalletError::MissingInput("zk proof"));
        }

        // malformed input never reaches the chain
        validate_address(recipient)?;
        positive_mist(amount)?;
        let recipient = normalize_address(recipient);

        let known_balance = match self.balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!("balance check skipped: {}", e);
                self.last_balance
            }
        };
        let amount_mist = check_transfer(&recipient, amount, known_balance)?;

        let transfer = PendingTransfer {
            recipient,
            amount: amount.trim().to_string(),
            amount_mist,
        };
        self.dispatch(Event::TransferPrepared(transfer.clone()));
        Ok(transfer)
    }

    pub fn cancel_transfer(&mut self) {
        self.dispatch(Event::TransferCancelled);
    }

    /// Execute the pending transfer. Either way the pending transfer is
    /// dropped; a failure leaves the proof in place for a retry.
    pub async fn confirm_transfer(&mut self) -> Result<TransferReceipt> {
        let pending = self
            .state
            .pending_transfer
            .clone()
            .ok_or(WalletError::MissingInput("pending transfer"))?;

        let result = {
            let state = &self.state;
            let signer = state.keypair.as_ref().ok_or(WalletError::MissingInput("ephemeral key pair"))?;
            let token = state.token.as_ref().ok_or(WalletError::MissingInput("identity token"))?;
            let request = TransferRequest {
                sender: state.address.as_deref().ok_or(WalletError::MissingInput("address"))?,
                recipient: &pending.recipient,
                amount_sui: &pending.amount,
                signer,
                jwt_sub: &token.claims.sub,
                jwt_aud: token
                    .claims
                    .aud
                    .primary()
                    .ok_or(WalletError::MissingInput("token audience"))?,
                user_salt: state.salt.as_deref().ok_or(WalletError::MissingInput("user salt"))?,
                proof: state.proof.as_ref().ok_or(WalletError::MissingInput("zk proof"))?,
                max_epoch: state.max_epoch.ok_or(WalletError::MissingInput("max epoch"))?,
                known_balance: self.last_balance,
            };
            TransferExecutor::new(self.chain.as_ref()).execute(&request).await
        };

        match result {
            Ok(receipt) => {
                self.dispatch(Event::TransferSucceeded { digest: receipt.digest.clone() });
                Ok(receipt)
            }
            Err(e) => {
                self.dispatch(Event::TransferFailed);
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for ZkLoginSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZkLoginSession")
            .field("mode", &self.mode)
            .field("step", &self.state.step)
            .finish_non_exhaustive()
    }
}

/// Poll the balance of the watched address every `every`. Ticks are no-ops
/// while no address is set; the loop ends once the session is dropped.
pub async fn poll_balance<F>(
    chain: Arc<dyn Chain>,
    mut address: watch::Receiver<Option<String>>,
    every: Duration,
    mut on_balance: F,
) where
    F: FnMut(&str, u64) + Send,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = address.borrow().clone();
                let Some(owner) = current else { continue };
                match chain.balance(&owner).await {
                    Ok(balance) => on_balance(&owner, balance),
                    Err(e) => tracing::debug!("balance poll failed: {}", e),
                }
            }
            changed = address.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ZkProof;
    use crate::oauth::tests::{fake_jwt, google_claims};
    use crate::store::Scope;
    use crate::transfer::tests::{proof, MockChain, RECIPIENT};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockProver {
        calls: AtomicUsize,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl Prover for MockProver {
        async fn prove(&self, _request: &crate::models::ProofRequest) -> Result<ZkProof> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock().unwrap() {
                return Err(WalletError::ProverRejected("invalid nonce".into()));
            }
            Ok(proof())
        }
    }

    fn session(mode: FlowMode, chain: Arc<MockChain>, prover: Arc<MockProver>) -> ZkLoginSession {
        let config = Config::load(None).unwrap();
        ZkLoginSession::new(
            &config,
            mode,
            SessionStore::in_memory(),
            chain,
            prover,
            FaucetClient::new("http://127.0.0.1:9/gas", Duration::from_secs(1)),
        )
    }

    fn redirect() -> String {
        format!("https://zklogin.example/#id_token={}", fake_jwt(google_claims()))
    }

    #[tokio::test]
    async fn streamlined_flow_reaches_execute() {
        let chain = Arc::new(MockChain { balance: 5_000_000_000, ..Default::default() });
        let prover = Arc::new(MockProver::default());
        let mut session = session(FlowMode::Streamlined, chain.clone(), prover.clone());

        let url = session.login().await.unwrap();
        assert!(url.as_str().contains("nonce="));
        assert_eq!(session.state().step, Step::IdentityToken);
        assert_eq!(session.state().max_epoch, Some(110));

        assert!(!session.complete_login("https://zklogin.example/").await.unwrap());
        assert_eq!(session.state().step, Step::IdentityToken);

        assert!(session.complete_login(&redirect()).await.unwrap());
        assert_eq!(session.state().step, Step::Execute);
        assert!(session.state().address.is_some());
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);

        session.refresh().await.unwrap();
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);

        session.prepare_transfer(RECIPIENT, "1.5").await.unwrap();
        let receipt = session.confirm_transfer().await.unwrap();
        assert_eq!(receipt.amount_mist, 1_500_000_000);
        assert_eq!(session.state().last_digest.as_deref(), Some("9Fx3digest"));
    }

    #[tokio::test]
    async fn failed_submission_allows_retry_with_same_proof() {
        let chain = Arc::new(MockChain { balance: 5_000_000_000, ..Default::default() });
        let prover = Arc::new(MockProver::default());
        let mut session = session(FlowMode::Streamlined, chain.clone(), prover.clone());
        session.login().await.unwrap();
        session.complete_login(&redirect()).await.unwrap();

        *chain.fail_execute.lock().unwrap() = true;
        session.prepare_transfer(RECIPIENT, "1").await.unwrap();
        assert!(session.confirm_transfer().await.is_err());
        assert!(session.state().pending_transfer.is_none());
        assert!(session.state().proof.is_some());
        assert_eq!(session.state().step, Step::Execute);

        *chain.fail_execute.lock().unwrap() = false;
        session.prepare_transfer(RECIPIENT, "1").await.unwrap();
        session.confirm_transfer().await.unwrap();
        assert_eq!(prover.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn insufficient_funds_blocks_prepare() {
        let chain = Arc::new(MockChain { balance: 1_000, ..Default::default() });
        let mut session = session(FlowMode::Streamlined, chain.clone(), Arc::new(MockProver::default()));
        session.login().await.unwrap();
        session.complete_login(&redirect()).await.unwrap();

        let err = session.prepare_transfer(RECIPIENT, "1").await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));
        assert!(session.state().pending_transfer.is_none());
        assert!(!chain.calls.lock().unwrap().contains(&"build_transfer"));
    }

    #[tokio::test]
    async fn malformed_transfer_input_makes_no_chain_calls() {
        let chain = Arc::new(MockChain { balance: 5_000_000_000, ..Default::default() });
        let mut session = session(FlowMode::Streamlined, chain.clone(), Arc::new(MockProver::default()));
        session.login().await.unwrap();
        session.complete_login(&redirect()).await.unwrap();
        chain.calls.lock().unwrap().clear();

        let err = session.prepare_transfer("0x1234", "1").await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidAddress(_)));
        for amount in ["0", "-2", "ten"] {
            let err = session.prepare_transfer(RECIPIENT, amount).await.unwrap_err();
            assert!(matches!(err, WalletError::InvalidAmount(_)), "{}", amount);
        }
        assert!(chain.calls.lock().unwrap().is_empty());
        assert!(session.state().pending_transfer.is_none());
    }

    #[tokio::test]
    async fn recipient_is_normalized_before_submission() {
        let chain = Arc::new(MockChain { balance: 5_000_000_000, ..Default::default() });
        let mut session = session(FlowMode::Streamlined, chain.clone(), Arc::new(MockProver::default()));
        session.login().await.unwrap();
        session.complete_login(&redirect()).await.unwrap();

        let typed = format!("  0X{}  ", RECIPIENT[2..].to_ascii_uppercase());
        let pending = session.prepare_transfer(&typed, "1").await.unwrap();
        assert_eq!(pending.recipient, RECIPIENT);

        let receipt = session.confirm_transfer().await.unwrap();
        assert_eq!(receipt.recipient, RECIPIENT);
        assert_eq!(*chain.recipients.lock().unwrap(), vec![RECIPIENT.to_string()]);
    }

    #[tokio::test]
    async fn prover_failure_is_retryable() {
        let prover = Arc::new(MockProver::default());
        *prover.fail.lock().unwrap() = true;
        let mut session = session(FlowMode::Streamlined, Arc::new(MockChain::default()), prover.clone());
        session.login().await.unwrap();

        let err = session.complete_login(&redirect()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.state().step, Step::IdentityToken);
        assert!(session.state().address.is_some());
        assert!(session.state().proof.is_none());
        assert!(session.state().pending_proof.is_none());

        *prover.fail.lock().unwrap() = false;
        session.refresh().await.unwrap();
        assert_eq!(session.state().step, Step::Execute);
    }

    #[tokio::test]
    async fn guided_actions_only_at_their_step() {
        let mut session = session(FlowMode::Guided, Arc::new(MockChain::default()), Arc::new(MockProver::default()));
        assert!(matches!(session.fetch_epoch().await, Err(WalletError::WrongStep { step: 0, .. })));
        assert!(!session.next());

        session.generate_keypair().unwrap();
        assert!(session.next());
        session.fetch_epoch().await.unwrap();
        session.generate_randomness().unwrap();
        session.derive_nonce().unwrap();
        assert!(session.authorization_url().is_ok());
        assert!(session.next());

        assert!(session.handle_redirect(&redirect()));
        assert!(session.next());
        assert!(matches!(session.derive_address(), Err(WalletError::WrongStep { step: 3, .. })));
        assert!(matches!(session.fetch_proof().await, Err(WalletError::WrongStep { step: 3, .. })));
        session.generate_salt().unwrap();
        assert!(session.next());
        assert!(matches!(session.fetch_proof().await, Err(WalletError::WrongStep { step: 4, .. })));
        assert!(matches!(session.derive_nonce(), Err(WalletError::WrongStep { step: 4, .. })));
        session.derive_address().unwrap();
        assert!(session.next());

        // guided never fetches on its own
        session.refresh().await.unwrap();
        assert!(session.state().proof.is_none());
        assert!(!session.next());
        session.fetch_proof().await.unwrap();
        assert!(session.next());
        assert_eq!(session.state().step, Step::Execute);
        assert!(!session.next());
    }

    #[tokio::test]
    async fn salt_is_reused_never_defaulted() {
        let mut session = session(FlowMode::Streamlined, Arc::new(MockChain::default()), Arc::new(MockProver::default()));
        let first = session.ensure_salt().unwrap();
        assert_ne!(first, "0");
        assert_eq!(session.store().load_entry::<String>(Entry::UserSalt), Some(first.clone()));

        session.login().await.unwrap();
        assert_eq!(session.state().salt.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn reset_clears_state_and_both_scopes() {
        let mut session = session(FlowMode::Streamlined, Arc::new(MockChain::default()), Arc::new(MockProver::default()));
        session.login().await.unwrap();
        session.complete_login(&redirect()).await.unwrap();
        for entry in Entry::ALL {
            assert!(session.store().contains(entry), "{:?}", entry);
        }

        session.reset().unwrap();
        assert_eq!(session.state(), &FlowState::default());
        for entry in Entry::ALL {
            assert!(!session.store().contains(entry));
        }
        assert_eq!(*session.address_watch().borrow(), None);
    }

    #[tokio::test]
    async fn restore_skips_corrupt_entries() {
        let mut store = SessionStore::in_memory();
        store.save(Scope::Session, Entry::EphemeralKey.key(), "%%%").unwrap();
        store.save(Scope::Session, Entry::Randomness.key(), "77").unwrap();
        store.save(Scope::Durable, Entry::UserSalt.key(), "not-a-number").unwrap();
        store.save(Scope::Durable, Entry::MaxEpoch.key(), "12").unwrap();

        let config = Config::load(None).unwrap();
        let mut session = ZkLoginSession::new(
            &config,
            FlowMode::Guided,
            store,
            Arc::new(MockChain::default()),
            Arc::new(MockProver::default()),
            FaucetClient::new("http://127.0.0.1:9/gas", Duration::from_secs(1)),
        );
        session.restore();
        assert!(session.state().keypair.is_none());
        assert_eq!(session.state().randomness.as_deref(), Some("77"));
        assert!(session.state().salt.is_none());
        assert_eq!(session.state().max_epoch, Some(12));
        assert_eq!(session.state().step, Step::EphemeralKey);
    }

    #[tokio::test]
    async fn polling_follows_address() {
        let chain = Arc::new(MockChain { balance: 42, ..Default::default() });
        let (tx, rx) = watch::channel(None::<String>);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let poller = tokio::spawn(poll_balance(chain.clone(), rx, Duration::from_millis(10), move |owner, balance| {
            sink.lock().unwrap().push((owner.to_string(), balance));
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().is_empty());

        tx.send_replace(Some("0xabc".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(seen.lock().unwrap().iter().any(|(owner, b)| owner == "0xabc" && *b == 42));

        tx.send_replace(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let count = seen.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().len(), count);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), poller).await.unwrap().unwrap();
    }
}
