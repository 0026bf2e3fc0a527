//! Workflow state machine
//!
//! One record holds every value the flow produces; transitions are pure
//! `(state, event) -> state` functions. Derived values list their inputs in
//! [`Node::inputs`], and replacing any input clears everything downstream of
//! it. After each event the step is pulled back to the first unmet gate, so
//! the machine never sits past a step whose product is gone.

use crate::models::{PendingTransfer, ZkProof};
use crate::oauth::IdentityToken;
use crate::proof::{ProofInputs, ProofKey};
use crate::sdk::EphemeralKeyPair;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    #[default]
    EphemeralKey,
    EpochNonce,
    IdentityToken,
    Salt,
    Address,
    Proof,
    Execute,
}

impl Step {
    pub const ALL: [Step; 7] = [
        Step::EphemeralKey,
        Step::EpochNonce,
        Step::IdentityToken,
        Step::Salt,
        Step::Address,
        Step::Proof,
        Step::Execute,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::EphemeralKey => "Generate ephemeral key pair",
            Step::EpochNonce => "Fetch epoch, randomness and nonce",
            Step::IdentityToken => "Obtain and decode identity token",
            Step::Salt => "User salt",
            Step::Address => "Derive zkLogin address",
            Step::Proof => "Fetch ZK proof",
            Step::Execute => "Execute transaction",
        }
    }

    pub fn next(self) -> Option<Step> {
        Step::ALL.get(self.index() + 1).copied()
    }

    pub fn prev(self) -> Option<Step> {
        self.index().checked_sub(1).map(|i| Step::ALL[i])
    }
}

/// Values tracked by the dependency graph
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    KeyPair,
    MaxEpoch,
    Randomness,
    Nonce,
    Token,
    Salt,
    Address,
    Proof,
}

impl Node {
    pub const ALL: [Node; 8] = [
        Node::KeyPair,
        Node::MaxEpoch,
        Node::Randomness,
        Node::Nonce,
        Node::Token,
        Node::Salt,
        Node::Address,
        Node::Proof,
    ];

    /// Direct inputs. The token is bound to the nonce it was issued for.
    pub fn inputs(self) -> &'static [Node] {
        match self {
            Node::Nonce => &[Node::KeyPair, Node::MaxEpoch, Node::Randomness],
            Node::Token => &[Node::Nonce],
            Node::Address => &[Node::Token, Node::Salt],
            Node::Proof => &[
                Node::KeyPair,
                Node::MaxEpoch,
                Node::Randomness,
                Node::Salt,
                Node::Token,
            ],
            Node::KeyPair | Node::MaxEpoch | Node::Randomness | Node::Salt => &[],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowState {
    pub step: Step,
    pub keypair: Option<EphemeralKeyPair>,
    /// Only known within the session that fetched it
    pub current_epoch: Option<u64>,
    pub max_epoch: Option<u64>,
    pub randomness: Option<String>,
    pub nonce: Option<String>,
    pub token: Option<IdentityToken>,
    pub salt: Option<String>,
    pub address: Option<String>,
    pub proof: Option<ZkProof>,
    /// Key of the proof request in flight, if any
    pub pending_proof: Option<ProofKey>,
    pub pending_transfer: Option<PendingTransfer>,
    pub last_digest: Option<String>,
}

#[derive(Clone, Debug)]
pub enum Event {
    KeyPairGenerated(EphemeralKeyPair),
    EpochFetched { current: u64, offset: u64 },
    MaxEpochRestored(u64),
    RandomnessGenerated(String),
    NonceDerived(String),
    TokenReceived(IdentityToken),
    SaltSet(String),
    AddressDerived(String),
    ProofRequested(ProofKey),
    ProofFetched { key: ProofKey, proof: ZkProof },
    ProofFailed { key: ProofKey },
    TransferPrepared(PendingTransfer),
    TransferCancelled,
    TransferSucceeded { digest: String },
    TransferFailed,
    Next,
    Back,
    Reset,
}

impl FlowState {
    pub fn has(&self, node: Node) -> bool {
        match node {
            Node::KeyPair => self.keypair.is_some(),
            Node::MaxEpoch => self.max_epoch.is_some(),
            Node::Randomness => self.randomness.is_some(),
            Node::Nonce => self.nonce.is_some(),
            Node::Token => self.token.is_some(),
            Node::Salt => self.salt.is_some(),
            Node::Address => self.address.is_some(),
            Node::Proof => self.proof.is_some(),
        }
    }

    fn clear(&mut self, node: Node) {
        match node {
            Node::KeyPair => self.keypair = None,
            Node::MaxEpoch => {
                self.max_epoch = None;
                self.current_epoch = None;
            }
            Node::Randomness => self.randomness = None,
            Node::Nonce => self.nonce = None,
            Node::Token => self.token = None,
            Node::Salt => self.salt = None,
            Node::Address => self.address = None,
            Node::Proof => {
                self.proof = None;
                self.pending_proof = None;
                self.pending_transfer = None;
            }
        }
    }

    /// Whether the product of `step` exists, i.e. "Next" may leave it.
    pub fn gate(&self, step: Step) -> bool {
        match step {
            Step::EphemeralKey => self.keypair.is_some(),
            Step::EpochNonce => self.max_epoch.is_some() && self.randomness.is_some(),
            Step::IdentityToken => self.token.is_some(),
            Step::Salt => self.salt.is_some(),
            Step::Address => self.address.is_some(),
            Step::Proof => self.proof.is_some(),
            Step::Execute => false,
        }
    }

    pub fn can_next(&self) -> bool {
        self.step.next().is_some() && self.gate(self.step)
    }

    pub fn can_back(&self) -> bool {
        self.step.prev().is_some()
    }

    /// Furthest step reachable with the values currently held
    pub fn reachable_step(&self) -> Step {
        Step::ALL
            .into_iter()
            .find(|step| !self.gate(*step))
            .unwrap_or(Step::Execute)
    }

    pub fn proof_inputs(&self) -> Option<ProofInputs> {
        ProofInputs::from_state(self)
    }

    pub fn proof_key(&self) -> Option<ProofKey> {
        self.proof_inputs().map(|inputs| inputs.key())
    }

    /// Key of a proof request that should be issued now: all inputs present,
    /// no proof yet, and not already in flight.
    pub fn needs_proof_request(&self) -> Option<ProofKey> {
        if self.proof.is_some() {
            return None;
        }
        let key = self.proof_key()?;
        (self.pending_proof.as_ref() != Some(&key)).then_some(key)
    }

    /// Derived values whose inputs are all present but which are missing.
    /// The token is external and never listed.
    pub fn pending_recomputations(&self) -> Vec<Node> {
        let mut out = Vec::new();
        for node in [Node::Nonce, Node::Address] {
            if !self.has(node) && node.inputs().iter().all(|input| self.has(*input)) {
                out.push(node);
            }
        }
        if self.needs_proof_request().is_some() {
            out.push(Node::Proof);
        }
        out
    }
}

/// Replace `slot` with `value`, reporting whether an existing, different
/// value was overwritten (the only case that invalidates dependents).
fn replace<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    let replaced = matches!(slot, Some(old) if *old != value);
    *slot = Some(value);
    replaced
}

fn invalidate_dependents(state: &mut FlowState, changed: Node) {
    for node in Node::ALL {
        if node.inputs().contains(&changed) {
            if state.has(node) {
                tracing::debug!("{:?} changed, clearing {:?}", changed, node);
            }
            state.clear(node);
            invalidate_dependents(state, node);
        }
    }
}

fn set_input<T: PartialEq>(state: &mut FlowState, node: Node, value: T, slot: fn(&mut FlowState) -> &mut Option<T>) {
    if replace(slot(state), value) {
        invalidate_dependents(state, node);
    }
}

pub fn apply(mut state: FlowState, event: Event) -> FlowState {
    match event {
        Event::KeyPairGenerated(keypair) => {
            set_input(&mut state, Node::KeyPair, keypair, |s| &mut s.keypair);
        }
        Event::EpochFetched { current, offset } => {
            state.current_epoch = Some(current);
            set_input(&mut state, Node::MaxEpoch, current.saturating_add(offset), |s| &mut s.max_epoch);
        }
        Event::MaxEpochRestored(max_epoch) => {
            set_input(&mut state, Node::MaxEpoch, max_epoch, |s| &mut s.max_epoch);
        }
        Event::RandomnessGenerated(randomness) => {
            set_input(&mut state, Node::Randomness, randomness, |s| &mut s.randomness);
        }
        Event::NonceDerived(nonce) => {
            if Node::Nonce.inputs().iter().all(|input| state.has(*input)) {
                set_input(&mut state, Node::Nonce, nonce, |s| &mut s.nonce);
            }
        }
        Event::TokenReceived(token) => {
            set_input(&mut state, Node::Token, token, |s| &mut s.token);
        }
        Event::SaltSet(salt) => {
            set_input(&mut state, Node::Salt, salt, |s| &mut s.salt);
        }
        Event::AddressDerived(address) => {
            if Node::Address.inputs().iter().all(|input| state.has(*input)) {
                state.address = Some(address);
            }
        }
        Event::ProofRequested(key) => {
            if state.proof_key().as_ref() == Some(&key) {
                state.pending_proof = Some(key);
            }
        }
        Event::ProofFetched { key, proof } => {
            if state.proof_key().as_ref() == Some(&key) {
                state.proof = Some(proof);
                state.pending_proof = None;
            } else {
                tracing::debug!("discarding stale proof {:?}", key);
            }
        }
        Event::ProofFailed { key } => {
            if state.pending_proof.as_ref() == Some(&key) {
                state.pending_proof = None;
            }
        }
        Event::TransferPrepared(transfer) => {
            if state.step == Step::Execute && state.proof.is_some() {
                state.pending_transfer = Some(transfer);
            }
        }
        Event::TransferCancelled | Event::TransferFailed => {
            state.pending_transfer = None;
        }
        Event::TransferSucceeded { digest } => {
            state.pending_transfer = None;
            state.last_digest = Some(digest);
        }
        Event::Next => {
            if state.can_next() {
                state.step = state.step.next().unwrap_or(state.step);
            }
            return state;
        }
        Event::Back => {
            state.step = state.step.prev().unwrap_or(state.step);
            return state;
        }
        Event::Reset => return FlowState::default(),
    }

    state.step = state.step.min(state.reachable_step());
    state
}

/// Move forward while gates allow; used by the streamlined flow.
pub fn advance_while_met(mut state: FlowState) -> FlowState {
    while state.can_next() {
        state = apply(state, Event::Next);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IssBase64Details, ProofPoints};
    use crate::oauth::tests::{fake_jwt, google_claims};

    fn proof() -> ZkProof {
        ZkProof {
            proof_points: ProofPoints {
                a: vec!["1".into()],
                b: vec![vec!["2".into()]],
                c: vec!["3".into()],
            },
            iss_base64_details: IssBase64Details {
                value: "v".into(),
                index_mod_4: 1,
            },
            header_base64: "h".into(),
        }
    }

    fn token() -> IdentityToken {
        IdentityToken::decode(&fake_jwt(google_claims())).unwrap()
    }

    fn run(events: Vec<Event>) -> FlowState {
        events.into_iter().fold(FlowState::default(), apply)
    }

    /// Every input present, nonce and address filled in with placeholders
    fn loaded() -> FlowState {
        run(vec![
            Event::KeyPairGenerated(EphemeralKeyPair::generate()),
            Event::EpochFetched { current: 100, offset: 10 },
            Event::RandomnessGenerated("1234".into()),
            Event::NonceDerived("nonce".into()),
            Event::TokenReceived(token()),
            Event::SaltSet("5678".into()),
            Event::AddressDerived("0xabc".into()),
        ])
    }

    fn with_proof() -> FlowState {
        let state = loaded();
        let key = state.proof_key().unwrap();
        let state = apply(state, Event::ProofRequested(key.clone()));
        apply(state, Event::ProofFetched { key, proof: proof() })
    }

    #[test]
    fn step_navigation() {
        assert_eq!(Step::EphemeralKey.prev(), None);
        assert_eq!(Step::Execute.next(), None);
        assert_eq!(Step::Salt.next(), Some(Step::Address));
        assert_eq!(Step::ALL.len(), 7);
    }

    #[test]
    fn next_is_gated_back_is_not() {
        let state = FlowState::default();
        assert!(!state.can_next());
        assert!(!state.can_back());
        let state = apply(state, Event::Next);
        assert_eq!(state.step, Step::EphemeralKey);

        let state = apply(state, Event::KeyPairGenerated(EphemeralKeyPair::generate()));
        assert!(state.can_next());
        let state = apply(state, Event::Next);
        assert_eq!(state.step, Step::EpochNonce);
        assert!(!state.can_next());
        assert!(state.can_back());

        let state = apply(state, Event::EpochFetched { current: 7, offset: 10 });
        assert_eq!(state.max_epoch, Some(17));
        assert!(!state.can_next());
        let state = apply(state, Event::RandomnessGenerated("1".into()));
        assert!(state.can_next());

        let state = apply(state, Event::Back);
        assert_eq!(state.step, Step::EphemeralKey);
    }

    #[test]
    fn streamlined_advance_stops_at_first_unmet_gate() {
        let state = advance_while_met(loaded());
        assert_eq!(state.step, Step::Proof);

        let state = advance_while_met(with_proof());
        assert_eq!(state.step, Step::Execute);
        assert!(!state.can_next());
    }

    #[test]
    fn proof_gate_needs_all_five_inputs_and_a_fetch() {
        let full = loaded();
        assert!(full.proof_key().is_some());
        assert!(!full.gate(Step::Proof));

        for missing in [Node::KeyPair, Node::MaxEpoch, Node::Randomness, Node::Salt, Node::Token] {
            let mut state = loaded();
            state.clear(missing);
            assert!(state.proof_key().is_none(), "{:?}", missing);
            assert!(state.needs_proof_request().is_none());
        }

        assert!(with_proof().gate(Step::Proof));
    }

    #[test]
    fn proof_request_is_deduplicated() {
        let state = loaded();
        let key = state.needs_proof_request().unwrap();
        let state = apply(state, Event::ProofRequested(key.clone()));
        assert!(state.needs_proof_request().is_none());
        assert!(!state.pending_recomputations().contains(&Node::Proof));

        let state = apply(state, Event::ProofFailed { key: key.clone() });
        assert_eq!(state.needs_proof_request(), Some(key));
        assert!(state.proof.is_none());
    }

    #[test]
    fn stale_proof_is_discarded() {
        let state = loaded();
        let stale = state.proof_key().unwrap();
        let state = apply(state, Event::ProofRequested(stale.clone()));

        let state = apply(state, Event::SaltSet("9999".into()));
        assert!(state.pending_proof.is_none());
        assert!(state.address.is_none());

        let state = apply(state, Event::ProofFetched { key: stale, proof: proof() });
        assert!(state.proof.is_none());
        assert!(state.needs_proof_request().is_some());
    }

    #[test]
    fn new_keypair_invalidates_downstream() {
        let state = advance_while_met(with_proof());
        assert_eq!(state.step, Step::Execute);

        let state = apply(state, Event::Back);
        let state = apply(state, Event::KeyPairGenerated(EphemeralKeyPair::generate()));
        assert!(state.nonce.is_none());
        assert!(state.token.is_none());
        assert!(state.address.is_none());
        assert!(state.proof.is_none());
        assert_eq!(state.salt.as_deref(), Some("5678"));
        assert_eq!(state.step, Step::IdentityToken);
    }

    #[test]
    fn same_value_does_not_invalidate() {
        let state = with_proof();
        let state = apply(state, Event::SaltSet("5678".into()));
        let state = apply(state, Event::MaxEpochRestored(110));
        assert!(state.proof.is_some());
        assert!(state.address.is_some());
    }

    #[test]
    fn recomputation_graph() {
        let state = run(vec![
            Event::KeyPairGenerated(EphemeralKeyPair::generate()),
            Event::MaxEpochRestored(20),
            Event::RandomnessGenerated("1".into()),
        ]);
        assert_eq!(state.pending_recomputations(), vec![Node::Nonce]);

        let state = apply(state, Event::NonceDerived("n".into()));
        let state = apply(state, Event::TokenReceived(token()));
        let state = apply(state, Event::SaltSet("2".into()));
        assert_eq!(state.pending_recomputations(), vec![Node::Address, Node::Proof]);
    }

    #[test]
    fn derived_values_need_their_inputs() {
        let state = apply(FlowState::default(), Event::AddressDerived("0x1".into()));
        assert!(state.address.is_none());
        let state = apply(state, Event::NonceDerived("n".into()));
        assert!(state.nonce.is_none());
    }

    #[test]
    fn failed_transfer_keeps_proof() {
        let state = advance_while_met(with_proof());
        let transfer = PendingTransfer {
            recipient: "0x2".into(),
            amount: "1".into(),
            amount_mist: 1_000_000_000,
        };
        let state = apply(state, Event::TransferPrepared(transfer.clone()));
        assert_eq!(state.pending_transfer.as_ref(), Some(&transfer));

        let state = apply(state, Event::TransferFailed);
        assert!(state.pending_transfer.is_none());
        assert!(state.proof.is_some());
        assert_eq!(state.step, Step::Execute);

        let state = apply(state, Event::TransferPrepared(transfer));
        let state = apply(state, Event::TransferSucceeded { digest: "D1g".into() });
        assert_eq!(state.last_digest.as_deref(), Some("D1g"));
        assert!(state.proof.is_some());
    }

    #[test]
    fn transfer_needs_execute_step() {
        let state = with_proof();
        let state = apply(
            state,
            Event::TransferPrepared(PendingTransfer {
                recipient: "0x2".into(),
                amount: "1".into(),
                amount_mist: 1,
            }),
        );
        assert!(state.pending_transfer.is_none());
    }

    #[test]
    fn reset_from_any_step() {
        for steps in 0..7 {
            let mut state = with_proof();
            for _ in 0..steps {
                state = apply(state, Event::Next);
            }
            let state = apply(state, Event::Reset);
            assert_eq!(state, FlowState::default());
            assert_eq!(state.step, Step::EphemeralKey);
        }
    }
}
