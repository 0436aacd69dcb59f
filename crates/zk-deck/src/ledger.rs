//! in-memory verifier gateway
//!
//! holds the canonical state of every session. a submission is verified
//! against a snapshot under the read lock, then committed under the write
//! lock; if the deck moved in between, it is checked again against the
//! current deck before anything is written.

use std::collections::HashMap;

use curve25519_dalek::ristretto::RistrettoPoint;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    deal::{DealProposal, DealRound, DecryptionAccumulator, DecryptionStatement, PartialDecryptionContribution},
    deck::{DeckState, OpenedCard, SlotCipher, SlotIndex},
    keys::{AggregatePublicKey, KeyAggregator, KeyOwnershipProof, PlayerId, PlayerRecord},
    reveal::RevealEngine,
    service::{Proof, SessionId, Submission, VerifierGateway},
    shuffle::{ShuffleRound, ShuffleStatement, ShuffleSubmission, ShuffleVerifier},
    transcript::ProtocolTranscript,
    DeckError, GameConfig, Result,
};

struct SessionState {
    config: GameConfig,
    keys: KeyAggregator,
    transcript: ProtocolTranscript,
    reveal: RevealEngine,
    /// present once registration is finalized
    deck: Option<DeckState>,
}

impl SessionState {
    fn deck(&self) -> Result<&DeckState> {
        self.deck.as_ref().ok_or(DeckError::KeyNotFinalized)
    }

    fn evaluate(&self, deck: &DeckState, submission: &Submission) -> Result<DeckState> {
        let aggregate = self.keys.aggregate().ok_or(DeckError::KeyNotFinalized)?;
        match submission {
            Submission::Shuffle(shuffle) => self.evaluate_shuffle(deck, &aggregate, shuffle),
            Submission::Deal(proposal) => self.evaluate_deal(deck, proposal),
        }
    }

    fn evaluate_shuffle(
        &self,
        deck: &DeckState,
        aggregate: &AggregatePublicKey,
        submission: &ShuffleSubmission,
    ) -> Result<DeckState> {
        let expected = self.keys.shuffler_for(deck.shuffle_version());
        if expected != Some(submission.player) {
            return Err(DeckError::OutOfTurnShuffle {
                player: submission.player,
                expected,
            });
        }
        if submission.base_version != deck.shuffle_version() {
            return Err(DeckError::StaleState(format!(
                "shuffle built on version {}, deck is at {}",
                submission.base_version,
                deck.shuffle_version()
            )));
        }
        if submission.base_commitment != deck.commitment() {
            return Err(DeckError::StaleState("shuffle built on a different deck".into()));
        }
        if submission.deck.len() != deck.len() {
            return Err(DeckError::DeckSizeMismatch {
                expected: deck.len(),
                got: submission.deck.len(),
            });
        }
        let proof = match &submission.proof {
            Proof::Shuffle(proof) => proof,
            Proof::Decryption(_) => return Err(DeckError::CircuitMismatch),
        };

        let statement = ShuffleStatement {
            pk: *aggregate.point(),
            input: deck.ciphertexts()?,
            output: submission
                .deck
                .iter()
                .map(|ct| ct.decompress())
                .collect::<Result<Vec<_>>>()?,
        };
        let context =
            self.transcript
                .shuffle_context(deck.shuffle_version(), submission.player, aggregate.point());
        ShuffleVerifier::verify(&statement, proof, &context)?;

        deck.with_shuffled(&submission.deck)
    }

    fn evaluate_deal(&self, deck: &DeckState, proposal: &DealProposal) -> Result<DeckState> {
        deck.ensure_dealable()?;
        if proposal.contributions.is_empty() {
            return Err(DeckError::EmptyBatch);
        }
        let turn = self.keys.turn_of(proposal.player)?;
        let public_key = self.keys.player(proposal.player)?.public_key;

        let mut next = deck.clone();
        let mut seen: Vec<SlotIndex> = Vec::with_capacity(proposal.contributions.len());
        for contribution in &proposal.contributions {
            if seen.contains(&contribution.slot) {
                return Err(DeckError::DuplicateSlotInBatch(contribution.slot));
            }
            seen.push(contribution.slot);
            self.apply_contribution(&mut next, proposal.player, turn, &public_key, contribution)?;
        }
        Ok(next)
    }

    fn apply_contribution(
        &self,
        deck: &mut DeckState,
        player: PlayerId,
        turn: usize,
        public_key: &RistrettoPoint,
        contribution: &PartialDecryptionContribution,
    ) -> Result<()> {
        let slot = contribution.slot;
        if contribution.player != player {
            return Err(DeckError::ProofRejected {
                slot,
                reason: format!(
                    "contribution of player {} inside proposal of player {}",
                    contribution.player, player
                ),
            });
        }

        let card = deck.slot(slot)?;
        if card.is_complete() {
            return Err(DeckError::SlotComplete(slot));
        }
        if card.has_contributed(turn) {
            return Err(DeckError::PlayerAlreadyContributed { slot, player });
        }

        let accumulator = match (&card.cipher, &contribution.delta) {
            (SlotCipher::Compressed(ct), Some(delta)) => {
                let acc = DecryptionAccumulator::open(ct)?;
                if acc.delta != *delta {
                    return Err(DeckError::StaleState(format!(
                        "delta pair for slot {slot} does not match the deck"
                    )));
                }
                acc
            }
            (SlotCipher::Compressed(_), None) => {
                return Err(DeckError::StaleState(format!(
                    "slot {slot} has no decryption in progress"
                )))
            }
            // first-path contribution that lost the race to another player
            (SlotCipher::Uncompressed(acc), Some(delta)) if acc.delta == *delta => acc.clone(),
            (SlotCipher::Uncompressed(_), Some(_)) => {
                return Err(DeckError::StaleState(format!(
                    "delta pair for slot {slot} does not match the accumulator"
                )))
            }
            (SlotCipher::Uncompressed(acc), None) => acc.clone(),
        };

        let proof = match &contribution.proof {
            Proof::Decryption(proof) => proof,
            Proof::Shuffle(_) => return Err(DeckError::CircuitMismatch),
        };
        let statement = DecryptionStatement {
            public_key: *public_key,
            c0: accumulator.c0,
            share: contribution.share,
        };
        let context = self
            .transcript
            .decryption_context(slot, player, &accumulator.delta);
        if !proof.verify(&statement, &context) {
            return Err(DeckError::ProofRejected {
                slot,
                reason: "dlog equality check failed".into(),
            });
        }

        deck.slot_mut(slot)?
            .record(turn, accumulator.apply(&contribution.share));
        Ok(())
    }
}

/// in-memory [`VerifierGateway`] keyed by session
#[derive(Default)]
pub struct Ledger {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl Ledger {
    /// ledger with no sessions
    pub fn new() -> Self {
        Self::default()
    }

    /// open a session for registration; `SessionExists` if the id is taken
    pub fn create_session(&self, session: SessionId, config: GameConfig) -> Result<()> {
        config.validate()?;
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session) {
            return Err(DeckError::SessionExists(session));
        }

        sessions.insert(
            session,
            SessionState {
                keys: KeyAggregator::new(&config),
                transcript: ProtocolTranscript::new(session),
                reveal: RevealEngine::new(&config),
                config,
                deck: None,
            },
        );
        info!("created session {}", session);
        Ok(())
    }

    /// register a player; the key ownership proof is mandatory
    pub fn register_player(
        &self,
        session: SessionId,
        player: PlayerId,
        display_name: impl Into<String>,
        public_key: RistrettoPoint,
        proof: &KeyOwnershipProof,
    ) -> Result<PlayerRecord> {
        let mut sessions = self.sessions.write();
        let state = sessions
            .get_mut(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        state
            .keys
            .register_with_proof(player, display_name, public_key, proof)
    }

    /// close registration, derive the aggregate key and lay out the deck
    pub fn finalize_registration(&self, session: SessionId) -> Result<AggregatePublicKey> {
        let mut sessions = self.sessions.write();
        let state = sessions
            .get_mut(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        if let (Some(aggregate), Some(_)) = (state.keys.aggregate(), &state.deck) {
            return Ok(aggregate);
        }

        let mut keys = state.keys.clone();
        let aggregate = keys.finalize_aggregate_key()?;
        let deck = DeckState::initial(&state.config, keys.player_count())?;

        info!(
            "session {} registration closed with {} players, {} cards",
            session,
            keys.player_count(),
            deck.len()
        );
        state.keys = keys;
        state.deck = Some(deck);
        Ok(aggregate)
    }

    pub fn query_aggregate_key(&self, session: SessionId) -> Result<AggregatePublicKey> {
        let sessions = self.sessions.read();
        let state = sessions
            .get(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        state.keys.aggregate().ok_or(DeckError::KeyNotFinalized)
    }

    /// registered players in turn order
    pub fn query_players(&self, session: SessionId) -> Result<Vec<PlayerRecord>> {
        let sessions = self.sessions.read();
        let state = sessions
            .get(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        Ok(state.keys.players().to_vec())
    }

    /// shuffle round over the current canonical deck
    pub fn shuffle_round(&self, session: SessionId) -> Result<ShuffleRound> {
        let sessions = self.sessions.read();
        let state = sessions
            .get(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        let aggregate = state.keys.aggregate().ok_or(DeckError::KeyNotFinalized)?;
        Ok(ShuffleRound::new(
            session,
            state.deck()?.clone(),
            state.keys.players(),
            aggregate,
        ))
    }

    /// deal round for `player` over the current canonical deck
    pub fn deal_round(&self, session: SessionId, player: PlayerId) -> Result<DealRound> {
        let sessions = self.sessions.read();
        let state = sessions
            .get(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        DealRound::new(session, state.deck()?.clone(), state.keys.players(), player)
    }

    /// reveal a fully decrypted slot and record it; reopening returns the record
    pub fn open_card(&self, session: SessionId, slot: SlotIndex) -> Result<OpenedCard> {
        let mut sessions = self.sessions.write();
        let state = sessions
            .get_mut(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        let card = state.reveal.open_card(state.deck()?, slot)?;

        let deck = state.deck.as_mut().ok_or(DeckError::KeyNotFinalized)?;
        let record = deck.slot_mut(slot)?;
        if record.opened.is_none() {
            record.opened = Some(card);
            info!("session {} opened slot {} as card {}", session, slot, card);
        }
        Ok(OpenedCard { slot, card })
    }
}

impl VerifierGateway for Ledger {
    fn submit(&self, session: SessionId, submission: Submission) -> Result<DeckState> {
        let kind = submission.kind();
        let (snapshot, candidate) = {
            let sessions = self.sessions.read();
            let state = sessions
                .get(&session)
                .ok_or(DeckError::UnknownSession(session))?;
            let snapshot = state.deck()?.clone();
            let candidate = state.evaluate(&snapshot, &submission);
            (snapshot, candidate)
        };

        let mut sessions = self.sessions.write();
        let state = sessions
            .get_mut(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        let current = state.deck()?;
        let result = if *current == snapshot {
            candidate
        } else {
            debug!("session {} deck moved during verification, re-checking", session);
            state.evaluate(current, &submission)
        };

        match result {
            Ok(next) => {
                info!(
                    "session {} accepted {:?}: shuffle version {}",
                    session,
                    kind,
                    next.shuffle_version()
                );
                state.deck = Some(next.clone());
                Ok(next)
            }
            Err(err) => {
                warn!("session {} rejected {:?}: {}", session, kind, err);
                Err(err)
            }
        }
    }

    fn query_deck(&self, session: SessionId) -> Result<DeckState> {
        let sessions = self.sessions.read();
        let state = sessions
            .get(&session)
            .ok_or(DeckError::UnknownSession(session))?;
        Ok(state.deck()?.clone())
    }
}
