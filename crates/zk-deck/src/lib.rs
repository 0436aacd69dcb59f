//! zk-deck: proven deck state machine for mental poker
//!
//! players jointly mask a deck under an aggregate ristretto255 key, shuffle it
//! one after another with bayer-groth shuffle arguments, and
//! strip their masking layers card by card with dlog-equality proofs.
//!
//! flow:
//! ```text
//! KeyAggregator -> DeckState::initial
//!   -> ShuffleRound (once per player, in turn order)
//!   -> DealRound (once per player per slot, single or batch)
//!   -> RevealEngine::open_card
//! ```
//!
//! every state-advancing step goes through a [`service::VerifierGateway`]
//! which verifies the attached proof against the current canonical state and
//! commits atomically. [`ledger::Ledger`] is the in-memory gateway and
//! [`prover::LocalProver`] the in-process proof service.

pub mod deal;
pub mod deck;
pub mod elgamal;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod prover;
pub mod reveal;
pub mod service;
pub mod shuffle;
pub mod transcript;

#[cfg(test)]
mod tests;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub use deal::{DealProposal, DealRound, DecryptionAccumulator, DeltaPair, PartialDecryptionContribution};
pub use deck::{Card, CardIndex, CardSlot, DeckState, OpenedCard, SlotIndex, SlotStatus};
pub use elgamal::{Ciphertext, CompressedCiphertext};
pub use error::{DeckError, ErrorKind, Result};
pub use keys::{AggregatePublicKey, KeyAggregator, Keypair, PlayerId, PlayerRecord};
pub use ledger::Ledger;
pub use prover::LocalProver;
pub use reveal::RevealEngine;
pub use service::{CircuitKind, Proof, ProofService, SessionId, Submission, VerifierGateway};
pub use shuffle::{ShuffleProposal, ShuffleRound};

/// game configuration, fixed at session creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    /// number of suits
    pub suits: u32,
    /// ranks per suit
    pub ranks: u32,
    /// registration cap (bounded by the per-slot contribution bitmap)
    pub max_players: usize,
}

impl GameConfig {
    /// one bit per player in a slot's contribution bitmap
    pub const PLAYER_LIMIT: usize = 64;

    /// minimum players for a session
    pub const MIN_PLAYERS: usize = 2;

    /// config for standard 52-card deck
    pub fn standard_deck() -> Self {
        Self::custom(4, 13)
    }

    /// config for a suits x ranks deck
    pub fn custom(suits: u32, ranks: u32) -> Self {
        Self {
            suits,
            ranks,
            max_players: Self::PLAYER_LIMIT,
        }
    }

    /// same deck with a different registration cap; checked by [`GameConfig::validate`]
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players;
        self
    }

    /// number of cards (N)
    pub fn deck_size(&self) -> usize {
        (self.suits as usize) * (self.ranks as usize)
    }

    /// card index = suit * ranks + rank
    pub fn card_index(&self, suit: u32, rank: u32) -> Option<CardIndex> {
        if suit >= self.suits || rank >= self.ranks {
            return None;
        }
        Some(suit * self.ranks + rank)
    }

    /// inverse of [`GameConfig::card_index`]
    pub fn suit_and_rank(&self, card: CardIndex) -> Option<(u32, u32)> {
        if (card as usize) >= self.deck_size() {
            return None;
        }
        Some((card / self.ranks, card % self.ranks))
    }

    /// rejects decks of fewer than two cards, decks whose indices overflow
    /// `u32`, and player caps outside `MIN_PLAYERS..=PLAYER_LIMIT`
    pub fn validate(&self) -> Result<()> {
        if self.deck_size() < shuffle::MIN_SHUFFLE_CARDS {
            return Err(DeckError::InvalidConfig(format!(
                "deck must hold at least {} cards, got {}",
                shuffle::MIN_SHUFFLE_CARDS,
                self.deck_size()
            )));
        }
        if u32::try_from(self.deck_size()).is_err() {
            return Err(DeckError::InvalidConfig("deck size exceeds card index range".into()));
        }
        if self.max_players < Self::MIN_PLAYERS || self.max_players > Self::PLAYER_LIMIT {
            return Err(DeckError::InvalidConfig(format!(
                "max_players must be in {}..={}, got {}",
                Self::MIN_PLAYERS,
                Self::PLAYER_LIMIT,
                self.max_players
            )));
        }
        Ok(())
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self::standard_deck()
    }
}

/// a permutation of slot indices 0..n
///
/// mapping convention: `output[j] = input[mapping[j]]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permutation {
    mapping: Vec<usize>,
}

impl Permutation {
    /// create a permutation, rejecting anything that is not a bijection
    pub fn new(mapping: Vec<usize>) -> Result<Self> {
        let n = mapping.len();
        let mut seen = vec![false; n];

        for &idx in &mapping {
            if idx >= n || seen[idx] {
                return Err(DeckError::InvalidPermutation);
            }
            seen[idx] = true;
        }

        Ok(Self { mapping })
    }

    /// leaves every slot where it is
    pub fn identity(n: usize) -> Self {
        Self {
            mapping: (0..n).collect(),
        }
    }

    /// uniformly random permutation (fisher-yates)
    pub fn random<R: Rng>(rng: &mut R, n: usize) -> Self {
        let mut mapping: Vec<usize> = (0..n).collect();
        for i in (1..n).rev() {
            let j = rng.gen_range(0..=i);
            mapping.swap(i, j);
        }
        Self { mapping }
    }

    /// output[i] = input[mapping[i]]
    pub fn apply<T: Clone>(&self, input: &[T]) -> Vec<T> {
        self.mapping.iter().map(|&i| input[i].clone()).collect()
    }

    /// the permutation sending each input slot to its output position
    pub fn inverse(&self) -> Self {
        let mut inverse = vec![0; self.mapping.len()];
        for (target, &source) in self.mapping.iter().enumerate() {
            inverse[source] = target;
        }
        Self { mapping: inverse }
    }

    /// input slot that lands in output slot `i`; panics if `i >= len()`
    pub fn get(&self, i: usize) -> usize {
        self.mapping[i]
    }

    /// number of slots permuted
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// raw `output[j] = input[mapping[j]]` table
    pub fn mapping(&self) -> &[usize] {
        &self.mapping
    }
}
