//! mapping fully unmasked slots back to card indices

use std::collections::HashMap;

use curve25519_dalek::ristretto::RistrettoPoint;
use tracing::warn;

use crate::{
    deck::{CardIndex, DeckState, SlotIndex},
    elgamal::encode_card,
    keys::{Keypair, PlayerId, PlayerRecord},
    DeckError, GameConfig, Result,
};

/// compressed card encoding -> card index
#[derive(Clone, Debug)]
pub struct Codebook {
    entries: HashMap<[u8; 32], CardIndex>,
}

impl Codebook {
    pub fn new(deck_size: usize) -> Self {
        let entries = (0..deck_size as CardIndex)
            .map(|card| (encode_card(card).compress().to_bytes(), card))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, point: &RistrettoPoint) -> Option<CardIndex> {
        self.entries.get(point.compress().as_bytes()).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct RevealEngine {
    codebook: Codebook,
}

impl RevealEngine {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            codebook: Codebook::new(config.deck_size()),
        }
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    /// card held by a slot with every layer stripped
    pub fn open_card(&self, deck: &DeckState, slot: SlotIndex) -> Result<CardIndex> {
        let card = deck.slot(slot)?;
        if let Some(opened) = card.opened {
            return Ok(opened);
        }
        if !card.is_complete() {
            return Err(DeckError::SlotNotComplete {
                slot,
                layers_remaining: card.layers_remaining,
            });
        }

        let plaintext = card.accumulator()?.c1;
        self.codebook.lookup(&plaintext).ok_or_else(|| {
            warn!("slot {} unmasked to an unknown point", slot);
            DeckError::UnknownEncoding(slot)
        })
    }

    /// local read by the holder of the last missing layer
    ///
    /// works on a slot with exactly one layer left that belongs to `player`;
    /// nothing is published and the slot is not marked opened. the turn is
    /// looked up in `players` and `keypair` must match the registered key.
    pub fn peek_with_secret(
        &self,
        deck: &DeckState,
        slot: SlotIndex,
        players: &[PlayerRecord],
        player: PlayerId,
        keypair: &Keypair,
    ) -> Result<CardIndex> {
        let turn = players
            .iter()
            .position(|p| p.id == player)
            .ok_or(DeckError::UnknownPlayer(player))?;
        if players[turn].public_key != keypair.public() {
            return Err(DeckError::InconsistentWitness);
        }

        let card = deck.slot(slot)?;
        match card.layers_remaining {
            0 => return self.open_card(deck, slot),
            1 => {}
            layers_remaining => {
                return Err(DeckError::SlotNotComplete {
                    slot,
                    layers_remaining,
                })
            }
        }
        if card.has_contributed(turn) {
            return Err(DeckError::PlayerAlreadyContributed { slot, player });
        }

        let plaintext = card.accumulator()?.ciphertext().decrypt(keypair.secret().scalar());
        self.codebook
            .lookup(&plaintext)
            .ok_or(DeckError::UnknownEncoding(slot))
    }
}
