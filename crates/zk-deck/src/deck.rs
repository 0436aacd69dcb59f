//! canonical deck state: N card slots plus shuffle and decryption progress
//!
//! a slot starts out as a [`CompressedCiphertext`] (what shuffles write) and
//! turns into an uncompressed [`DecryptionAccumulator`] with the first
//! partial decryption. `layers_remaining` counts masking layers still on the
//! card and the contribution bitmap records which turn indices already
//! stripped theirs.

use serde::{Deserialize, Serialize};

use crate::{
    deal::DecryptionAccumulator,
    elgamal::{encode_card, Ciphertext, CompressedCiphertext},
    transcript::Blake2Transcript,
    DeckError, GameConfig, Result,
};

/// position of a card in the deck
pub type SlotIndex = usize;

/// plaintext card, in [0, N)
pub type CardIndex = u32;

/// ciphertext representation held by a slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotCipher {
    /// no partial decryption yet
    Compressed(CompressedCiphertext),
    /// at least one layer stripped
    Uncompressed(DecryptionAccumulator),
}

/// slot-level view of the decryption state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// no contributions yet
    Sealed,
    /// some but not all layers stripped
    Dealing { layers_remaining: u32 },
    /// all layers stripped, not yet opened
    Complete,
    Opened(CardIndex),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSlot {
    pub cipher: SlotCipher,
    pub layers_remaining: u32,
    /// bit i set once the player with turn index i contributed
    pub contributors: u64,
    pub opened: Option<CardIndex>,
}

impl CardSlot {
    fn sealed(ciphertext: CompressedCiphertext, layers: u32) -> Self {
        Self {
            cipher: SlotCipher::Compressed(ciphertext),
            layers_remaining: layers,
            contributors: 0,
            opened: None,
        }
    }

    pub fn status(&self) -> SlotStatus {
        if let Some(card) = self.opened {
            return SlotStatus::Opened(card);
        }
        match (&self.cipher, self.layers_remaining) {
            (_, 0) => SlotStatus::Complete,
            (SlotCipher::Compressed(_), _) => SlotStatus::Sealed,
            (SlotCipher::Uncompressed(_), layers_remaining) => SlotStatus::Dealing { layers_remaining },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.layers_remaining == 0
    }

    pub fn has_contributed(&self, turn: usize) -> bool {
        turn < 64 && self.contributors & (1u64 << turn) != 0
    }

    pub fn contribution_count(&self) -> u32 {
        self.contributors.count_ones()
    }

    /// current accumulator; opens one from the compressed ciphertext if needed
    pub fn accumulator(&self) -> Result<DecryptionAccumulator> {
        match &self.cipher {
            SlotCipher::Compressed(ct) => DecryptionAccumulator::open(ct),
            SlotCipher::Uncompressed(acc) => Ok(acc.clone()),
        }
    }

    /// store an accepted contribution's result
    pub(crate) fn record(&mut self, turn: usize, accumulator: DecryptionAccumulator) {
        self.cipher = SlotCipher::Uncompressed(accumulator);
        self.contributors |= 1u64 << turn;
        self.layers_remaining = self.layers_remaining.saturating_sub(1);
    }
}

/// card revealed to everyone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedCard {
    pub slot: SlotIndex,
    pub card: CardIndex,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckState {
    config: GameConfig,
    player_count: u32,
    shuffle_version: u32,
    slots: Vec<CardSlot>,
}

impl DeckState {
    /// deck of unmasked card encodings, slot i holding card i
    pub fn initial(config: &GameConfig, player_count: usize) -> Result<Self> {
        config.validate()?;
        if player_count < GameConfig::MIN_PLAYERS || player_count > config.max_players {
            return Err(DeckError::InvalidConfig(format!(
                "player count {player_count} outside {}..={}",
                GameConfig::MIN_PLAYERS,
                config.max_players
            )));
        }

        let layers = player_count as u32;
        let slots = (0..config.deck_size() as CardIndex)
            .map(|card| CardSlot::sealed(Ciphertext::unmasked(encode_card(card)).compress(), layers))
            .collect();

        Ok(Self {
            config: config.clone(),
            player_count: layers,
            shuffle_version: 0,
            slots,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// number of slots (N), fixed for the life of the game
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// players at finalize; also the layer count of every fresh slot
    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    /// accepted shuffles so far. the next shuffler is the player at this
    /// turn index
    pub fn shuffle_version(&self) -> u32 {
        self.shuffle_version
    }

    pub fn slots(&self) -> &[CardSlot] {
        &self.slots
    }

    /// `UnknownSlot` past the end of the deck
    pub fn slot(&self, index: SlotIndex) -> Result<&CardSlot> {
        self.slots.get(index).ok_or(DeckError::UnknownSlot(index))
    }

    pub(crate) fn slot_mut(&mut self, index: SlotIndex) -> Result<&mut CardSlot> {
        self.slots.get_mut(index).ok_or(DeckError::UnknownSlot(index))
    }

    /// every player has shuffled exactly once
    pub fn shuffling_complete(&self) -> bool {
        self.shuffle_version >= self.player_count
    }

    pub fn ensure_dealable(&self) -> Result<()> {
        if !self.shuffling_complete() {
            return Err(DeckError::DealBeforeShuffleComplete {
                current: self.shuffle_version,
                required: self.player_count,
            });
        }
        Ok(())
    }

    /// full ciphertexts of a deck nobody has started decrypting
    pub fn ciphertexts(&self) -> Result<Vec<Ciphertext>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match &slot.cipher {
                SlotCipher::Compressed(ct) => ct.decompress(),
                SlotCipher::Uncompressed(_) => Err(DeckError::StaleState(format!(
                    "slot {i} is already being decrypted"
                ))),
            })
            .collect()
    }

    /// deck after an accepted shuffle round
    pub(crate) fn with_shuffled(&self, output: &[CompressedCiphertext]) -> Result<Self> {
        if output.len() != self.slots.len() {
            return Err(DeckError::DeckSizeMismatch {
                expected: self.slots.len(),
                got: output.len(),
            });
        }
        Ok(Self {
            config: self.config.clone(),
            player_count: self.player_count,
            shuffle_version: self.shuffle_version + 1,
            slots: output
                .iter()
                .map(|ct| CardSlot::sealed(*ct, self.player_count))
                .collect(),
        })
    }

    pub fn opened_cards(&self) -> Vec<OpenedCard> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.opened.map(|card| OpenedCard { slot, card }))
            .collect()
    }

    /// binding commitment to the ciphertext contents
    pub fn commitment(&self) -> [u8; 32] {
        let mut t = Blake2Transcript::new(b"zk-deck.deck-commitment.v1");
        t.append_u64(b"version", self.shuffle_version as u64);
        for slot in &self.slots {
            match &slot.cipher {
                SlotCipher::Compressed(ct) => t.append_message(b"ct", &ct.to_bytes()),
                SlotCipher::Uncompressed(acc) => t.append_message(b"acc", &acc.to_bytes()),
            }
        }
        let mut bytes = [0u8; 32];
        t.challenge_bytes(b"commit", &mut bytes);
        bytes
    }
}

/// card suit
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Suit {
    Clubs = 0,
    Diamonds = 1,
    Hearts = 2,
    Spades = 3,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    pub fn char(self) -> char {
        match self {
            Suit::Clubs => '♣',
            Suit::Diamonds => '♦',
            Suit::Hearts => '♥',
            Suit::Spades => '♠',
        }
    }
}

/// card rank, two low through ace high
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Rank {
    Two = 0,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
            Rank::Ace => "A",
        }
    }
}

/// a card of the standard 52-card deck (index = suit * 13 + rank)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }

    pub fn from_index(index: CardIndex) -> Option<Self> {
        let suit = *Suit::ALL.get((index / 13) as usize)?;
        let rank = Rank::ALL[(index % 13) as usize];
        Some(Self { suit, rank })
    }

    pub fn to_index(self) -> CardIndex {
        self.suit as CardIndex * 13 + self.rank as CardIndex
    }
}

impl core::fmt::Display for Card {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.suit.char(), self.rank.label())
    }
}
