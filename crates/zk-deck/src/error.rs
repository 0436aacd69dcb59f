//! error taxonomy for deck protocol operations

use thiserror::Error;

use crate::{deck::SlotIndex, keys::PlayerId, service::SessionId};

/// how a caller is expected to react to an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// bad registration input; retry with corrected input
    Registration,
    /// protocol misuse by the caller; surfaced, never retried
    Sequencing,
    /// proof did not verify; only a freshly generated witness can recover
    ProofRejection,
    /// upstream corruption; the slot is lost
    Fatal,
    /// malformed input (sizes, encodings, configuration)
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeckError {
    #[error("player {0} is already registered")]
    DuplicateRegistration(PlayerId),

    #[error("registration is closed")]
    RegistrationClosed,

    #[error("at least {required} players required, {registered} registered")]
    InsufficientPlayers { required: usize, registered: usize },

    #[error("registration full: at most {limit} players")]
    TooManyPlayers { limit: usize },

    #[error("public key of player {0} is the identity")]
    InvalidPublicKey(PlayerId),

    #[error("key ownership proof for player {0} does not verify")]
    InvalidKeyProof(PlayerId),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("aggregate key not finalized")]
    KeyNotFinalized,

    #[error("player {player} shuffled out of turn (expected {expected:?})")]
    OutOfTurnShuffle {
        player: PlayerId,
        expected: Option<PlayerId>,
    },

    #[error("dealing requires shuffle version {required}, deck is at {current}")]
    DealBeforeShuffleComplete { current: u32, required: u32 },

    #[error("player {player} already contributed to slot {slot}")]
    PlayerAlreadyContributed { slot: SlotIndex, player: PlayerId },

    #[error("slot {0} has no masking layers left")]
    SlotComplete(SlotIndex),

    #[error("unknown slot {0}")]
    UnknownSlot(SlotIndex),

    #[error("batch contains no slots")]
    EmptyBatch,

    #[error("slot {0} appears twice in one batch")]
    DuplicateSlotInBatch(SlotIndex),

    #[error("proposal built on stale state: {0}")]
    StaleState(String),

    #[error("shuffle proof rejected: {0}")]
    ShuffleRejected(String),

    #[error("decryption proof rejected for slot {slot}: {reason}")]
    ProofRejected { slot: SlotIndex, reason: String },

    #[error("witness inconsistent with statement")]
    InconsistentWitness,

    #[error("proof kind does not match submission")]
    CircuitMismatch,

    #[error("slot {slot} still has {layers_remaining} masking layers")]
    SlotNotComplete {
        slot: SlotIndex,
        layers_remaining: u32,
    },

    #[error("slot {0} does not unmask to any card encoding")]
    UnknownEncoding(SlotIndex),

    #[error("deck size mismatch: expected {expected}, got {got}")]
    DeckSizeMismatch { expected: usize, got: usize },

    #[error("invalid permutation: not a bijection")]
    InvalidPermutation,

    #[error("invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {0} already exists")]
    SessionExists(SessionId),
}

impl DeckError {
    pub fn kind(&self) -> ErrorKind {
        use DeckError::*;
        match self {
            DuplicateRegistration(_)
            | RegistrationClosed
            | InsufficientPlayers { .. }
            | TooManyPlayers { .. }
            | InvalidPublicKey(_)
            | InvalidKeyProof(_) => ErrorKind::Registration,

            UnknownPlayer(_)
            | KeyNotFinalized
            | OutOfTurnShuffle { .. }
            | DealBeforeShuffleComplete { .. }
            | PlayerAlreadyContributed { .. }
            | SlotComplete(_)
            | UnknownSlot(_)
            | EmptyBatch
            | DuplicateSlotInBatch(_)
            | StaleState(_)
            | SlotNotComplete { .. }
            | UnknownSession(_)
            | SessionExists(_) => ErrorKind::Sequencing,

            ShuffleRejected(_) | ProofRejected { .. } | InconsistentWitness | CircuitMismatch => {
                ErrorKind::ProofRejection
            }

            UnknownEncoding(_) => ErrorKind::Fatal,

            DeckSizeMismatch { .. }
            | InvalidPermutation
            | InvalidEncoding(_)
            | InvalidConfig(_) => ErrorKind::Malformed,
        }
    }

    /// registration errors are the only ones fixed by resubmitting corrected input
    pub fn is_caller_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Registration
    }
}

pub type Result<T> = core::result::Result<T, DeckError>;
