//! boundaries to the proving system and the ledger
//!
//! both are blocking request/response calls. proof generation is a pure
//! function of its request, and the gateway either commits a submission in
//! full or leaves the canonical state untouched.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    deal::{DealProposal, DecryptionProof, DecryptionStatement, DecryptionWitness},
    deck::DeckState,
    shuffle::{ShuffleProof, ShuffleStatement, ShuffleSubmission, ShuffleWitness},
    Result,
};

/// identifies one game on a gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// statement kinds a proof service can prove
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitKind {
    ShuffleCorrectness,
    PartialDecryptionCorrectness,
}

pub enum ProofRequest<'a> {
    Shuffle {
        statement: &'a ShuffleStatement,
        witness: &'a ShuffleWitness,
        context: &'a [u8; 32],
    },
    Decryption {
        statement: &'a DecryptionStatement,
        witness: DecryptionWitness<'a>,
        context: &'a [u8; 32],
    },
}

impl ProofRequest<'_> {
    pub fn kind(&self) -> CircuitKind {
        match self {
            ProofRequest::Shuffle { .. } => CircuitKind::ShuffleCorrectness,
            ProofRequest::Decryption { .. } => CircuitKind::PartialDecryptionCorrectness,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proof {
    Shuffle(ShuffleProof),
    Decryption(DecryptionProof),
}

impl Proof {
    pub fn kind(&self) -> CircuitKind {
        match self {
            Proof::Shuffle(_) => CircuitKind::ShuffleCorrectness,
            Proof::Decryption(_) => CircuitKind::PartialDecryptionCorrectness,
        }
    }
}

/// generates proofs; same request, same proof
pub trait ProofService: Send + Sync {
    fn prove(&self, request: ProofRequest<'_>) -> Result<Proof>;
}

/// state-advancing proposal sent to a gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Submission {
    Shuffle(ShuffleSubmission),
    Deal(DealProposal),
}

impl Submission {
    pub fn kind(&self) -> CircuitKind {
        match self {
            Submission::Shuffle(_) => CircuitKind::ShuffleCorrectness,
            Submission::Deal(_) => CircuitKind::PartialDecryptionCorrectness,
        }
    }
}

/// verifies proofs against canonical state and commits accepted proposals
pub trait VerifierGateway: Send + Sync {
    /// accepted: the new canonical deck. rejected: an error, state unchanged
    fn submit(&self, session: SessionId, submission: Submission) -> Result<DeckState>;

    fn query_deck(&self, session: SessionId) -> Result<DeckState>;
}
