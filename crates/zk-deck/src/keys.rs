//! player keys, registration and aggregate key derivation
//!
//! registration order is turn order: the i-th registered player performs the
//! i-th shuffle and owns bit i of every slot's contribution bitmap.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G,
    ristretto::RistrettoPoint,
    scalar::Scalar,
    traits::{Identity, IsIdentity},
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{transcript::Blake2Transcript, DeckError, GameConfig, Result};

/// player identifier
pub type PlayerId = u32;

/// secret masking key; zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Scalar);

impl SecretKey {
    pub fn scalar(&self) -> &Scalar {
        &self.0
    }
}

impl core::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Clone, Debug)]
pub struct Keypair {
    secret: SecretKey,
    public: RistrettoPoint,
}

impl Keypair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_secret(Scalar::random(rng))
    }

    pub fn from_secret(secret: Scalar) -> Self {
        Self {
            public: secret * G,
            secret: SecretKey(secret),
        }
    }

    pub fn public(&self) -> RistrettoPoint {
        self.public
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// schnorr proof of knowledge of the secret key, bound to the player id
    pub fn prove_ownership<R: RngCore + CryptoRng>(
        &self,
        player: PlayerId,
        rng: &mut R,
    ) -> KeyOwnershipProof {
        let k = Scalar::random(rng);
        let commitment = k * G;
        let c = KeyOwnershipProof::challenge(player, &self.public, &commitment);
        KeyOwnershipProof {
            commitment,
            response: k + c * self.secret.scalar(),
        }
    }
}

/// schnorr proof: z*G = R + c*PK
///
/// rules out rogue keys of the form `X - sum(other keys)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOwnershipProof {
    pub commitment: RistrettoPoint,
    pub response: Scalar,
}

impl KeyOwnershipProof {
    fn challenge(player: PlayerId, pk: &RistrettoPoint, commitment: &RistrettoPoint) -> Scalar {
        let mut t = Blake2Transcript::new(b"zk-deck.key-ownership.v1");
        t.append_u64(b"player", player as u64);
        t.append_point(b"pk", pk);
        t.append_point(b"R", commitment);
        t.challenge_scalar(b"c")
    }

    pub fn verify(&self, player: PlayerId, pk: &RistrettoPoint) -> bool {
        let c = Self::challenge(player, pk, &self.commitment);
        self.response * G == self.commitment + c * pk
    }
}

/// registered player; immutable once created
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub display_name: String,
    pub public_key: RistrettoPoint,
}

/// point-sum of all registered public keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatePublicKey(pub RistrettoPoint);

impl AggregatePublicKey {
    pub fn point(&self) -> &RistrettoPoint {
        &self.0
    }
}

/// collects registrations and derives the aggregate key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyAggregator {
    players: Vec<PlayerRecord>,
    aggregate: Option<AggregatePublicKey>,
    max_players: usize,
}

impl KeyAggregator {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            players: Vec::new(),
            aggregate: None,
            max_players: config.max_players.min(GameConfig::PLAYER_LIMIT),
        }
    }

    pub fn register(
        &mut self,
        id: PlayerId,
        display_name: impl Into<String>,
        public_key: RistrettoPoint,
    ) -> Result<PlayerRecord> {
        if self.is_closed() {
            return Err(DeckError::RegistrationClosed);
        }
        if self.players.iter().any(|p| p.id == id) {
            return Err(DeckError::DuplicateRegistration(id));
        }
        if public_key.is_identity() {
            return Err(DeckError::InvalidPublicKey(id));
        }
        if self.players.len() >= self.max_players {
            return Err(DeckError::TooManyPlayers {
                limit: self.max_players,
            });
        }

        let record = PlayerRecord {
            id,
            display_name: display_name.into(),
            public_key,
        };
        debug!("registered player {} at turn {}", id, self.players.len());
        self.players.push(record.clone());
        Ok(record)
    }

    /// registration gated on a key ownership proof
    pub fn register_with_proof(
        &mut self,
        id: PlayerId,
        display_name: impl Into<String>,
        public_key: RistrettoPoint,
        proof: &KeyOwnershipProof,
    ) -> Result<PlayerRecord> {
        if !proof.verify(id, &public_key) {
            return Err(DeckError::InvalidKeyProof(id));
        }
        self.register(id, display_name, public_key)
    }

    /// sum registered keys and lock registration
    ///
    /// idempotent once closed
    pub fn finalize_aggregate_key(&mut self) -> Result<AggregatePublicKey> {
        if let Some(aggregate) = self.aggregate {
            return Ok(aggregate);
        }
        if self.players.len() < GameConfig::MIN_PLAYERS {
            return Err(DeckError::InsufficientPlayers {
                required: GameConfig::MIN_PLAYERS,
                registered: self.players.len(),
            });
        }

        let sum = self
            .players
            .iter()
            .fold(RistrettoPoint::identity(), |acc, p| acc + p.public_key);
        let aggregate = AggregatePublicKey(sum);
        self.aggregate = Some(aggregate);
        debug!("aggregate key finalized over {} players", self.players.len());
        Ok(aggregate)
    }

    pub fn is_closed(&self) -> bool {
        self.aggregate.is_some()
    }

    pub fn aggregate(&self) -> Option<AggregatePublicKey> {
        self.aggregate
    }

    pub fn players(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player(&self, id: PlayerId) -> Result<&PlayerRecord> {
        self.players
            .iter()
            .find(|p| p.id == id)
            .ok_or(DeckError::UnknownPlayer(id))
    }

    /// turn index of a player (registration order)
    pub fn turn_of(&self, id: PlayerId) -> Result<usize> {
        self.players
            .iter()
            .position(|p| p.id == id)
            .ok_or(DeckError::UnknownPlayer(id))
    }

    /// player expected to perform shuffle number `version`
    pub fn shuffler_for(&self, version: u32) -> Option<PlayerId> {
        self.players.get(version as usize).map(|p| p.id)
    }
}
