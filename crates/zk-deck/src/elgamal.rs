//! elgamal ciphertexts over ristretto255 and card encodings
//!
//! a card slot is `(c0, c1) = (r*G, M + r*APK)`. shuffles re-randomize by
//! adding `(r'*G, r'*APK)`; each player strips a layer by subtracting
//! `sk_i * c0` from `c1`.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
    traits::{Identity, MultiscalarMul},
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{deck::CardIndex, DeckError, Result};

const CARD_DOMAIN_SEP: &[u8] = b"zk-deck.card-encoding.v1";

/// elgamal ciphertext over ristretto255
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ciphertext {
    /// c0 = r * G (ephemeral key)
    pub c0: RistrettoPoint,
    /// c1 = r * PK + M (encrypted message)
    pub c1: RistrettoPoint,
}

impl Ciphertext {
    pub fn new(c0: RistrettoPoint, c1: RistrettoPoint) -> Self {
        Self { c0, c1 }
    }

    /// message with no masking applied yet: (identity, M)
    pub fn unmasked(message: RistrettoPoint) -> Self {
        Self {
            c0: RistrettoPoint::identity(),
            c1: message,
        }
    }

    /// encrypt a message point with public key
    pub fn encrypt<R: RngCore + CryptoRng>(
        message: &RistrettoPoint,
        pk: &RistrettoPoint,
        rng: &mut R,
    ) -> (Self, Scalar) {
        let r = Scalar::random(rng);
        (Self::unmasked(*message).remask_with(&r, pk), r)
    }

    /// output = self + (r*G, r*PK)
    pub fn remask_with(&self, r: &Scalar, pk: &RistrettoPoint) -> Self {
        Self {
            c0: self.c0 + r * G,
            c1: self.c1 + r * pk,
        }
    }

    /// remask with fresh randomness
    pub fn remask<R: RngCore + CryptoRng>(&self, pk: &RistrettoPoint, rng: &mut R) -> (Self, Scalar) {
        let r = Scalar::random(rng);
        (self.remask_with(&r, pk), r)
    }

    /// M = c1 - sk * c0
    pub fn decrypt(&self, sk: &Scalar) -> RistrettoPoint {
        self.c1 - sk * self.c0
    }

    /// component-wise difference
    pub fn sub(&self, other: &Self) -> Self {
        Self {
            c0: self.c0 - other.c0,
            c1: self.c1 - other.c1,
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            c0: self.c0 + other.c0,
            c1: self.c1 + other.c1,
        }
    }

    pub fn scale(&self, s: &Scalar) -> Self {
        Self {
            c0: s * self.c0,
            c1: s * self.c1,
        }
    }

    /// sum(s_i * ct_i), component-wise
    pub fn weighted_sum(cts: &[Ciphertext], scalars: &[Scalar]) -> Self {
        Self {
            c0: RistrettoPoint::multiscalar_mul(scalars, cts.iter().map(|ct| ct.c0)),
            c1: RistrettoPoint::multiscalar_mul(scalars, cts.iter().map(|ct| ct.c1)),
        }
    }

    pub fn compress(&self) -> CompressedCiphertext {
        CompressedCiphertext {
            c0: self.c0.compress(),
            c1: self.c1.compress(),
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.compress().to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Option<Self> {
        CompressedCiphertext::from_bytes(bytes).decompress().ok()
    }
}

/// persisted form of a ciphertext: two 32-byte ristretto encodings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompressedCiphertext {
    pub c0: CompressedRistretto,
    pub c1: CompressedRistretto,
}

impl CompressedCiphertext {
    pub fn decompress(&self) -> Result<Ciphertext> {
        let c0 = self
            .c0
            .decompress()
            .ok_or(DeckError::InvalidEncoding("c0 is not a ristretto point"))?;
        let c1 = self
            .c1
            .decompress()
            .ok_or(DeckError::InvalidEncoding("c1 is not a ristretto point"))?;
        Ok(Ciphertext { c0, c1 })
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.c0.as_bytes());
        bytes[32..].copy_from_slice(self.c1.as_bytes());
        bytes
    }

    /// no validation happens here; [`CompressedCiphertext::decompress`] checks the points
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut c0 = [0u8; 32];
        let mut c1 = [0u8; 32];
        c0.copy_from_slice(&bytes[..32]);
        c1.copy_from_slice(&bytes[32..]);
        Self {
            c0: CompressedRistretto(c0),
            c1: CompressedRistretto(c1),
        }
    }
}

/// plaintext point for a card index
///
/// hash-to-group, so no discrete log relation between two cards is known
pub fn encode_card(card: CardIndex) -> RistrettoPoint {
    hash_to_point(CARD_DOMAIN_SEP, card as u64)
}

/// `from_uniform_bytes(blake2b(domain || index))`
pub(crate) fn hash_to_point(domain: &[u8], index: u64) -> RistrettoPoint {
    let mut hasher = Blake2b512::new();
    hasher.update(domain);
    hasher.update(index.to_le_bytes());
    let hash = hasher.finalize();

    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&hash);
    RistrettoPoint::from_uniform_bytes(&bytes)
}
