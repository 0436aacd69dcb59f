//! sequential multi-party partial decryption
//!
//! every player strips its own masking layer from a slot by publishing
//! `share = sk * c0` together with a dlog-equality proof
//! `log_G(pk) = log_c0(share)`. the first contribution to a slot opens a
//! [`DecryptionAccumulator`] from the compressed ciphertext and derives the
//! slot's [`DeltaPair`]; later contributions work on the stored accumulator.
//!
//! shares only depend on c0, which decryption never changes, so contributions
//! commute: any order of the same set of shares yields the same accumulator.

use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_POINT as G,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    deck::{DeckState, SlotCipher, SlotIndex},
    elgamal::{Ciphertext, CompressedCiphertext},
    keys::{Keypair, PlayerId, PlayerRecord, SecretKey},
    service::{Proof, ProofRequest, ProofService, SessionId},
    transcript::{Blake2Transcript, ProtocolTranscript},
    DeckError, Result,
};

/// per-slot binding values, fixed by the first contribution
///
/// each is a hash-to-scalar of one compressed coordinate of the slot's
/// ciphertext as it stood before any layer was stripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaPair {
    pub d0: Scalar,
    pub d1: Scalar,
}

impl DeltaPair {
    pub fn derive(ciphertext: &CompressedCiphertext) -> Self {
        Self {
            d0: hash_coordinate(b"c0", &ciphertext.c0),
            d1: hash_coordinate(b"c1", &ciphertext.c1),
        }
    }
}

fn hash_coordinate(label: &[u8], point: &CompressedRistretto) -> Scalar {
    let mut t = Blake2Transcript::new(b"zk-deck.delta.v1");
    t.append_message(label, point.as_bytes());
    t.challenge_scalar(b"delta")
}

/// running decryption state of a slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionAccumulator {
    /// ephemeral key, unchanged by decryption
    pub c0: RistrettoPoint,
    /// c1 with every accepted share subtracted
    pub c1: RistrettoPoint,
    pub delta: DeltaPair,
}

impl DecryptionAccumulator {
    /// accumulator for a slot nobody has decrypted yet
    pub fn open(ciphertext: &CompressedCiphertext) -> Result<Self> {
        let Ciphertext { c0, c1 } = ciphertext.decompress()?;
        Ok(Self {
            c0,
            c1,
            delta: DeltaPair::derive(ciphertext),
        })
    }

    /// strip one layer
    pub fn apply(&self, share: &RistrettoPoint) -> Self {
        Self {
            c0: self.c0,
            c1: self.c1 - share,
            delta: self.delta,
        }
    }

    pub fn ciphertext(&self) -> Ciphertext {
        Ciphertext::new(self.c0, self.c1)
    }

    pub fn to_bytes(&self) -> [u8; 128] {
        let mut bytes = [0u8; 128];
        bytes[..64].copy_from_slice(&self.ciphertext().to_bytes());
        bytes[64..96].copy_from_slice(self.delta.d0.as_bytes());
        bytes[96..].copy_from_slice(self.delta.d1.as_bytes());
        bytes
    }
}

/// public inputs of a partial decryption proof
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecryptionStatement {
    pub public_key: RistrettoPoint,
    pub c0: RistrettoPoint,
    pub share: RistrettoPoint,
}

#[derive(Clone, Copy)]
pub struct DecryptionWitness<'a> {
    pub secret: &'a SecretKey,
}

/// chaum-pedersen proof that `share` was computed with the player's key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecryptionProof {
    /// R = k * G
    pub commitment_g: RistrettoPoint,
    /// S = k * c0
    pub commitment_c0: RistrettoPoint,
    /// z = k + c * sk
    pub response: Scalar,
}

impl DecryptionProof {
    fn transcript(statement: &DecryptionStatement, context: &[u8]) -> Blake2Transcript {
        let mut t = Blake2Transcript::new(b"zk-deck.decryption.v1");
        t.append_message(b"context", context);
        t.append_point(b"pk", &statement.public_key);
        t.append_point(b"c0", &statement.c0);
        t.append_point(b"share", &statement.share);
        t
    }

    /// deterministic: the nonce is derived from the transcript and the key
    pub fn prove(
        statement: &DecryptionStatement,
        witness: DecryptionWitness<'_>,
        context: &[u8],
    ) -> Result<Self> {
        let sk = witness.secret.scalar();
        if sk * G != statement.public_key || sk * statement.c0 != statement.share {
            return Err(DeckError::InconsistentWitness);
        }

        let mut t = Self::transcript(statement, context);
        let k = t.witness_scalar(b"k", sk);
        let commitment_g = k * G;
        let commitment_c0 = k * statement.c0;

        t.append_point(b"R", &commitment_g);
        t.append_point(b"S", &commitment_c0);
        let c = t.challenge_scalar(b"c");

        Ok(Self {
            commitment_g,
            commitment_c0,
            response: k + c * sk,
        })
    }

    pub fn verify(&self, statement: &DecryptionStatement, context: &[u8]) -> bool {
        let mut t = Self::transcript(statement, context);
        t.append_point(b"R", &self.commitment_g);
        t.append_point(b"S", &self.commitment_c0);
        let c = t.challenge_scalar(b"c");

        self.response * G == self.commitment_g + c * statement.public_key
            && self.response * statement.c0 == self.commitment_c0 + c * statement.share
    }

    pub fn to_bytes(&self) -> [u8; 96] {
        let mut bytes = [0u8; 96];
        bytes[..32].copy_from_slice(self.commitment_g.compress().as_bytes());
        bytes[32..64].copy_from_slice(self.commitment_c0.compress().as_bytes());
        bytes[64..].copy_from_slice(self.response.as_bytes());
        bytes
    }
}

/// one player's layer removal for one slot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialDecryptionContribution {
    pub slot: SlotIndex,
    pub player: PlayerId,
    /// sk * c0
    pub share: RistrettoPoint,
    /// present only when the contribution opens the slot
    pub delta: Option<DeltaPair>,
    pub proof: Proof,
}

impl PartialDecryptionContribution {
    /// computed against a slot without prior contributions
    pub fn is_first(&self) -> bool {
        self.delta.is_some()
    }
}

/// contributions of one player, applied all-or-nothing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealProposal {
    pub player: PlayerId,
    pub contributions: Vec<PartialDecryptionContribution>,
}

impl DealProposal {
    pub fn slots(&self) -> Vec<SlotIndex> {
        self.contributions.iter().map(|c| c.slot).collect()
    }
}

/// slot indices selected by a bitmask, lowest bit first
pub fn slots_from_bitmask(mask: u64) -> Vec<SlotIndex> {
    (0..64).filter(|i| mask & (1u64 << i) != 0).collect()
}

/// a player's view of the deck for computing partial decryptions
pub struct DealRound {
    transcript: ProtocolTranscript,
    deck: DeckState,
    player: PlayerRecord,
    turn: usize,
}

impl DealRound {
    pub fn new(
        session: SessionId,
        deck: DeckState,
        players: &[PlayerRecord],
        player: PlayerId,
    ) -> Result<Self> {
        let turn = players
            .iter()
            .position(|p| p.id == player)
            .ok_or(DeckError::UnknownPlayer(player))?;
        Ok(Self {
            transcript: ProtocolTranscript::new(session),
            deck,
            player: players[turn].clone(),
            turn,
        })
    }

    pub fn deck(&self) -> &DeckState {
        &self.deck
    }

    /// partial decryption of a single slot
    pub fn prepare(
        &self,
        slot: SlotIndex,
        keypair: &Keypair,
        prover: &dyn ProofService,
    ) -> Result<PartialDecryptionContribution> {
        self.deck.ensure_dealable()?;
        if keypair.public() != self.player.public_key {
            return Err(DeckError::InconsistentWitness);
        }

        let card = self.deck.slot(slot)?;
        if card.is_complete() {
            return Err(DeckError::SlotComplete(slot));
        }
        if card.has_contributed(self.turn) {
            return Err(DeckError::PlayerAlreadyContributed {
                slot,
                player: self.player.id,
            });
        }

        let (accumulator, delta) = match &card.cipher {
            SlotCipher::Compressed(ct) => {
                let acc = DecryptionAccumulator::open(ct)?;
                let delta = acc.delta;
                (acc, Some(delta))
            }
            SlotCipher::Uncompressed(acc) => (acc.clone(), None),
        };

        let share = keypair.secret().scalar() * accumulator.c0;
        let statement = DecryptionStatement {
            public_key: self.player.public_key,
            c0: accumulator.c0,
            share,
        };
        let context = self
            .transcript
            .decryption_context(slot, self.player.id, &accumulator.delta);

        let proof = prover.prove(ProofRequest::Decryption {
            statement: &statement,
            witness: DecryptionWitness {
                secret: keypair.secret(),
            },
            context: &context,
        })?;

        debug!(
            "player {} prepared share for slot {} ({} layers left)",
            self.player.id, slot, card.layers_remaining
        );
        Ok(PartialDecryptionContribution {
            slot,
            player: self.player.id,
            share,
            delta,
            proof,
        })
    }

    /// partial decryptions for several slots, submitted as one proposal
    pub fn prepare_batch(
        &self,
        slots: &[SlotIndex],
        keypair: &Keypair,
        prover: &dyn ProofService,
    ) -> Result<DealProposal> {
        if slots.is_empty() {
            return Err(DeckError::EmptyBatch);
        }
        for (i, slot) in slots.iter().enumerate() {
            if slots[..i].contains(slot) {
                return Err(DeckError::DuplicateSlotInBatch(*slot));
            }
        }

        let contributions = slots
            .iter()
            .map(|&slot| self.prepare(slot, keypair, prover))
            .collect::<Result<Vec<_>>>()?;

        Ok(DealProposal {
            player: self.player.id,
            contributions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elgamal::encode_card;
    use proptest::prelude::*;
    use rand::{rngs::OsRng, rngs::StdRng, seq::SliceRandom, SeedableRng};

    fn masked_card(keys: &[Keypair], card: u32) -> CompressedCiphertext {
        let apk: RistrettoPoint = keys.iter().map(|k| k.public()).sum();
        let (ct, _) = Ciphertext::encrypt(&encode_card(card), &apk, &mut OsRng);
        ct.compress()
    }

    #[test]
    fn test_delta_pair_binds_both_coordinates() {
        let keys: Vec<_> = (0..2).map(|_| Keypair::generate(&mut OsRng)).collect();
        let ct = masked_card(&keys, 1);
        let delta = DeltaPair::derive(&ct);
        assert_eq!(delta, DeltaPair::derive(&ct));
        assert_ne!(delta.d0, delta.d1);

        let other = masked_card(&keys, 1);
        assert_ne!(DeltaPair::derive(&other), delta);
    }

    #[test]
    fn test_stripping_all_layers_recovers_card() {
        let keys: Vec<_> = (0..3).map(|_| Keypair::generate(&mut OsRng)).collect();
        let ct = masked_card(&keys, 17);

        let mut acc = DecryptionAccumulator::open(&ct).unwrap();
        for k in &keys {
            acc = acc.apply(&(k.secret().scalar() * acc.c0));
        }
        assert_eq!(acc.c1, encode_card(17));
    }

    #[test]
    fn test_decryption_proof() {
        let kp = Keypair::generate(&mut OsRng);
        let c0 = Scalar::random(&mut OsRng) * G;
        let statement = DecryptionStatement {
            public_key: kp.public(),
            c0,
            share: kp.secret().scalar() * c0,
        };
        let witness = DecryptionWitness { secret: kp.secret() };

        let proof = DecryptionProof::prove(&statement, witness, b"ctx").unwrap();
        assert!(proof.verify(&statement, b"ctx"));
        assert!(!proof.verify(&statement, b"other ctx"));

        // deterministic
        assert_eq!(DecryptionProof::prove(&statement, witness, b"ctx").unwrap(), proof);
    }

    #[test]
    fn test_decryption_proof_rejects_wrong_share() {
        let kp = Keypair::generate(&mut OsRng);
        let c0 = Scalar::random(&mut OsRng) * G;
        let statement = DecryptionStatement {
            public_key: kp.public(),
            c0,
            share: kp.secret().scalar() * c0,
        };
        let proof =
            DecryptionProof::prove(&statement, DecryptionWitness { secret: kp.secret() }, b"ctx")
                .unwrap();

        let forged = DecryptionStatement {
            share: statement.share + G,
            ..statement
        };
        assert!(!proof.verify(&forged, b"ctx"));
        assert_eq!(
            DecryptionProof::prove(&forged, DecryptionWitness { secret: kp.secret() }, b"ctx"),
            Err(DeckError::InconsistentWitness)
        );
    }

    #[test]
    fn test_slots_from_bitmask() {
        assert_eq!(slots_from_bitmask(0), Vec::<SlotIndex>::new());
        assert_eq!(slots_from_bitmask(0b1010_0001), vec![0, 5, 7]);
        assert_eq!(slots_from_bitmask(1 << 63), vec![63]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_decryption_order_independent(players in 2usize..6, card in 0u32..52, seed in any::<u64>()) {
            let keys: Vec<_> = (0..players)
                .map(|i| Keypair::from_secret(Scalar::from(seed.wrapping_add(i as u64 + 1))))
                .collect();
            let ct = masked_card(&keys, card);
            let start = DecryptionAccumulator::open(&ct).unwrap();
            let shares: Vec<_> = keys.iter().map(|k| k.secret().scalar() * start.c0).collect();

            let mut order: Vec<usize> = (0..players).collect();
            order.shuffle(&mut StdRng::seed_from_u64(seed));

            let forward = shares.iter().fold(start.clone(), |acc, s| acc.apply(s));
            let shuffled = order.iter().fold(start.clone(), |acc, &i| acc.apply(&shares[i]));

            prop_assert_eq!(&forward, &shuffled);
            prop_assert_eq!(forward.c1, encode_card(card));
        }
    }
}
