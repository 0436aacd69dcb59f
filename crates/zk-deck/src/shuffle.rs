//! shuffle rounds and their proofs
//!
//! a shuffle maps `out[j] = in[mapping[j]] + (r_j * G, r_j * APK)`. the proof
//! is a bayer-groth shuffle argument with a single row:
//! - the prover commits to `pi[j] = mapping[j] + 1`, receives `x`, and commits
//!   to `x^pi[j]`
//! - multi-exponentiation argument: `sum(x^pi[j] * out[j])` re-encrypts
//!   `sum(x^(i+1) * in[i])`
//! - product argument: `prod(y * pi[j] + x^pi[j] - z) == prod(y * i + x^i - z)`
//!   over `i = 1..=n`, so the committed exponents come from a permutation
//!
//! nothing in the proof is tied to a single slot in the clear, so an observer
//! holding the input deck, the output deck and the proof learns nothing about
//! the mapping.

use std::iter;

use curve25519_dalek::{
    ristretto::RistrettoPoint, scalar::Scalar, traits::MultiscalarMul,
};
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    deck::DeckState,
    elgamal::{hash_to_point, Ciphertext, CompressedCiphertext},
    keys::{AggregatePublicKey, PlayerId, PlayerRecord},
    service::{Proof, ProofRequest, ProofService, SessionId},
    transcript::{Blake2Transcript, ProtocolTranscript},
    DeckError, Permutation, Result,
};

/// smallest deck the product argument is defined for
pub const MIN_SHUFFLE_CARDS: usize = 2;

const GENERATOR_H: &[u8] = b"zk-deck.pedersen.h.v1";
const GENERATOR_G: &[u8] = b"zk-deck.pedersen.g.v1";

/// public inputs of a shuffle proof
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShuffleStatement {
    /// aggregate key used for remasking
    pub pk: RistrettoPoint,
    /// deck before the shuffle
    pub input: Vec<Ciphertext>,
    /// deck after shuffle + remask
    pub output: Vec<Ciphertext>,
}

/// secret permutation and remasking randomness; never persisted
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ShuffleWitness {
    mapping: Vec<usize>,
    randomness: Vec<Scalar>,
}

impl ShuffleWitness {
    pub fn new(permutation: &Permutation, randomness: Vec<Scalar>) -> Result<Self> {
        Self::from_mapping(permutation.mapping().to_vec(), randomness)
    }

    /// witness from a raw mapping
    ///
    /// only bounds are checked; a mapping that repeats an index still gets a
    /// proof, which the verifier refuses.
    pub fn from_mapping(mapping: Vec<usize>, randomness: Vec<Scalar>) -> Result<Self> {
        let n = mapping.len();
        if randomness.len() != n {
            return Err(DeckError::DeckSizeMismatch {
                expected: n,
                got: randomness.len(),
            });
        }
        if mapping.iter().any(|&i| i >= n) {
            return Err(DeckError::InvalidPermutation);
        }
        Ok(Self { mapping, randomness })
    }

    pub fn random<R: RngCore + CryptoRng>(n: usize, rng: &mut R) -> Self {
        let permutation = Permutation::random(rng, n);
        Self {
            mapping: permutation.mapping().to_vec(),
            randomness: (0..n).map(|_| Scalar::random(rng)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// out[j] = in[mapping[j]] + (r_j * G, r_j * pk)
    pub fn apply(&self, input: &[Ciphertext], pk: &RistrettoPoint) -> Result<Vec<Ciphertext>> {
        if input.len() != self.len() {
            return Err(DeckError::DeckSizeMismatch {
                expected: input.len(),
                got: self.len(),
            });
        }
        Ok(self
            .mapping
            .iter()
            .zip(&self.randomness)
            .map(|(&i, r)| input[i].remask_with(r, pk))
            .collect())
    }
}

/// pedersen vector commitment key with nothing-up-my-sleeve generators
struct CommitKey {
    h: RistrettoPoint,
    g: Vec<RistrettoPoint>,
}

impl CommitKey {
    fn new(n: usize) -> Self {
        Self {
            h: hash_to_point(GENERATOR_H, 0),
            g: (0..n as u64).map(|i| hash_to_point(GENERATOR_G, i)).collect(),
        }
    }

    /// sum(values[i] * g[i]) + blind * h
    fn commit(&self, values: &[Scalar], blind: &Scalar) -> RistrettoPoint {
        debug_assert_eq!(values.len(), self.g.len());
        RistrettoPoint::multiscalar_mul(
            values.iter().chain(iter::once(blind)),
            self.g.iter().chain(iter::once(&self.h)),
        )
    }
}

/// committed vector together with its blinding factor
#[derive(Zeroize, ZeroizeOnDrop)]
struct Opening {
    values: Vec<Scalar>,
    blind: Scalar,
}

/// x, y and z of the argument, with `powers[i] = x^(i+1)`
struct PermutationChallenges {
    powers: Vec<Scalar>,
    y: Scalar,
    z: Scalar,
}

fn powers_of(x: &Scalar, n: usize) -> Vec<Scalar> {
    let mut acc = Scalar::ONE;
    (0..n)
        .map(|_| {
            acc *= x;
            acc
        })
        .collect()
}

/// bayer-groth shuffle argument for one row of `n` ciphertexts
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleProof {
    /// commitment to `mapping[j] + 1`
    pub c_pi: RistrettoPoint,
    /// commitment to `x^(mapping[j] + 1)`
    pub c_xpi: RistrettoPoint,
    pub multi_exp: MultiExpArgument,
    pub product: ProductArgument,
}

impl ShuffleProof {
    pub fn to_bytes(&self) -> Vec<u8> {
        let n = self.multi_exp.exponents.len();
        let mut bytes = Vec::with_capacity(4 + 10 * 32 + (3 * n + 4) * 32);
        bytes.extend_from_slice(&(n as u32).to_le_bytes());
        for point in [&self.c_pi, &self.c_xpi, &self.multi_exp.c_mask] {
            bytes.extend_from_slice(point.compress().as_bytes());
        }
        bytes.extend_from_slice(&self.multi_exp.ct_mask.to_bytes());
        bytes.extend_from_slice(&self.multi_exp.ct_anchor.to_bytes());
        for scalar in self
            .multi_exp
            .exponents
            .iter()
            .chain([&self.multi_exp.blind, &self.multi_exp.tau])
        {
            bytes.extend_from_slice(scalar.as_bytes());
        }
        for point in [&self.product.c_d, &self.product.c_lower, &self.product.c_upper] {
            bytes.extend_from_slice(point.compress().as_bytes());
        }
        for scalar in self
            .product
            .a_tilde
            .iter()
            .chain(&self.product.b_tilde)
            .chain([&self.product.r_tilde, &self.product.s_tilde])
        {
            bytes.extend_from_slice(scalar.as_bytes());
        }
        bytes
    }
}

/// `ct_anchor = sum(x^pi[j] * out[j]) - (rho * G, rho * pk)` with the
/// exponents taken from `c_xpi`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiExpArgument {
    pub c_mask: RistrettoPoint,
    pub ct_mask: Ciphertext,
    /// equals `sum(x^(i+1) * in[i])` for an honest shuffle
    pub ct_anchor: Ciphertext,
    /// mask + e * x^pi
    pub exponents: Vec<Scalar>,
    pub blind: Scalar,
    pub tau: Scalar,
}

impl MultiExpArgument {
    fn prove(
        key: &CommitKey,
        transcript: &ShuffleTranscript,
        nonces: &mut Blake2Transcript,
        statement: &ShuffleStatement,
        xpi: &Opening,
        randomness: &[Scalar],
    ) -> Self {
        let n = xpi.values.len();
        let mask: Vec<Scalar> = (0..n).map(|_| nonces.challenge_scalar(b"mask")).collect();
        let mask_blind = nonces.challenge_scalar(b"mask_blind");
        let tau0 = nonces.challenge_scalar(b"tau0");

        let c_mask = key.commit(&mask, &mask_blind);
        let ct_mask =
            Ciphertext::weighted_sum(&statement.output, &mask).remask_with(&tau0, &statement.pk);

        let rho = -randomness
            .iter()
            .zip(&xpi.values)
            .map(|(r, e)| r * e)
            .sum::<Scalar>();
        let ct_anchor = Ciphertext::weighted_sum(&statement.output, &xpi.values)
            .remask_with(&rho, &statement.pk);

        let e = transcript.multi_exp_challenge(&c_mask, &ct_mask, &ct_anchor);
        Self {
            c_mask,
            ct_mask,
            ct_anchor,
            exponents: mask
                .iter()
                .zip(&xpi.values)
                .map(|(m, v)| m + e * v)
                .collect(),
            blind: mask_blind + e * xpi.blind,
            tau: tau0 + e * rho,
        }
    }

    fn verify(
        &self,
        key: &CommitKey,
        transcript: &ShuffleTranscript,
        statement: &ShuffleStatement,
        c_xpi: &RistrettoPoint,
        challenges: &PermutationChallenges,
    ) -> Result<()> {
        if self.ct_anchor != Ciphertext::weighted_sum(&statement.input, &challenges.powers) {
            return Err(DeckError::ShuffleRejected(
                "multi-exponentiation does not match the input deck".into(),
            ));
        }

        let e = transcript.multi_exp_challenge(&self.c_mask, &self.ct_mask, &self.ct_anchor);
        if self.c_mask + e * c_xpi != key.commit(&self.exponents, &self.blind) {
            return Err(DeckError::ShuffleRejected(
                "exponents do not open the committed vector".into(),
            ));
        }

        let lhs = self.ct_mask.add(&self.ct_anchor.scale(&e));
        let rhs = Ciphertext::weighted_sum(&statement.output, &self.exponents)
            .remask_with(&self.tau, &statement.pk);
        if lhs != rhs {
            return Err(DeckError::ShuffleRejected(
                "output deck does not re-encrypt the anchor".into(),
            ));
        }
        Ok(())
    }
}

/// single value product argument over `a[j] = y * pi[j] + x^pi[j] - z`
///
/// `b` holds the prefix products of `a`; both are revealed only blinded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArgument {
    pub c_d: RistrettoPoint,
    pub c_lower: RistrettoPoint,
    pub c_upper: RistrettoPoint,
    pub a_tilde: Vec<Scalar>,
    pub b_tilde: Vec<Scalar>,
    pub r_tilde: Scalar,
    pub s_tilde: Scalar,
}

impl ProductArgument {
    fn prove(
        key: &CommitKey,
        transcript: &ShuffleTranscript,
        nonces: &mut Blake2Transcript,
        pi: &Opening,
        xpi: &Opening,
        challenges: &PermutationChallenges,
    ) -> Self {
        let (y, z) = (&challenges.y, &challenges.z);
        let n = pi.values.len();

        let a: Vec<Scalar> = pi
            .values
            .iter()
            .zip(&xpi.values)
            .map(|(p, v)| y * p + v - z)
            .collect();
        let b: Vec<Scalar> = a
            .iter()
            .scan(Scalar::ONE, |acc, ai| {
                *acc *= ai;
                Some(*acc)
            })
            .collect();

        let d: Vec<Scalar> = (0..n).map(|_| nonces.challenge_scalar(b"d")).collect();
        let d_blind = nonces.challenge_scalar(b"d_blind");

        // delta[0] = d[0] and delta[n - 1] = 0 keep b_tilde anchored at both ends
        let mut delta = vec![Scalar::ZERO; n];
        delta[0] = d[0];
        for slot in delta.iter_mut().take(n - 1).skip(1) {
            *slot = nonces.challenge_scalar(b"delta");
        }
        let lower_blind = nonces.challenge_scalar(b"lower_blind");
        let upper_blind = nonces.challenge_scalar(b"upper_blind");

        let mut lower = vec![Scalar::ZERO; n];
        let mut upper = vec![Scalar::ZERO; n];
        for i in 0..n - 1 {
            lower[i] = -(delta[i] * d[i + 1]);
            upper[i] = delta[i + 1] - a[i + 1] * delta[i] - b[i] * d[i + 1];
        }

        let c_d = key.commit(&d, &d_blind);
        let c_lower = key.commit(&lower, &lower_blind);
        let c_upper = key.commit(&upper, &upper_blind);

        let e = transcript.product_challenge(&c_d, &c_lower, &c_upper);
        Self {
            c_d,
            c_lower,
            c_upper,
            a_tilde: a.iter().zip(&d).map(|(ai, di)| e * ai + di).collect(),
            b_tilde: b.iter().zip(&delta).map(|(bi, di)| e * bi + di).collect(),
            r_tilde: e * (y * pi.blind + xpi.blind) + d_blind,
            s_tilde: e * upper_blind + lower_blind,
        }
    }

    fn verify(
        &self,
        key: &CommitKey,
        transcript: &ShuffleTranscript,
        c_pi: &RistrettoPoint,
        c_xpi: &RistrettoPoint,
        challenges: &PermutationChallenges,
    ) -> Result<()> {
        let n = challenges.powers.len();
        let (y, z) = (&challenges.y, &challenges.z);
        let e = transcript.product_challenge(&self.c_d, &self.c_lower, &self.c_upper);

        let c_a = y * c_pi + c_xpi + key.commit(&vec![-z; n], &Scalar::ZERO);
        if self.c_d + e * c_a != key.commit(&self.a_tilde, &self.r_tilde) {
            return Err(DeckError::ShuffleRejected(
                "product argument does not open the shifted exponents".into(),
            ));
        }

        let mut chained = vec![Scalar::ZERO; n];
        for i in 0..n - 1 {
            chained[i] = e * self.b_tilde[i + 1] - self.b_tilde[i] * self.a_tilde[i + 1];
        }
        if self.c_lower + e * self.c_upper != key.commit(&chained, &self.s_tilde) {
            return Err(DeckError::ShuffleRejected(
                "prefix products are not chained".into(),
            ));
        }
        if self.b_tilde[0] != self.a_tilde[0] {
            return Err(DeckError::ShuffleRejected(
                "first prefix product does not match".into(),
            ));
        }

        let target: Scalar = challenges
            .powers
            .iter()
            .enumerate()
            .map(|(i, xi)| y * Scalar::from(i as u64 + 1) + xi - z)
            .product();
        if self.b_tilde[n - 1] != e * target {
            return Err(DeckError::ShuffleRejected(
                "output is not a permutation of the input deck".into(),
            ));
        }
        Ok(())
    }
}

/// statement binding, then one challenge per round of the argument
struct ShuffleTranscript {
    inner: Blake2Transcript,
}

impl ShuffleTranscript {
    fn new(statement: &ShuffleStatement, context: &[u8]) -> Self {
        let mut inner = Blake2Transcript::new(b"zk-deck.shuffle.v2");
        inner.append_message(b"context", context);
        inner.append_point(b"pk", &statement.pk);
        inner.append_u64(b"n", statement.input.len() as u64);
        for card in &statement.input {
            inner.append_message(b"in", &card.to_bytes());
        }
        for card in &statement.output {
            inner.append_message(b"out", &card.to_bytes());
        }
        Self { inner }
    }

    fn nonces(&self, pi: &Opening, randomness: &[Scalar]) -> Blake2Transcript {
        let mut secrets = pi.values.clone();
        secrets.extend_from_slice(randomness);
        let fork = self.inner.witness_fork(b"shuffle_nonces", &secrets);
        secrets.zeroize();
        fork
    }

    fn permutation_challenge(&mut self, c_pi: &RistrettoPoint) -> Scalar {
        self.inner.append_point(b"c_pi", c_pi);
        self.inner.challenge_scalar(b"x")
    }

    fn product_challenges(&mut self, c_xpi: &RistrettoPoint) -> (Scalar, Scalar) {
        self.inner.append_point(b"c_xpi", c_xpi);
        let y = self.inner.challenge_scalar(b"y");
        let z = self.inner.challenge_scalar(b"z");
        (y, z)
    }

    fn multi_exp_challenge(
        &self,
        c_mask: &RistrettoPoint,
        ct_mask: &Ciphertext,
        ct_anchor: &Ciphertext,
    ) -> Scalar {
        let mut fork = self.inner.clone();
        fork.append_point(b"c_mask", c_mask);
        fork.append_message(b"ct_mask", &ct_mask.to_bytes());
        fork.append_message(b"ct_anchor", &ct_anchor.to_bytes());
        fork.challenge_scalar(b"multi_exp")
    }

    fn product_challenge(
        &self,
        c_d: &RistrettoPoint,
        c_lower: &RistrettoPoint,
        c_upper: &RistrettoPoint,
    ) -> Scalar {
        let mut fork = self.inner.clone();
        fork.append_point(b"c_d", c_d);
        fork.append_point(b"c_lower", c_lower);
        fork.append_point(b"c_upper", c_upper);
        fork.challenge_scalar(b"product")
    }
}

pub struct ShuffleProver;

impl ShuffleProver {
    /// deterministic in (statement, witness, context)
    pub fn prove(
        statement: &ShuffleStatement,
        witness: &ShuffleWitness,
        context: &[u8],
    ) -> Result<ShuffleProof> {
        let n = statement.input.len();
        if statement.output.len() != n {
            return Err(DeckError::DeckSizeMismatch {
                expected: n,
                got: statement.output.len(),
            });
        }
        if witness.len() != n {
            return Err(DeckError::DeckSizeMismatch {
                expected: n,
                got: witness.len(),
            });
        }
        if n < MIN_SHUFFLE_CARDS {
            return Err(DeckError::InvalidConfig(format!(
                "a shuffle needs at least {MIN_SHUFFLE_CARDS} cards, got {n}"
            )));
        }

        for (j, (&i, r)) in witness.mapping.iter().zip(&witness.randomness).enumerate() {
            if statement.output[j] != statement.input[i].remask_with(r, &statement.pk) {
                return Err(DeckError::InconsistentWitness);
            }
        }

        let key = CommitKey::new(n);
        let mut transcript = ShuffleTranscript::new(statement, context);

        let mut pi = Opening {
            values: witness
                .mapping
                .iter()
                .map(|&i| Scalar::from(i as u64 + 1))
                .collect(),
            blind: Scalar::ZERO,
        };
        let mut nonces = transcript.nonces(&pi, &witness.randomness);
        pi.blind = nonces.challenge_scalar(b"pi_blind");
        let c_pi = key.commit(&pi.values, &pi.blind);

        let x = transcript.permutation_challenge(&c_pi);
        let powers = powers_of(&x, n);
        let xpi = Opening {
            values: witness.mapping.iter().map(|&i| powers[i]).collect(),
            blind: nonces.challenge_scalar(b"xpi_blind"),
        };
        let c_xpi = key.commit(&xpi.values, &xpi.blind);

        let (y, z) = transcript.product_challenges(&c_xpi);
        let challenges = PermutationChallenges { powers, y, z };

        let multi_exp = MultiExpArgument::prove(
            &key,
            &transcript,
            &mut nonces,
            statement,
            &xpi,
            &witness.randomness,
        );
        let product =
            ProductArgument::prove(&key, &transcript, &mut nonces, &pi, &xpi, &challenges);

        Ok(ShuffleProof {
            c_pi,
            c_xpi,
            multi_exp,
            product,
        })
    }
}

pub struct ShuffleVerifier;

impl ShuffleVerifier {
    pub fn verify(statement: &ShuffleStatement, proof: &ShuffleProof, context: &[u8]) -> Result<()> {
        let n = statement.input.len();
        if statement.output.len() != n {
            return Err(DeckError::ShuffleRejected(format!(
                "expected {n} output cards, got {}",
                statement.output.len()
            )));
        }
        if n < MIN_SHUFFLE_CARDS {
            return Err(DeckError::ShuffleRejected(format!(
                "a shuffle needs at least {MIN_SHUFFLE_CARDS} cards"
            )));
        }
        let lengths = [
            proof.multi_exp.exponents.len(),
            proof.product.a_tilde.len(),
            proof.product.b_tilde.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            return Err(DeckError::ShuffleRejected(format!(
                "argument vectors have lengths {lengths:?}, deck has {n} cards"
            )));
        }

        let key = CommitKey::new(n);
        let mut transcript = ShuffleTranscript::new(statement, context);
        let x = transcript.permutation_challenge(&proof.c_pi);
        let (y, z) = transcript.product_challenges(&proof.c_xpi);
        let challenges = PermutationChallenges {
            powers: powers_of(&x, n),
            y,
            z,
        };

        proof
            .multi_exp
            .verify(&key, &transcript, statement, &proof.c_xpi, &challenges)?;
        proof
            .product
            .verify(&key, &transcript, &proof.c_pi, &proof.c_xpi, &challenges)
    }
}

/// one player's shuffle of the current canonical deck
pub struct ShuffleRound {
    transcript: ProtocolTranscript,
    deck: DeckState,
    aggregate_key: AggregatePublicKey,
    expected: Option<PlayerId>,
}

impl ShuffleRound {
    pub fn new(
        session: SessionId,
        deck: DeckState,
        players: &[PlayerRecord],
        aggregate_key: AggregatePublicKey,
    ) -> Self {
        let expected = players.get(deck.shuffle_version() as usize).map(|p| p.id);
        Self {
            transcript: ProtocolTranscript::new(session),
            deck,
            aggregate_key,
            expected,
        }
    }

    /// player whose turn it is, `None` once everyone has shuffled
    pub fn expected_player(&self) -> Option<PlayerId> {
        self.expected
    }

    /// shuffle with a fresh random permutation and randomness
    pub fn prepare<R: RngCore + CryptoRng>(
        &self,
        player: PlayerId,
        rng: &mut R,
    ) -> Result<ShuffleProposal> {
        self.prepare_with(player, ShuffleWitness::random(self.deck.len(), rng))
    }

    pub fn prepare_with(&self, player: PlayerId, witness: ShuffleWitness) -> Result<ShuffleProposal> {
        if self.expected != Some(player) {
            return Err(DeckError::OutOfTurnShuffle {
                player,
                expected: self.expected,
            });
        }

        let pk = *self.aggregate_key.point();
        let input = self.deck.ciphertexts()?;
        let output = witness.apply(&input, &pk)?;
        let base_version = self.deck.shuffle_version();

        debug!("player {} prepared shuffle on version {}", player, base_version);
        Ok(ShuffleProposal {
            player,
            base_version,
            base_commitment: self.deck.commitment(),
            context: self.transcript.shuffle_context(base_version, player, &pk),
            statement: ShuffleStatement { pk, input, output },
            witness,
        })
    }
}

/// candidate deck plus the witness needed to prove it
pub struct ShuffleProposal {
    pub player: PlayerId,
    pub base_version: u32,
    pub base_commitment: [u8; 32],
    context: [u8; 32],
    statement: ShuffleStatement,
    witness: ShuffleWitness,
}

impl ShuffleProposal {
    pub fn candidate(&self) -> &[Ciphertext] {
        &self.statement.output
    }

    /// prove through the proof service; the witness is dropped afterwards
    pub fn prove(self, prover: &dyn ProofService) -> Result<ShuffleSubmission> {
        let proof = prover.prove(ProofRequest::Shuffle {
            statement: &self.statement,
            witness: &self.witness,
            context: &self.context,
        })?;

        Ok(ShuffleSubmission {
            player: self.player,
            base_version: self.base_version,
            base_commitment: self.base_commitment,
            deck: self.statement.output.iter().map(Ciphertext::compress).collect(),
            proof,
        })
    }
}

/// what a player sends to the gateway for a shuffle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuffleSubmission {
    pub player: PlayerId,
    pub base_version: u32,
    pub base_commitment: [u8; 32],
    pub deck: Vec<CompressedCiphertext>,
    pub proof: Proof,
}
