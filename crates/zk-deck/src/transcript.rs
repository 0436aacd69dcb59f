//! fiat-shamir transcripts
//!
//! [`Blake2Transcript`] absorbs length-prefixed labeled messages into one
//! blake2s state and squeezes challenges from a copy of it.
//! [`ProtocolTranscript`] binds a session and derives the per-step contexts
//! that shuffle and decryption proofs are bound to.

use blake2::{Blake2s256, Digest};
use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar};

use crate::{deal::DeltaPair, deck::SlotIndex, keys::PlayerId, service::SessionId};

const TRANSCRIPT_VERSION: &[u8] = b"zk-deck.transcript.v1";

/// labeled absorb / squeeze over blake2s
///
/// Every squeeze is fed back into the state, so prover and verifier must
/// perform the same sequence of appends and challenges.
#[derive(Clone)]
pub struct Blake2Transcript {
    state: Blake2s256,
    squeezes: u64,
}

impl Blake2Transcript {
    pub fn new(domain_sep: &[u8]) -> Self {
        let mut state = Blake2s256::new();
        state.update(TRANSCRIPT_VERSION);
        absorb_framed(&mut state, domain_sep);
        Self { state, squeezes: 0 }
    }

    pub fn append_message(&mut self, label: &[u8], message: &[u8]) {
        absorb_framed(&mut self.state, label);
        absorb_framed(&mut self.state, message);
    }

    pub fn append_u64(&mut self, label: &[u8], value: u64) {
        self.append_message(label, &value.to_le_bytes());
    }

    pub fn append_point(&mut self, label: &[u8], point: &RistrettoPoint) {
        self.append_message(label, point.compress().as_bytes());
    }

    pub fn append_scalar(&mut self, label: &[u8], scalar: &Scalar) {
        self.append_message(label, scalar.as_bytes());
    }

    /// fill `dest` from the current state
    ///
    /// two squeezes never repeat, even under the same label.
    pub fn challenge_bytes(&mut self, label: &[u8], dest: &mut [u8]) {
        let mut squeeze = self.state.clone();
        squeeze.update(b"squeeze");
        absorb_framed(&mut squeeze, label);
        squeeze.update(self.squeezes.to_le_bytes());
        self.squeezes += 1;

        expand(&squeeze.finalize(), dest);

        self.state.update(b"squeezed");
        self.state.update(&*dest);
    }

    /// scalar from 64 squeezed bytes, reduced mod l
    pub fn challenge_scalar(&mut self, label: &[u8]) -> Scalar {
        let mut bytes = [0u8; 64];
        self.challenge_bytes(label, &mut bytes);
        Scalar::from_bytes_mod_order_wide(&bytes)
    }

    /// copy of the transcript keyed by secret scalars
    ///
    /// squeezing the copy yields prover nonces that depend on the public
    /// statement and the witness; `self` is left untouched.
    pub fn witness_fork(&self, label: &[u8], secrets: &[Scalar]) -> Blake2Transcript {
        let mut fork = self.clone();
        fork.append_message(b"witness_label", label);
        for secret in secrets {
            fork.append_message(b"witness", secret.as_bytes());
        }
        fork
    }

    /// single nonce from [`Blake2Transcript::witness_fork`]
    pub fn witness_scalar(&self, label: &[u8], secret: &Scalar) -> Scalar {
        self.witness_fork(label, std::slice::from_ref(secret))
            .challenge_scalar(label)
    }
}

fn absorb_framed(state: &mut Blake2s256, bytes: &[u8]) {
    state.update((bytes.len() as u32).to_le_bytes());
    state.update(bytes);
}

// blocks past the first are blake2s(previous block || "extend")
fn expand(first: &[u8], dest: &mut [u8]) {
    let mut block = [0u8; 32];
    block.copy_from_slice(first);
    let mut chunks = dest.chunks_mut(32).peekable();
    while let Some(chunk) = chunks.next() {
        chunk.copy_from_slice(&block[..chunk.len()]);
        if chunks.peek().is_some() {
            let mut h = Blake2s256::new();
            h.update(block);
            h.update(b"extend");
            block.copy_from_slice(&h.finalize());
        }
    }
}

/// session-level transcript: every proof context is derived from it
#[derive(Clone)]
pub struct ProtocolTranscript {
    inner: Blake2Transcript,
}

impl ProtocolTranscript {
    pub fn new(session: SessionId) -> Self {
        let mut t = Blake2Transcript::new(b"zk-deck.session.v1");
        t.append_u64(b"session", session.0);
        Self { inner: t }
    }

    /// context for one shuffle round
    pub fn shuffle_context(
        &self,
        base_version: u32,
        player: PlayerId,
        aggregate_key: &RistrettoPoint,
    ) -> [u8; 32] {
        let mut t = self.inner.clone();
        t.append_message(b"step", b"shuffle");
        t.append_u64(b"base_version", base_version as u64);
        t.append_u64(b"player", player as u64);
        t.append_point(b"aggregate_pk", aggregate_key);
        let mut context = [0u8; 32];
        t.challenge_bytes(b"shuffle_context", &mut context);
        context
    }

    /// context for one partial decryption of one slot
    pub fn decryption_context(
        &self,
        slot: SlotIndex,
        player: PlayerId,
        delta: &DeltaPair,
    ) -> [u8; 32] {
        let mut t = self.inner.clone();
        t.append_message(b"step", b"decrypt");
        t.append_u64(b"slot", slot as u64);
        t.append_u64(b"player", player as u64);
        t.append_scalar(b"delta0", &delta.d0);
        t.append_scalar(b"delta1", &delta.d1);
        let mut context = [0u8; 32];
        t.challenge_bytes(b"decryption_context", &mut context);
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2_transcript_determinism() {
        let mut t1 = Blake2Transcript::new(b"test-domain");
        let mut t2 = Blake2Transcript::new(b"test-domain");

        t1.append_message(b"data", b"hello");
        t2.append_message(b"data", b"hello");

        assert_eq!(t1.challenge_scalar(b"chal"), t2.challenge_scalar(b"chal"));
    }

    #[test]
    fn test_blake2_transcript_binding() {
        let mut t1 = Blake2Transcript::new(b"test");
        let mut t2 = Blake2Transcript::new(b"test");

        t1.append_message(b"x", b"a");
        t2.append_message(b"x", b"b");

        assert_ne!(t1.challenge_scalar(b"c"), t2.challenge_scalar(b"c"));
    }

    #[test]
    fn test_repeated_label_gives_fresh_challenge() {
        let mut t = Blake2Transcript::new(b"test");
        t.append_message(b"data", b"x");

        let mut c1 = [0u8; 32];
        let mut c2 = [0u8; 32];
        t.challenge_bytes(b"same_label", &mut c1);
        t.challenge_bytes(b"same_label", &mut c2);
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_long_challenge_prefix_matches_short() {
        let mut short = Blake2Transcript::new(b"test");
        let mut long = short.clone();

        let mut a = [0u8; 32];
        let mut b = [0u8; 80];
        short.challenge_bytes(b"c", &mut a);
        long.challenge_bytes(b"c", &mut b);
        assert_eq!(a[..], b[..32]);
        assert_ne!(b[..32], b[32..64]);
    }

    #[test]
    fn test_message_framing() {
        // ("ab", "c") and ("a", "bc") must not collide
        let mut t1 = Blake2Transcript::new(b"test");
        let mut t2 = Blake2Transcript::new(b"test");
        t1.append_message(b"ab", b"c");
        t2.append_message(b"a", b"bc");
        assert_ne!(t1.challenge_scalar(b"c"), t2.challenge_scalar(b"c"));
    }

    #[test]
    fn test_witness_scalar_does_not_advance() {
        let mut t = Blake2Transcript::new(b"test");
        let mut reference = t.clone();

        let secret = Scalar::from(7u64);
        let k1 = t.witness_scalar(b"k", &secret);
        let k2 = t.witness_scalar(b"k", &secret);
        assert_eq!(k1, k2);
        assert_ne!(k1, t.witness_scalar(b"k", &Scalar::from(8u64)));

        assert_eq!(t.challenge_scalar(b"c"), reference.challenge_scalar(b"c"));

        let mut fork = t.witness_fork(b"nonces", &[secret, Scalar::from(9u64)]);
        let n1 = fork.challenge_scalar(b"n");
        let n2 = fork.challenge_scalar(b"n");
        assert_ne!(n1, n2);
        assert_eq!(t.challenge_scalar(b"c"), reference.challenge_scalar(b"c"));
    }

    #[test]
    fn test_contexts_are_separated() {
        let t = ProtocolTranscript::new(SessionId(1));
        let other = ProtocolTranscript::new(SessionId(2));
        let pk = RistrettoPoint::default();

        assert_eq!(t.shuffle_context(0, 1, &pk), t.shuffle_context(0, 1, &pk));
        assert_ne!(t.shuffle_context(0, 1, &pk), t.shuffle_context(1, 1, &pk));
        assert_ne!(t.shuffle_context(0, 1, &pk), other.shuffle_context(0, 1, &pk));

        let delta = DeltaPair {
            d0: Scalar::from(1u64),
            d1: Scalar::from(2u64),
        };
        assert_ne!(t.decryption_context(3, 1, &delta), t.decryption_context(4, 1, &delta));
    }
}
