//! in-process proof service
//!
//! fiat-shamir proofs over ristretto255: a bayer-groth shuffle argument for
//! shuffles, dlog equality for partial decryptions.

use tracing::debug;

use crate::{
    deal::DecryptionProof,
    service::{Proof, ProofRequest, ProofService},
    shuffle::ShuffleProver,
    Result,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct LocalProver;

impl LocalProver {
    pub fn new() -> Self {
        Self
    }
}

impl ProofService for LocalProver {
    fn prove(&self, request: ProofRequest<'_>) -> Result<Proof> {
        debug!("proving {:?}", request.kind());
        match request {
            ProofRequest::Shuffle {
                statement,
                witness,
                context,
            } => ShuffleProver::prove(statement, witness, context).map(Proof::Shuffle),
            ProofRequest::Decryption {
                statement,
                witness,
                context,
            } => DecryptionProof::prove(statement, witness, context).map(Proof::Decryption),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        deal::{DecryptionStatement, DecryptionWitness},
        keys::Keypair,
        service::CircuitKind,
    };
    use curve25519_dalek::{constants::RISTRETTO_BASEPOINT_POINT as G, scalar::Scalar};
    use rand::rngs::OsRng;

    #[test]
    fn test_decryption_request() {
        let kp = Keypair::generate(&mut OsRng);
        let c0 = Scalar::random(&mut OsRng) * G;
        let statement = DecryptionStatement {
            public_key: kp.public(),
            c0,
            share: kp.secret().scalar() * c0,
        };
        let context = [7u8; 32];
        let request = ProofRequest::Decryption {
            statement: &statement,
            witness: DecryptionWitness { secret: kp.secret() },
            context: &context,
        };
        assert_eq!(request.kind(), CircuitKind::PartialDecryptionCorrectness);

        let proof = LocalProver::new().prove(request).unwrap();
        assert_eq!(proof.kind(), CircuitKind::PartialDecryptionCorrectness);
        match proof {
            Proof::Decryption(p) => assert!(p.verify(&statement, &context)),
            Proof::Shuffle(_) => panic!("wrong proof kind"),
        }
    }
}
