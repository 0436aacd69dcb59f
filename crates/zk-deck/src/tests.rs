//! end-to-end tests against the in-memory ledger

use std::collections::HashSet;

use curve25519_dalek::{constants::RISTRETTO_BASEPOINT_POINT as G, scalar::Scalar};
use rand::rngs::OsRng;

use crate::{
    deal::slots_from_bitmask,
    reveal::Codebook,
    shuffle::ShuffleWitness,
    DealProposal, DeckError, DeckState, GameConfig, Keypair, Ledger, LocalProver, PlayerId, Proof,
    SessionId, SlotIndex, SlotStatus, Submission, VerifierGateway,
};

const SESSION: SessionId = SessionId(42);

struct Table {
    ledger: Ledger,
    keys: Vec<Keypair>,
    prover: LocalProver,
}

impl Table {
    fn new(players: usize, config: GameConfig) -> Self {
        let ledger = Ledger::new();
        ledger.create_session(SESSION, config).unwrap();

        let keys: Vec<_> = (0..players).map(|_| Keypair::generate(&mut OsRng)).collect();
        for (i, kp) in keys.iter().enumerate() {
            let id = Self::id(i);
            let proof = kp.prove_ownership(id, &mut OsRng);
            ledger
                .register_player(SESSION, id, format!("seat {i}"), kp.public(), &proof)
                .unwrap();
        }
        ledger.finalize_registration(SESSION).unwrap();

        Self {
            ledger,
            keys,
            prover: LocalProver,
        }
    }

    fn id(seat: usize) -> PlayerId {
        seat as PlayerId + 100
    }

    fn deck(&self) -> DeckState {
        self.ledger.query_deck(SESSION).unwrap()
    }

    fn shuffle_once(&self) -> crate::Result<DeckState> {
        let round = self.ledger.shuffle_round(SESSION)?;
        let player = round.expected_player().ok_or(DeckError::KeyNotFinalized)?;
        let submission = round.prepare(player, &mut OsRng)?.prove(&self.prover)?;
        self.ledger.submit(SESSION, Submission::Shuffle(submission))
    }

    fn shuffle_all(&self) {
        for _ in 0..self.keys.len() {
            self.shuffle_once().unwrap();
        }
    }

    fn contribute(&self, seat: usize, slot: SlotIndex) -> crate::Result<DeckState> {
        let round = self.ledger.deal_round(SESSION, Self::id(seat))?;
        let contribution = round.prepare(slot, &self.keys[seat], &self.prover)?;
        self.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Self::id(seat),
                contributions: vec![contribution],
            }),
        )
    }

    fn strip_all(&self, slot: SlotIndex) {
        for seat in 0..self.keys.len() {
            self.contribute(seat, slot).unwrap();
        }
    }
}

#[test]
fn test_four_player_game() {
    let table = Table::new(4, GameConfig::standard_deck());

    table.shuffle_once().unwrap();
    table.shuffle_once().unwrap();
    assert_eq!(
        table.contribute(0, 0),
        Err(DeckError::DealBeforeShuffleComplete { current: 2, required: 4 })
    );
    // the ledger enforces the gate on its own
    assert_eq!(
        table.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Table::id(0),
                contributions: vec![],
            })
        ),
        Err(DeckError::DealBeforeShuffleComplete { current: 2, required: 4 })
    );

    table.shuffle_once().unwrap();
    table.shuffle_once().unwrap();
    let deck = table.deck();
    assert_eq!(deck.shuffle_version(), 4);
    assert!(deck.shuffling_complete());

    // a fifth shuffle has nobody to perform it
    assert!(matches!(
        table.ledger.shuffle_round(SESSION).unwrap().prepare(Table::id(0), &mut OsRng),
        Err(DeckError::OutOfTurnShuffle { expected: None, .. })
    ));

    let mut dealt = Vec::new();
    for slot in 0..8 {
        table.strip_all(slot);
        assert_eq!(table.deck().slot(slot).unwrap().status(), SlotStatus::Complete);
        let opened = table.ledger.open_card(SESSION, slot).unwrap();
        assert!(opened.card < 52);
        dealt.push(opened.card);
    }

    dealt.sort_unstable();
    dealt.dedup();
    assert_eq!(dealt.len(), 8);
    assert_eq!(table.deck().opened_cards().len(), 8);
    assert_eq!(
        table.ledger.open_card(SESSION, 9),
        Err(DeckError::SlotNotComplete { slot: 9, layers_remaining: 4 })
    );
}

#[test]
fn test_shuffled_deck_keeps_every_card() {
    let table = Table::new(3, GameConfig::standard_deck());
    table.shuffle_all();

    let joint: Scalar = table.keys.iter().map(|k| k.secret().scalar()).sum();
    let codebook = Codebook::new(52);
    let mut cards: Vec<_> = table
        .deck()
        .ciphertexts()
        .unwrap()
        .iter()
        .map(|ct| codebook.lookup(&ct.decrypt(&joint)).unwrap())
        .collect();

    cards.sort_unstable();
    assert_eq!(cards, (0..52).collect::<Vec<_>>());
}

#[test]
fn test_duplicate_contribution_on_slot_five() {
    let table = Table::new(3, GameConfig::standard_deck());
    table.shuffle_all();

    let round = table.ledger.deal_round(SESSION, Table::id(1)).unwrap();
    let contribution = round.prepare(5, &table.keys[1], &table.prover).unwrap();
    let proposal = DealProposal {
        player: Table::id(1),
        contributions: vec![contribution],
    };

    let deck = table
        .ledger
        .submit(SESSION, Submission::Deal(proposal.clone()))
        .unwrap();
    assert_eq!(deck.slot(5).unwrap().layers_remaining, 2);

    // replay of the accepted proposal
    assert_eq!(
        table.ledger.submit(SESSION, Submission::Deal(proposal)),
        Err(DeckError::PlayerAlreadyContributed { slot: 5, player: Table::id(1) })
    );
    // fresh attempt from an up to date view
    assert_eq!(
        table.contribute(1, 5),
        Err(DeckError::PlayerAlreadyContributed { slot: 5, player: Table::id(1) })
    );
    assert_eq!(table.deck().slot(5).unwrap().layers_remaining, 2);
}

#[test]
fn test_non_bijective_shuffle_rejected() {
    let table = Table::new(2, GameConfig::custom(2, 4));
    let before = table.deck();

    let round = table.ledger.shuffle_round(SESSION).unwrap();
    let player = round.expected_player().unwrap();
    let randomness: Vec<_> = (0..8).map(|_| Scalar::random(&mut OsRng)).collect();
    let witness = ShuffleWitness::from_mapping(vec![0, 0, 2, 3, 4, 5, 6, 7], randomness).unwrap();

    let submission = round
        .prepare_with(player, witness)
        .unwrap()
        .prove(&table.prover)
        .unwrap();
    assert!(matches!(
        table.ledger.submit(SESSION, Submission::Shuffle(submission)),
        Err(DeckError::ShuffleRejected(_))
    ));
    assert_eq!(table.deck(), before);
}

#[test]
fn test_out_of_turn_shuffle() {
    let table = Table::new(3, GameConfig::custom(1, 5));
    let round = table.ledger.shuffle_round(SESSION).unwrap();
    assert_eq!(round.expected_player(), Some(Table::id(0)));

    assert!(matches!(
        round.prepare(Table::id(2), &mut OsRng),
        Err(DeckError::OutOfTurnShuffle { player, expected: Some(first) })
            if player == Table::id(2) && first == Table::id(0)
    ));

    let mut submission = round
        .prepare(Table::id(0), &mut OsRng)
        .unwrap()
        .prove(&table.prover)
        .unwrap();
    submission.player = Table::id(1);
    assert_eq!(
        table.ledger.submit(SESSION, Submission::Shuffle(submission)),
        Err(DeckError::OutOfTurnShuffle {
            player: Table::id(1),
            expected: Some(Table::id(0)),
        })
    );
    assert_eq!(table.deck().shuffle_version(), 0);
}

#[test]
fn test_stale_shuffle_rejected() {
    let table = Table::new(2, GameConfig::custom(1, 5));
    let round = table.ledger.shuffle_round(SESSION).unwrap();
    let mut submission = round
        .prepare(Table::id(0), &mut OsRng)
        .unwrap()
        .prove(&table.prover)
        .unwrap();
    submission.base_commitment = [0u8; 32];

    assert!(matches!(
        table.ledger.submit(SESSION, Submission::Shuffle(submission)),
        Err(DeckError::StaleState(_))
    ));
}

#[test]
fn test_batch_is_all_or_nothing() {
    let table = Table::new(2, GameConfig::custom(1, 6));
    table.shuffle_all();

    let stale_round = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    table.contribute(0, 2).unwrap();

    // built before slot 2 was contributed, so every proof is valid
    let batch = stale_round
        .prepare_batch(&[1, 2, 3], &table.keys[0], &table.prover)
        .unwrap();
    assert_eq!(batch.slots(), vec![1, 2, 3]);
    assert_eq!(
        table.ledger.submit(SESSION, Submission::Deal(batch)),
        Err(DeckError::PlayerAlreadyContributed { slot: 2, player: Table::id(0) })
    );

    let deck = table.deck();
    assert_eq!(deck.slot(1).unwrap().layers_remaining, 2);
    assert_eq!(deck.slot(2).unwrap().layers_remaining, 1);
    assert_eq!(deck.slot(3).unwrap().layers_remaining, 2);

    let fresh = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    assert_eq!(
        fresh.prepare_batch(&[], &table.keys[0], &table.prover).unwrap_err(),
        DeckError::EmptyBatch
    );
    assert_eq!(
        fresh.prepare_batch(&[1, 3, 1], &table.keys[0], &table.prover).unwrap_err(),
        DeckError::DuplicateSlotInBatch(1)
    );

    let batch = fresh
        .prepare_batch(&slots_from_bitmask(0b11_1010), &table.keys[0], &table.prover)
        .unwrap();
    let deck = table.ledger.submit(SESSION, Submission::Deal(batch)).unwrap();
    for slot in [1, 3, 4, 5] {
        assert_eq!(deck.slot(slot).unwrap().layers_remaining, 1);
    }
}

#[test]
fn test_concurrent_first_contributions() {
    let table = Table::new(3, GameConfig::custom(1, 4));
    table.shuffle_all();

    // both players compute against the untouched slot
    let a = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    let b = table.ledger.deal_round(SESSION, Table::id(1)).unwrap();
    let ca = a.prepare(0, &table.keys[0], &table.prover).unwrap();
    let cb = b.prepare(0, &table.keys[1], &table.prover).unwrap();
    assert!(ca.is_first() && cb.is_first());

    for (seat, c) in [(0, ca), (1, cb)] {
        table
            .ledger
            .submit(
                SESSION,
                Submission::Deal(DealProposal {
                    player: Table::id(seat),
                    contributions: vec![c],
                }),
            )
            .unwrap();
    }
    assert_eq!(
        table.deck().slot(0).unwrap().status(),
        SlotStatus::Dealing { layers_remaining: 1 }
    );

    table.contribute(2, 0).unwrap();
    assert!(table.ledger.open_card(SESSION, 0).unwrap().card < 4);
}

#[test]
fn test_parallel_dealing() {
    let table = Table::new(4, GameConfig::custom(1, 6));
    table.shuffle_all();

    std::thread::scope(|scope| {
        for seat in 0..4 {
            let table = &table;
            scope.spawn(move || {
                for slot in 0..6 {
                    table.contribute(seat, slot).unwrap();
                }
            });
        }
    });

    let deck = table.deck();
    assert!(deck.slots().iter().all(|s| s.is_complete()));
    let mut cards: Vec<_> = (0..6)
        .map(|slot| table.ledger.open_card(SESSION, slot).unwrap().card)
        .collect();
    cards.sort_unstable();
    assert_eq!(cards, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_forged_share_rejected() {
    let table = Table::new(2, GameConfig::custom(1, 4));
    table.shuffle_all();

    let round = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    let mut contribution = round.prepare(1, &table.keys[0], &table.prover).unwrap();
    contribution.share += G;

    assert!(matches!(
        table.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Table::id(0),
                contributions: vec![contribution],
            })
        ),
        Err(DeckError::ProofRejected { slot: 1, .. })
    ));
    assert_eq!(table.deck().slot(1).unwrap().layers_remaining, 2);
}

#[test]
fn test_wrong_proof_kind() {
    let table = Table::new(2, GameConfig::custom(1, 4));
    let round = table.ledger.shuffle_round(SESSION).unwrap();
    let submission = round
        .prepare(Table::id(0), &mut OsRng)
        .unwrap()
        .prove(&table.prover)
        .unwrap();
    let shuffle_proof = submission.proof.clone();
    table
        .ledger
        .submit(SESSION, Submission::Shuffle(submission))
        .unwrap();
    table.shuffle_once().unwrap();

    let round = table.ledger.deal_round(SESSION, Table::id(1)).unwrap();
    let mut contribution = round.prepare(0, &table.keys[1], &table.prover).unwrap();
    assert!(matches!(contribution.proof, Proof::Decryption(_)));
    contribution.proof = shuffle_proof;

    assert_eq!(
        table.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Table::id(1),
                contributions: vec![contribution],
            })
        ),
        Err(DeckError::CircuitMismatch)
    );
}

#[test]
fn test_contribution_is_deterministic() {
    let table = Table::new(2, GameConfig::custom(1, 4));
    table.shuffle_all();

    let round = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    let a = round.prepare(3, &table.keys[0], &table.prover).unwrap();
    let b = round.prepare(3, &table.keys[0], &table.prover).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_peek_with_last_layer() {
    let table = Table::new(2, GameConfig::standard_deck());
    table.shuffle_all();
    table.contribute(0, 3).unwrap();

    let engine = crate::RevealEngine::new(&GameConfig::standard_deck());
    let deck = table.deck();
    let players = table.ledger.query_players(SESSION).unwrap();
    let peeked = engine
        .peek_with_secret(&deck, 3, &players, Table::id(1), &table.keys[1])
        .unwrap();
    assert_eq!(
        engine.peek_with_secret(&deck, 3, &players, Table::id(0), &table.keys[0]),
        Err(DeckError::PlayerAlreadyContributed { slot: 3, player: Table::id(0) })
    );
    // seat 0's key cannot read through seat 1's layer
    assert_eq!(
        engine.peek_with_secret(&deck, 3, &players, Table::id(1), &table.keys[0]),
        Err(DeckError::InconsistentWitness)
    );
    assert!(deck.opened_cards().is_empty());

    table.contribute(1, 3).unwrap();
    assert_eq!(table.ledger.open_card(SESSION, 3).unwrap().card, peeked);
    // recorded once
    assert_eq!(table.ledger.open_card(SESSION, 3).unwrap().card, peeked);
    assert_eq!(
        table.deck().slot(3).unwrap().status(),
        SlotStatus::Opened(peeked)
    );
}

#[test]
fn test_slot_complete_rejects_more_shares() {
    let table = Table::new(2, GameConfig::custom(1, 4));
    table.shuffle_all();

    let late = table.ledger.deal_round(SESSION, Table::id(1)).unwrap();
    let contribution = late.prepare(2, &table.keys[1], &table.prover).unwrap();
    table.strip_all(2);

    assert_eq!(
        table.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Table::id(1),
                contributions: vec![contribution],
            })
        ),
        Err(DeckError::SlotComplete(2))
    );
}

#[test]
fn test_snapshot_survives_serialization_mid_deal() {
    let table = Table::new(3, GameConfig::custom(2, 5));
    table.shuffle_all();
    table.contribute(0, 4).unwrap();
    table.contribute(2, 4).unwrap();
    table.contribute(1, 7).unwrap();

    let deck = table.deck();
    let json = serde_json::to_string(&deck).unwrap();
    let restored: DeckState = serde_json::from_str(&json).unwrap();

    assert_eq!(restored, deck);
    assert_eq!(restored.commitment(), deck.commitment());
    let slot = restored.slot(4).unwrap();
    assert!(slot.has_contributed(0) && slot.has_contributed(2) && !slot.has_contributed(1));
    assert_eq!(slot.layers_remaining, 1);
}

#[test]
fn test_shuffle_submission_does_not_link_slots() {
    let table = Table::new(3, GameConfig::standard_deck());

    for _ in 0..3 {
        let before = table.deck().ciphertexts().unwrap();
        let inputs: HashSet<[u8; 64]> = before.iter().map(|ct| ct.to_bytes()).collect();

        let round = table.ledger.shuffle_round(SESSION).unwrap();
        let player = round.expected_player().unwrap();
        let submission = round.prepare(player, &mut OsRng).unwrap().prove(&table.prover).unwrap();
        let proof = match &submission.proof {
            Proof::Shuffle(proof) => proof.clone(),
            Proof::Decryption(_) => panic!("wrong proof kind"),
        };
        let published = [
            proof.c_pi,
            proof.c_xpi,
            proof.multi_exp.c_mask,
            proof.multi_exp.ct_mask.c0,
            proof.multi_exp.ct_mask.c1,
            proof.multi_exp.ct_anchor.c0,
            proof.multi_exp.ct_anchor.c1,
            proof.product.c_d,
            proof.product.c_lower,
            proof.product.c_upper,
        ];

        // an observer holding only the submission cannot strip any output
        // slot back to an input slot
        for out in &submission.deck {
            let out = out.decompress().unwrap();
            for p0 in &published {
                for p1 in &published {
                    let stripped = crate::Ciphertext::new(out.c0 - p0, out.c1 - p1);
                    assert!(!inputs.contains(&stripped.to_bytes()));
                }
            }
        }

        table.ledger.submit(SESSION, Submission::Shuffle(submission)).unwrap();
    }
    assert!(table.deck().shuffling_complete());
}

#[test]
fn test_deal_for_slot_past_end_of_deck() {
    let table = Table::new(2, GameConfig::custom(1, 4));
    table.shuffle_all();
    let before = table.deck();

    let round = table.ledger.deal_round(SESSION, Table::id(0)).unwrap();
    assert!(matches!(
        round.prepare(4, &table.keys[0], &table.prover),
        Err(DeckError::UnknownSlot(4))
    ));

    let mut contribution = round.prepare(0, &table.keys[0], &table.prover).unwrap();
    contribution.slot = 4;
    assert_eq!(
        table.ledger.submit(
            SESSION,
            Submission::Deal(DealProposal {
                player: Table::id(0),
                contributions: vec![contribution],
            })
        ),
        Err(DeckError::UnknownSlot(4))
    );
    assert_eq!(table.deck(), before);
}
