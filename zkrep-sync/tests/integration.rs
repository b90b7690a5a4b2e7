use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use halo2curves_axiom::ff::Field;
use zkrep_common::{
    identity_commitment, parse_fr, state_tree_leaf, AttesterId, CircuitKind, EpochKeyControl, Fr,
    Proof, Prover, ProverError, Settings, TransitionControl, ZkProof,
};
use zkrep_epoch_state::{
    DataVector, EpochPhase, EpochTreePreimage, IncrementalMerkleTree, OrderedTree, SealerPolicy,
    StateError,
};
use zkrep_sync::{
    plan, ChainHead, EventKind, EventOutcome, LedgerEvent, MemoryEventSource, Plan, PlanContext,
    ProjectionDb, RejectionCode, RunState, SyncConfig, SyncError, Synchronizer,
};

const PROOF_BYTES: [u8; 2] = [0xaa, 0x55];

fn settings() -> Settings {
    Settings {
        state_tree_depth: 4,
        epoch_tree_depth: 4,
        ..Settings::default()
    }
}

fn attester() -> AttesterId {
    AttesterId::from(77u64)
}

fn ev(block: u64, log: u64, ts: u64, kind: EventKind) -> LedgerEvent {
    LedgerEvent::new(block, log, ts, attester(), kind)
}

fn attester_signup(block: u64) -> LedgerEvent {
    ev(block, 0, 0, EventKind::AttesterSignedUp { epoch_length: 100 })
}

fn attestation(block: u64, log: u64, ts: u64, epoch_key: u64, field_index: usize, value: u64) -> LedgerEvent {
    ev(
        block,
        log,
        ts,
        EventKind::Attestation {
            epoch: 0,
            epoch_key: Fr::from(epoch_key),
            field_index,
            value: Fr::from(value),
        },
    )
}

fn user_leaf(secret: u64, epoch: u64) -> Fr {
    state_tree_leaf(
        &Fr::from(secret),
        &attester(),
        epoch,
        &vec![Fr::ZERO; settings().field_count],
    )
}

fn nullifiers() -> Vec<Fr> {
    vec![Fr::from(901u64), Fr::from(902u64), Fr::from(903u64)]
}

fn new_sync(source: &MemoryEventSource, db_path: Option<PathBuf>) -> Synchronizer {
    let config = SyncConfig {
        db_path,
        settings: settings(),
        poll_interval_ms: 10,
        ..SyncConfig::default()
    };
    Synchronizer::new(config, Arc::new(source.clone())).unwrap()
}

async fn drive(sync: &Synchronizer) {
    while !sync.poll_once().await.unwrap().caught_up {}
}

/// Ordered-tree root of the given `(epoch_key, [(field, value)])` aggregates,
/// applying writes with consecutive nonces in the given order.
fn expected_epoch_root(writes: &[(u64, usize, u64)]) -> Fr {
    let settings = settings();
    let mut preimages: Vec<EpochTreePreimage> = Vec::new();
    for (nonce, (key, field, value)) in writes.iter().enumerate() {
        let key = Fr::from(*key);
        let index = match preimages.iter().position(|p| p.epoch_key == key) {
            Some(index) => index,
            None => {
                preimages.push(EpochTreePreimage {
                    epoch_key: key,
                    data: DataVector::new(settings.field_count),
                });
                preimages.len() - 1
            }
        };
        preimages[index]
            .data
            .apply(*field, Fr::from(*value), nonce as u64, &settings)
            .unwrap();
    }
    OrderedTree::from_preimages(&preimages, &settings)
        .unwrap()
        .root()
}

/// Echoes the ordered-tree root and checksum it is asked to prove.
struct EchoProver;

#[async_trait]
impl Prover for EchoProver {
    async fn gen_proof(&self, kind: CircuitKind, inputs: serde_json::Value) -> Result<Proof, ProverError> {
        if kind != CircuitKind::BuildOrderedTree {
            return Err(ProverError::Unsupported(kind));
        }
        let field = |name: &str| {
            inputs[name]
                .as_str()
                .ok_or_else(|| ProverError::InvalidInputs(format!("missing {name}")))
                .and_then(|s| parse_fr(s).map_err(|e| ProverError::InvalidInputs(e.to_string())))
        };
        Ok(Proof {
            public_signals: vec![field("root")?, field("checksum")?],
            raw_proof: PROOF_BYTES.to_vec(),
        })
    }

    async fn verify_proof(
        &self,
        _kind: CircuitKind,
        _public_signals: &[Fr],
        raw_proof: &[u8],
    ) -> Result<bool, ProverError> {
        Ok(raw_proof == PROOF_BYTES)
    }
}

#[tokio::test]
async fn state_root_matches_reference_after_every_prefix() {
    let source = MemoryEventSource::new();
    source.push(attester_signup(1)).await;
    let sync = new_sync(&source, None);
    sync.poll_once().await.unwrap();

    let mut reference = IncrementalMerkleTree::new(settings().state_tree_depth);
    for i in 0..6u64 {
        let secret = 1_000 + i;
        let leaf = user_leaf(secret, 0);
        source
            .extend([
                ev(
                    2 + i,
                    0,
                    10 + i,
                    EventKind::UserSignedUp {
                        epoch: 0,
                        identity_commitment: identity_commitment(&Fr::from(secret)),
                        leaf_index: i,
                        initial_data: Vec::new(),
                    },
                ),
                ev(2 + i, 1, 10 + i, EventKind::StateTreeLeaf { epoch: 0, index: i, leaf }),
            ])
            .await;
        sync.poll_once().await.unwrap();

        reference.insert(leaf).unwrap();
        let tree = sync.gen_state_tree(&attester(), 0).await.unwrap();
        assert_eq!(tree.root(), reference.root());
        assert!(sync.state_tree_root_exists(&attester(), &reference.root(), 0).await);
    }
    assert_eq!(sync.status().rejected, 0);
    assert_eq!(sync.status().applied, 13);
}

#[tokio::test]
async fn redelivered_events_leave_roots_unchanged() {
    let source = MemoryEventSource::new();
    let first = ev(2, 0, 10, EventKind::StateTreeLeaf {
        epoch: 0,
        index: 0,
        leaf: user_leaf(1, 0),
    });
    source
        .extend([
            attester_signup(1),
            first.clone(),
            first.clone(),
            ev(2, 1, 10, EventKind::StateTreeLeaf {
                epoch: 0,
                index: 1,
                leaf: user_leaf(2, 0),
            }),
        ])
        .await;
    let sync = new_sync(&source, None);
    let report = sync.poll_once().await.unwrap();
    assert_eq!(report.processed, 3);
    let root = sync.gen_state_tree(&attester(), 0).await.unwrap().root();
    assert_eq!(
        sync.state_tree_leaves(&attester(), 0).await.unwrap(),
        vec![user_leaf(1, 0), user_leaf(2, 0)]
    );

    // The ledger repeating an already placed leaf is a no-op.
    source
        .push(ev(3, 0, 20, EventKind::StateTreeLeaf {
            epoch: 0,
            index: 0,
            leaf: user_leaf(1, 0),
        }))
        .await;
    sync.poll_once().await.unwrap();
    assert_eq!(sync.gen_state_tree(&attester(), 0).await.unwrap().root(), root);
    assert_eq!(sync.event_outcome(3, 0).unwrap(), Some(EventOutcome::Applied));
}

fn full_history() -> Vec<LedgerEvent> {
    let writes = [(11, 0, 10), (12, 0, 3), (11, 0, 5), (11, 4, 9)];
    vec![
        attester_signup(1),
        ev(2, 0, 10, EventKind::UserSignedUp {
            epoch: 0,
            identity_commitment: identity_commitment(&Fr::from(1u64)),
            leaf_index: 0,
            initial_data: Vec::new(),
        }),
        ev(2, 1, 10, EventKind::StateTreeLeaf {
            epoch: 0,
            index: 0,
            leaf: user_leaf(1, 0),
        }),
        attestation(3, 0, 20, 11, 0, 10),
        attestation(3, 1, 20, 12, 0, 3),
        attestation(4, 0, 30, 11, 0, 5),
        attestation(4, 1, 30, 11, 4, 9),
        ev(4, 2, 30, EventKind::StateTreeLeaf {
            epoch: 0,
            index: 1,
            leaf: user_leaf(2, 0),
        }),
        ev(5, 0, 150, EventKind::EpochEnded { epoch: 0 }),
        ev(5, 1, 150, EventKind::EpochSealed {
            epoch: 0,
            root: expected_epoch_root(&writes),
            sealer: attester(),
        }),
        ev(6, 0, 160, EventKind::UserStateTransitioned {
            from_epoch: 0,
            to_epoch: 1,
            leaf_index: 0,
            state_tree_leaf: user_leaf(1, 1),
            nullifiers: nullifiers(),
        }),
    ]
}

#[tokio::test]
async fn resume_after_crash_matches_uninterrupted_run() {
    let events = full_history();
    let full = MemoryEventSource::new();
    full.extend(events.clone()).await;

    let reference = new_sync(&full, None);
    drive(&reference).await;
    assert_eq!(reference.status().rejected, 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("projection.db");

    let partial = MemoryEventSource::new();
    partial
        .extend(events.iter().filter(|e| e.block_number <= 3).cloned())
        .await;
    let first_run = new_sync(&partial, Some(path.clone()));
    drive(&first_run).await;
    first_run.stop().await;
    drop(first_run);

    // Crash after committing the first event of block 4 but before the block
    // itself was marked synced.
    let interrupted = events
        .iter()
        .find(|e| e.block_number == 4)
        .cloned()
        .unwrap();
    {
        let settings = settings();
        let db = ProjectionDb::open(&path, &settings).unwrap();
        let projection = db.load_projection(&settings).unwrap();
        let policy = SealerPolicy::default();
        let ctx = PlanContext::new(&settings, &policy);
        match plan(&projection, &ctx, &interrupted).unwrap() {
            Plan::Apply(changes) => db
                .commit_event(&interrupted, &EventOutcome::Applied, &changes)
                .unwrap(),
            Plan::Reject(r) => panic!("unexpected rejection {r:?}"),
        }
    }

    let resumed = new_sync(&full, Some(path));
    assert_eq!(resumed.status().cursor, Some(interrupted.id()));
    assert_eq!(resumed.status().synced_block, Some(3));
    drive(&resumed).await;

    let remaining = events.iter().filter(|e| e.block_number >= 4).count() as u64;
    assert_eq!(resumed.status().applied, remaining - 1);
    for epoch in [0, 1] {
        assert_eq!(
            resumed.gen_state_tree(&attester(), epoch).await.unwrap().root(),
            reference.gen_state_tree(&attester(), epoch).await.unwrap().root()
        );
    }
    for key in [11u64, 12] {
        assert_eq!(
            resumed
                .get_data_by_epoch_key(&attester(), &Fr::from(key), 0)
                .await
                .unwrap(),
            reference
                .get_data_by_epoch_key(&attester(), &Fr::from(key), 0)
                .await
                .unwrap()
        );
    }
    assert_eq!(
        resumed.sealed_root(&attester(), 0).await,
        reference.sealed_root(&attester(), 0).await
    );
    for nf in nullifiers() {
        assert!(resumed.nullifier_exists(&nf).await);
    }
}

#[tokio::test]
async fn transition_waits_for_seal() {
    let root = expected_epoch_root(&[(11, 0, 10)]);
    let transition = |block: u64, ts: u64, leaf_index: u64| {
        ev(block, 0, ts, EventKind::UserStateTransitioned {
            from_epoch: 0,
            to_epoch: 1,
            leaf_index,
            state_tree_leaf: user_leaf(1, 1),
            nullifiers: nullifiers(),
        })
    };
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            ev(2, 0, 10, EventKind::StateTreeLeaf {
                epoch: 0,
                index: 0,
                leaf: user_leaf(1, 0),
            }),
            attestation(3, 0, 20, 11, 0, 10),
            transition(4, 150, 0),
            ev(5, 0, 160, EventKind::EpochSealed {
                epoch: 0,
                root,
                sealer: attester(),
            }),
            transition(6, 170, 0),
            transition(7, 180, 1),
        ])
        .await;
    let sync = new_sync(&source, None);
    drive(&sync).await;

    let code = |outcome: Option<EventOutcome>| match outcome {
        Some(EventOutcome::Rejected(r)) => Some(r.code),
        _ => None,
    };
    assert_eq!(
        code(sync.event_outcome(4, 0).unwrap()),
        Some(RejectionCode::UnsealedEpochReference)
    );
    assert_eq!(sync.event_outcome(5, 0).unwrap(), Some(EventOutcome::Applied));
    assert_eq!(sync.event_outcome(6, 0).unwrap(), Some(EventOutcome::Applied));
    assert_eq!(
        code(sync.event_outcome(7, 0).unwrap()),
        Some(RejectionCode::DuplicateNullifier)
    );

    assert_eq!(sync.epoch_phase(&attester(), 0).await.unwrap(), EpochPhase::Sealed);
    assert!(sync.epoch_tree_root_exists(&attester(), &root, 0).await);
    assert_eq!(
        sync.state_tree_leaves(&attester(), 1).await.unwrap(),
        vec![user_leaf(1, 1)]
    );
    assert_eq!(sync.status().rejected, 2);
}

#[tokio::test]
async fn aggregates_sum_and_last_write() {
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            attestation(2, 0, 10, 5, 0, 10),
            attestation(2, 1, 10, 5, 0, 5),
            attestation(2, 2, 10, 5, 4, 7),
            attestation(2, 3, 10, 5, 4, 9),
            // Epoch 1 has not started at t=10.
            ev(2, 4, 10, EventKind::Attestation {
                epoch: 1,
                epoch_key: Fr::from(5u64),
                field_index: 0,
                value: Fr::from(100u64),
            }),
        ])
        .await;
    let sync = new_sync(&source, None);
    drive(&sync).await;

    let data = sync
        .get_data_by_epoch_key(&attester(), &Fr::from(5u64), 0)
        .await
        .unwrap();
    assert_eq!(data.get(0), Some(Fr::from(15u64)));
    assert_eq!(data.unpacked(&settings())[4], Fr::from(9u64));
    assert!(matches!(
        sync.event_outcome(2, 4).unwrap(),
        Some(EventOutcome::Rejected(r)) if r.code == RejectionCode::EpochMismatch
    ));

    // The ledger's own epoch-tree leaf agrees with the local aggregate.
    let leaf = zkrep_common::epoch_tree_leaf(&Fr::from(5u64), data.values());
    source
        .push(ev(3, 0, 20, EventKind::EpochTreeLeaf {
            epoch: 0,
            epoch_key: Fr::from(5u64),
            leaf,
        }))
        .await;
    drive(&sync).await;
    assert_eq!(sync.event_outcome(3, 0).unwrap(), Some(EventOutcome::Applied));

    let untouched = sync
        .get_data_by_epoch_key(&attester(), &Fr::from(6u64), 0)
        .await
        .unwrap();
    assert_eq!(untouched, DataVector::new(settings().field_count));
}

#[tokio::test]
async fn seal_and_verify_proofs() {
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            ev(2, 0, 10, EventKind::StateTreeLeaf {
                epoch: 0,
                index: 0,
                leaf: user_leaf(1, 0),
            }),
            attestation(3, 0, 20, 11, 0, 10),
        ])
        .await;
    let sync = new_sync(&source, None);
    drive(&sync).await;
    let settings = settings();
    let state_root = sync.gen_state_tree(&attester(), 0).await.unwrap().root();

    let epoch_key_proof = |root: Fr| {
        let control = EpochKeyControl {
            nonce: 0,
            epoch: 0,
            attester_id: attester(),
            reveal_nonce: false,
            chain_id: settings.chain_id,
        };
        let proof = Proof {
            public_signals: vec![Fr::from(11u64), root, control.encode(&settings.control), Fr::ZERO],
            raw_proof: PROOF_BYTES.to_vec(),
        };
        ZkProof::parse(CircuitKind::EpochKey, proof, &settings).unwrap()
    };
    assert!(sync.verify_proof(&EchoProver, &epoch_key_proof(state_root)).await.unwrap());
    assert!(!sync
        .verify_proof(&EchoProver, &epoch_key_proof(Fr::from(4u64)))
        .await
        .unwrap());

    // Still active: nothing to seal yet.
    assert!(matches!(
        sync.prove_epoch_seal(&EchoProver, &attester(), 0).await,
        Err(SyncError::State(StateError::EpochMismatch(_)))
    ));

    source
        .set_head(ChainHead {
            block_number: 4,
            timestamp: 150,
        })
        .await;
    drive(&sync).await;
    let epoch_root = expected_epoch_root(&[(11, 0, 10)]);

    let transition_proof = |epoch_root: Fr| {
        let control = TransitionControl {
            attester_id: attester(),
            to_epoch: 1,
            chain_id: settings.chain_id,
        };
        let mut signals = vec![
            Fr::ZERO,
            state_root,
            epoch_root,
            user_leaf(1, 1),
            control.encode(&settings.control),
        ];
        signals.extend(nullifiers());
        let proof = Proof {
            public_signals: signals,
            raw_proof: PROOF_BYTES.to_vec(),
        };
        ZkProof::parse(CircuitKind::UserStateTransition, proof, &settings).unwrap()
    };
    assert!(matches!(
        sync.verify_proof(&EchoProver, &transition_proof(epoch_root)).await,
        Err(SyncError::State(StateError::UnsealedEpochReference { epoch: 0 }))
    ));

    let sealed = sync.prove_epoch_seal(&EchoProver, &attester(), 0).await.unwrap();
    let ZkProof::BuildOrderedTree(seal, _) = sealed else {
        panic!("expected an ordered-tree proof");
    };
    assert_eq!(seal.root, epoch_root);

    source
        .push(ev(5, 0, 160, EventKind::EpochSealed {
            epoch: 0,
            root: seal.root,
            sealer: attester(),
        }))
        .await;
    drive(&sync).await;
    assert!(sync
        .verify_proof(&EchoProver, &transition_proof(epoch_root))
        .await
        .unwrap());
    assert!(!sync
        .verify_proof(&EchoProver, &transition_proof(Fr::from(1u64)))
        .await
        .unwrap());
    assert!(matches!(
        sync.prove_epoch_seal(&EchoProver, &attester(), 0).await,
        Err(SyncError::State(StateError::EpochMismatch(_)))
    ));
}

#[tokio::test]
async fn concurrent_waiters_are_released() {
    let source = MemoryEventSource::new();
    source.push(attester_signup(1)).await;
    for block in 2..20u64 {
        source.push(attestation(block, 0, 10, 1, 0, 1)).await;
    }
    let sync = new_sync(&source, None);
    sync.start().unwrap();

    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let sync = sync.clone();
            tokio::spawn(async move { sync.wait_for_sync().await })
        })
        .collect();
    for waiter in waiters {
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("waiter timed out")
            .unwrap()
            .unwrap();
    }
    assert_eq!(sync.status().synced_block, Some(19));
    assert_eq!(sync.status().run_state, RunState::Running);
    sync.stop().await;
    assert_eq!(sync.status().run_state, RunState::Stopped);
}

#[tokio::test]
async fn stop_releases_pending_waiters() {
    let source = MemoryEventSource::new();
    source.push(attester_signup(3)).await;
    let sync = new_sync(&source, None);

    let waiter = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.wait_for_sync().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    sync.stop().await;
    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter hung after stop")
        .unwrap();
    assert!(matches!(result, Err(SyncError::Stopped)));
    assert!(matches!(sync.poll_once().await, Err(SyncError::Stopped)));
}

#[tokio::test]
async fn seal_root_mismatch_halts_until_resync() {
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            attestation(2, 0, 10, 11, 0, 10),
            ev(3, 0, 150, EventKind::EpochSealed {
                epoch: 0,
                root: Fr::from(12_345u64),
                sealer: attester(),
            }),
        ])
        .await;
    let sync = new_sync(&source, None);
    assert!(matches!(sync.poll_once().await, Err(SyncError::RootMismatch(_))));
    let status = sync.status();
    assert_eq!(status.run_state, RunState::Halted);
    assert!(status.last_error.is_some());
    assert_eq!(status.cursor.map(|c| c.block_number), Some(2));

    // Reads keep serving the last consistent snapshot.
    let data = sync
        .get_data_by_epoch_key(&attester(), &Fr::from(11u64), 0)
        .await
        .unwrap();
    assert_eq!(data.get(0), Some(Fr::from(10u64)));
    assert_eq!(sync.sealed_root(&attester(), 0).await, None);

    let pending = tokio::time::timeout(Duration::from_millis(50), sync.wait_for_sync()).await;
    assert!(pending.is_err());
    assert!(matches!(sync.poll_once().await, Err(SyncError::Halted(_))));

    sync.resync().await.unwrap();
    assert_eq!(sync.status().run_state, RunState::Idle);
    assert!(matches!(sync.poll_once().await, Err(SyncError::RootMismatch(_))));
}

#[tokio::test]
async fn epoch_tree_leaf_for_unknown_key_halts() {
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            attestation(2, 0, 10, 11, 0, 10),
            ev(3, 0, 20, EventKind::EpochTreeLeaf {
                epoch: 0,
                epoch_key: Fr::from(99u64),
                leaf: Fr::from(5u64),
            }),
        ])
        .await;
    let sync = new_sync(&source, None);
    assert!(matches!(sync.poll_once().await, Err(SyncError::RootMismatch(_))));
    assert_eq!(sync.status().run_state, RunState::Halted);
    assert_eq!(sync.status().cursor.map(|c| c.block_number), Some(2));
    assert_eq!(sync.event_outcome(3, 0).unwrap(), None);
    assert_eq!(
        sync.get_data_by_epoch_key(&attester(), &Fr::from(99u64), 0)
            .await
            .unwrap(),
        DataVector::new(settings().field_count)
    );
}

#[tokio::test]
async fn one_shot_run_goes_idle_after_catching_up() {
    let source = MemoryEventSource::new();
    source.push(attester_signup(1)).await;
    let config = SyncConfig {
        settings: settings(),
        poll_interval_ms: 10,
        follow: false,
        ..SyncConfig::default()
    };
    let sync = Synchronizer::new(config, Arc::new(source.clone())).unwrap();
    sync.start().unwrap();

    // The loop finishes long before anyone asks.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.status().run_state, RunState::Idle);
    let status = tokio::time::timeout(Duration::from_secs(2), sync.wait_until_idle())
        .await
        .expect("idle state was missed")
        .unwrap();
    assert_eq!(status.synced_block, Some(1));
    assert_eq!(status.applied, 1);

    sync.stop().await;
    assert!(matches!(sync.wait_until_idle().await, Err(SyncError::Stopped)));
}

#[tokio::test]
async fn source_head_behind_cursor_is_a_gap() {
    let source = MemoryEventSource::new();
    source.extend([attester_signup(1), attestation(5, 0, 10, 1, 0, 1)]).await;
    let sync = new_sync(&source, None);
    drive(&sync).await;

    source
        .set_head(ChainHead {
            block_number: 3,
            timestamp: 10,
        })
        .await;
    assert!(matches!(
        sync.poll_once().await,
        Err(SyncError::CursorGap { head: 3, synced: 5 })
    ));
    assert_eq!(sync.status().run_state, RunState::Halted);
}

#[tokio::test]
async fn misordered_logs_are_fatal() {
    let source = MemoryEventSource::new();
    source
        .extend([
            attester_signup(1),
            ev(2, 1, 10, EventKind::StateTreeLeaf {
                epoch: 0,
                index: 0,
                leaf: user_leaf(1, 0),
            }),
            ev(2, 0, 10, EventKind::StateTreeLeaf {
                epoch: 0,
                index: 1,
                leaf: user_leaf(2, 0),
            }),
        ])
        .await;
    let sync = new_sync(&source, None);
    assert!(matches!(
        sync.poll_once().await,
        Err(SyncError::OutOfOrderEvent {
            block_number: 2,
            log_index: 0,
            ..
        })
    ));
    assert_eq!(sync.state_tree_leaves(&attester(), 0).await.unwrap().len(), 1);
}
