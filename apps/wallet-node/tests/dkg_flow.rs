//! End-to-end DKG across three coordinators with a played transport.

mod common;

use common::{run_dkg, Cluster};
use frost_wallet_engine::CurveKind;
use wallet_node::keystore::Keystore;
use wallet_node::session::{DkgState, NodeEvent, SessionEvent};
use wallet_node::SessionError;

#[test]
fn test_dkg_2_of_3_secp256k1_completes_on_all_nodes() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "wallet_2of3", 2);

    let mut addresses = Vec::new();
    let mut group_keys = Vec::new();
    for device in ["alice", "bob", "carol"] {
        assert_eq!(
            cluster.node(device).coordinator.dkg_state(&wallet_id),
            Some(&DkgState::Complete),
            "{device} did not complete"
        );
        let complete = cluster
            .find_event(device, |e| matches!(e, NodeEvent::DkgComplete { .. }))
            .unwrap_or_else(|| panic!("{device} has no DkgComplete event"));
        if let NodeEvent::DkgComplete {
            address,
            group_public_key,
            wallet_id: committed,
            ..
        } = complete
        {
            assert_eq!(committed, &wallet_id);
            addresses.push(address.clone());
            group_keys.push(group_public_key.clone());
        }
    }
    // Identical group key and derived Ethereum address everywhere.
    assert!(addresses.iter().all(|a| a == &addresses[0]));
    assert!(addresses[0].starts_with("0x"));
    assert_eq!(addresses[0].len(), 42);
    assert!(group_keys.iter().all(|k| k == &group_keys[0]));
}

#[test]
fn test_dkg_persists_shares_with_ordered_indices() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "wallet_2of3", 2);

    for (position, device) in ["alice", "bob", "carol"].iter().enumerate() {
        let node = cluster.node(device);
        let record = node
            .keystore
            .lock()
            .unwrap()
            .get_key_share(&wallet_id)
            .expect("share decrypts under the unlock password");
        assert_eq!(record.participant_index, (position + 1) as u16);
        assert_eq!(record.threshold, 2);
        assert_eq!(record.total_participants, 3);
        assert_eq!(record.curve, "secp256k1");
        assert_eq!(
            record.participants,
            vec!["alice".to_string(), "bob".to_string(), "carol".to_string()]
        );
        assert!(record.ethereum_address.is_some());

        // A fresh keystore instance with the same password returns the
        // identical record from disk.
        let mut reopened = Keystore::initialize(node.dir.path(), device).unwrap();
        reopened.unlock(&node.password());
        assert_eq!(reopened.get_key_share(&wallet_id).unwrap(), record);
    }
}

#[test]
fn test_round1_gated_on_missing_mesh_ready() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    // bob's readiness signal toward alice is withheld: alice must not emit
    // any round 1 packet even though every channel is open.
    cluster.hold_direct("bob", "alice", "MeshReady");
    run_dkg(&mut cluster, "gated_wallet", 2);

    assert_eq!(cluster.sent_by("alice", "DkgRound1Package"), 0);
    assert_ne!(
        cluster.node("alice").coordinator.dkg_state("gated_wallet"),
        Some(&DkgState::Complete)
    );

    // Once the signal arrives, the session runs to completion everywhere.
    cluster.release_held();
    assert!(cluster.sent_by("alice", "DkgRound1Package") > 0);
    for device in ["alice", "bob", "carol"] {
        assert_eq!(
            cluster.node(device).coordinator.dkg_state("gated_wallet"),
            Some(&DkgState::Complete)
        );
    }
}

#[test]
fn test_invalid_proposals_rejected_before_any_packet() {
    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Secp256k1);

    // threshold above total
    let err = cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "bad".into(),
                total: 2,
                threshold: 3,
                participants: vec!["alice".into(), "bob".into()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidProposal(_)));

    // duplicate participants
    let err = cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "bad".into(),
                total: 2,
                threshold: 2,
                participants: vec!["alice".into(), "alice".into()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidProposal(_)));

    // proposer absent from the participant list
    let err = cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "bad".into(),
                total: 2,
                threshold: 2,
                participants: vec!["bob".into(), "carol".into()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidProposal(_)));

    assert!(cluster.delivered.is_empty());
}

#[test]
fn test_dkg_ed25519_derives_common_solana_address() {
    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Ed25519);
    let wallet_id = run_dkg(&mut cluster, "sol_wallet", 2);

    let mut addresses = Vec::new();
    for device in ["alice", "bob"] {
        let record = cluster
            .node(device)
            .keystore
            .lock()
            .unwrap()
            .get_key_share(&wallet_id)
            .unwrap();
        assert_eq!(record.curve, "ed25519");
        addresses.push(record.solana_address.expect("solana address recorded"));
    }
    assert_eq!(addresses[0], addresses[1]);
    assert!(!addresses[0].starts_with("0x"));
}

#[test]
fn test_acceptance_timeout_fails_session() {
    use std::time::{Duration, Instant};

    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Secp256k1);
    cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "stalled".into(),
                total: 2,
                threshold: 2,
                participants: vec!["alice".into(), "bob".into()],
            },
        )
        .unwrap();

    // Nobody accepts; the acceptance deadline elapses.
    cluster.tick_all(Instant::now() + Duration::from_secs(300));

    match cluster.node("alice").coordinator.dkg_state("stalled") {
        Some(DkgState::Failed(reason)) => assert_eq!(reason, "timeout_acceptance"),
        other => panic!("expected timeout failure, got {other:?}"),
    }
    let timed_out = cluster
        .find_event("alice", |e| {
            matches!(
                e,
                NodeEvent::SessionFailed {
                    reason: SessionError::Timeout { .. },
                    ..
                }
            )
        })
        .is_some();
    assert!(timed_out);
}

#[test]
fn test_cancellation_is_a_terminal_failure() {
    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Secp256k1);
    cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "doomed".into(),
                total: 2,
                threshold: 2,
                participants: vec!["alice".into(), "bob".into()],
            },
        )
        .unwrap();
    cluster
        .dispatch(
            "alice",
            SessionEvent::CancelSession {
                session_id: "doomed".into(),
            },
        )
        .unwrap();

    assert_eq!(
        cluster.node("alice").coordinator.dkg_state("doomed"),
        Some(&DkgState::Failed("cancelled".into()))
    );
    assert!(cluster
        .node("alice")
        .keystore
        .lock()
        .unwrap()
        .get_wallet("doomed")
        .is_none());
}

#[test]
fn test_participant_decline_fails_dkg() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: "declined".into(),
                total: 3,
                threshold: 2,
                participants: vec!["alice".into(), "bob".into(), "carol".into()],
            },
        )
        .unwrap();
    cluster
        .dispatch(
            "bob",
            SessionEvent::RejectSession {
                session_id: "declined".into(),
            },
        )
        .unwrap();

    assert!(matches!(
        cluster.node("alice").coordinator.dkg_state("declined"),
        Some(DkgState::Failed(_))
    ));
    assert!(cluster
        .find_event("alice", |e| matches!(e, NodeEvent::SessionFailed { .. }))
        .is_some());
    // A failed DKG leaves the keystore unchanged.
    assert!(cluster
        .node("alice")
        .keystore
        .lock()
        .unwrap()
        .get_wallet("declined")
        .is_none());
}
