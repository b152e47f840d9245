//! Keystore recovery across the unlock lifecycle, driven through the
//! coordinator stack: unlocking never verifies the password, the first
//! AEAD decrypt does, and a re-unlock with the right password brings the
//! node back to full signing capability.

mod common;

use common::{run_dkg, Cluster};
use frost_wallet_engine::CurveKind;
use wallet_node::keystore::KeystoreError;
use wallet_node::session::{DkgState, NodeEvent, SessionEvent, SigningState};
use wallet_node::SessionError;

#[test]
fn test_wrong_then_right_password_unlock() {
    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "recovery_wallet", 2);
    let message_hex = hex::encode(b"hello");

    let original = cluster
        .node("alice")
        .keystore
        .lock()
        .unwrap()
        .get_key_share(&wallet_id)
        .unwrap();

    // Lock, then unlock with the wrong password. Unlock reports success
    // on any password; authentication is deferred to the first decrypt.
    {
        let node = cluster.node("alice");
        let mut keystore = node.keystore.lock().unwrap();
        keystore.lock();
        assert!(keystore.unlock("wrong"));
        match keystore.get_key_share(&wallet_id) {
            Err(KeystoreError::DecryptionFailed) => {}
            other => panic!("expected DecryptionFailed, got {other:?}"),
        }
    }

    // The coordinator observes the same failure when it tries to load the
    // share for a signing session.
    let err = cluster
        .dispatch(
            "alice",
            SessionEvent::InitiateSigning {
                wallet_id: wallet_id.clone(),
                message_hex: message_hex.clone(),
            },
        )
        .unwrap_err();
    match err {
        SessionError::EngineFailure { operation, detail } => {
            assert_eq!(operation, "load_share");
            assert!(detail.contains("Decryption failed"), "detail was {detail:?}");
        }
        other => panic!("expected EngineFailure, got {other:?}"),
    }
    assert!(matches!(
        cluster.node("alice").coordinator.dkg_state(&wallet_id),
        Some(DkgState::Failed(_))
    ));
    // The failed attempt leaves the keystore itself unchanged.
    assert!(cluster
        .node("alice")
        .keystore
        .lock()
        .unwrap()
        .get_wallet(&wallet_id)
        .is_some());

    // Re-unlock with the right password: the stored record comes back
    // byte-equal.
    {
        let node = cluster.node("alice");
        let mut keystore = node.keystore.lock().unwrap();
        assert!(keystore.unlock(&node.password()));
        assert_eq!(keystore.get_key_share(&wallet_id).unwrap(), original);
    }

    // And the full signing ceremony now runs end to end.
    cluster
        .dispatch(
            "alice",
            SessionEvent::InitiateSigning {
                wallet_id: wallet_id.clone(),
                message_hex,
            },
        )
        .expect("signing initiates after recovery");
    cluster
        .dispatch(
            "bob",
            SessionEvent::AcceptSession {
                session_id: wallet_id.clone(),
            },
        )
        .unwrap();

    let signing_id = match cluster
        .find_event("bob", |e| {
            matches!(e, NodeEvent::SigningRequestReceived { .. })
        })
        .expect("bob saw the signing request")
    {
        NodeEvent::SigningRequestReceived { signing_id, .. } => signing_id.clone(),
        _ => unreachable!(),
    };
    cluster
        .dispatch("bob", SessionEvent::AcceptSigning { signing_id })
        .unwrap();

    for device in ["alice", "bob"] {
        assert_eq!(
            cluster.node(device).coordinator.signing_state(&wallet_id),
            Some(&SigningState::Complete),
            "{device} did not complete signing after recovery"
        );
    }
}
