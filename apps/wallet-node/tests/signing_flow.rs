//! End-to-end threshold signing over a wallet produced by a real DKG,
//! plus the auto-detection paths for signing proposals.

mod common;

use common::{run_dkg, Cluster};
use frost_wallet_engine::{CurveEngine, CurveKind};
use wallet_node::protocol::signal::{SessionProposal, SessionType, WebSocketMessage};
use wallet_node::session::{NodeEvent, SessionEvent, SigningState};
use wallet_node::SessionError;

fn signing_request_of(cluster: &Cluster, device: &str) -> (String, String) {
    match cluster
        .find_event(device, |e| {
            matches!(e, NodeEvent::SigningRequestReceived { .. })
        })
        .unwrap_or_else(|| panic!("{device} never saw the signing request"))
    {
        NodeEvent::SigningRequestReceived {
            signing_id,
            message_hex,
            ..
        } => (signing_id.clone(), message_hex.clone()),
        _ => unreachable!(),
    }
}

#[test]
fn test_signing_2_of_3_with_one_rejection() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "wallet_2of3", 2);

    let message_hex = hex::encode(b"hello");
    assert_eq!(message_hex, "68656c6c6f");

    cluster
        .dispatch(
            "alice",
            SessionEvent::InitiateSigning {
                wallet_id: wallet_id.clone(),
                message_hex: message_hex.clone(),
            },
        )
        .expect("wallet exists and message is hex");

    // Receivers see a signing invite because the session id names their
    // stored wallet, and its parameters match.
    for device in ["bob", "carol"] {
        let invite = cluster
            .find_event(device, |e| {
                matches!(
                    e,
                    NodeEvent::InviteReceived { session }
                        if session.session_id == wallet_id
                            && matches!(session.session_type, SessionType::Signing { .. })
                )
            })
            .is_some();
        assert!(invite, "{device} did not receive a signing invite");
        cluster
            .dispatch(
                device,
                SessionEvent::AcceptSession {
                    session_id: wallet_id.clone(),
                },
            )
            .unwrap();
    }

    let (bob_signing_id, _) = signing_request_of(&cluster, "bob");
    let (carol_signing_id, carol_message) = signing_request_of(&cluster, "carol");
    assert_eq!(carol_message, message_hex);

    // carol accepts, bob rejects.
    cluster
        .dispatch(
            "bob",
            SessionEvent::RejectSigning {
                signing_id: bob_signing_id,
            },
        )
        .unwrap();
    cluster
        .dispatch(
            "carol",
            SessionEvent::AcceptSigning {
                signing_id: carol_signing_id,
            },
        )
        .unwrap();

    // Deterministic selection: initiator first, then ascending participant
    // index over the accepting set. bob (index 2) rejected, so the signer
    // set is {alice, carol}.
    let selection = cluster
        .delivered
        .iter()
        .find_map(|(_, _, message)| match message {
            wallet_node::protocol::direct::DirectMessage::SignerSelection {
                selected_signers,
                ..
            } => Some(selected_signers.clone()),
            _ => None,
        })
        .expect("a signer selection was broadcast");
    assert_eq!(selection.len(), 2);
    assert_eq!(&selection[0][56..], "00000001"); // alice, index 1
    assert_eq!(&selection[1][56..], "00000003"); // carol, index 3

    // One signature, agreed on by initiator and co-signer; the observer
    // learns it from the broadcast.
    let mut signatures = Vec::new();
    for device in ["alice", "carol", "bob"] {
        assert_eq!(
            cluster.node(device).coordinator.signing_state(&wallet_id),
            Some(&SigningState::Complete),
            "{device} did not reach Complete"
        );
        match cluster
            .find_event(device, |e| matches!(e, NodeEvent::SigningComplete { .. }))
            .unwrap()
        {
            NodeEvent::SigningComplete { signature_hex, .. } => {
                signatures.push(signature_hex.clone())
            }
            _ => unreachable!(),
        }
    }
    assert!(signatures.iter().all(|s| s == &signatures[0]));

    // The signature verifies against the stored group key and message on
    // an engine rebuilt from any participant's share.
    let record = cluster
        .node("bob")
        .keystore
        .lock()
        .unwrap()
        .get_key_share(&wallet_id)
        .unwrap();
    let data = frost_wallet_engine::KeystoreData {
        key_package: {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(record.key_package.as_bytes())
        },
        public_key_package: {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD
                .encode(record.public_key_package.as_bytes())
        },
        min_signers: record.threshold,
        max_signers: record.total_participants,
        participant_index: record.participant_index,
        participant_indices: (1..=record.total_participants).collect(),
        curve: record.curve.clone(),
        wallet_id: None,
        device_id: None,
        session_id: None,
        timestamp: None,
    };
    let mut verifier = CurveEngine::new(CurveKind::Secp256k1);
    verifier
        .import_keystore(&serde_json::to_string(&data).unwrap())
        .unwrap();
    assert!(verifier
        .verify_signature(&message_hex, &signatures[0])
        .unwrap());
    assert!(!verifier
        .verify_signature(&hex::encode(b"other"), &signatures[0])
        .unwrap());
}

#[test]
fn test_signing_proposal_parameter_mismatch_fails_before_crypto() {
    let mut cluster = Cluster::new(&["alice", "bob", "carol"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "wallet_2of3", 2);
    let before = cluster.delivered.len();

    // Initiator side: proposing the wallet's id with a different
    // participant set is rejected before any packet is sent.
    let err = cluster
        .dispatch(
            "alice",
            SessionEvent::ProposeSession {
                session_id: wallet_id.clone(),
                total: 3,
                threshold: 2,
                participants: vec!["alice".into(), "bob".into(), "dave".into()],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::WalletParameterMismatch { .. }));
    assert_eq!(cluster.delivered.len(), before);

    // Receiver side: the same mismatched proposal arriving over signaling
    // is refused with a structured error and never becomes an invite.
    cluster
        .dispatch(
            "bob",
            SessionEvent::SignalingMessage {
                from: "alice".to_string(),
                message: WebSocketMessage::SessionProposal(SessionProposal {
                    session_id: wallet_id.clone(),
                    total: 3,
                    threshold: 2,
                    participants: vec!["alice".into(), "bob".into(), "dave".into()],
                    session_type: SessionType::DKG,
                }),
            },
        )
        .unwrap();
    let failed = cluster
        .find_event("bob", |e| {
            matches!(
                e,
                NodeEvent::SessionFailed {
                    reason: SessionError::WalletParameterMismatch { .. },
                    ..
                }
            )
        })
        .is_some();
    assert!(failed, "bob did not surface the parameter mismatch");
    assert!(cluster.node("bob").coordinator.invites().is_empty());
}

#[test]
fn test_matching_proposal_autodetects_signing() {
    let mut cluster = Cluster::new(&["alice", "bob"], CurveKind::Secp256k1);
    let wallet_id = run_dkg(&mut cluster, "auto_wallet", 2);

    // A proposal with the wallet's exact parameters is detected as a
    // signing session on the receiver even when the hint says DKG.
    cluster
        .dispatch(
            "bob",
            SessionEvent::SignalingMessage {
                from: "alice".to_string(),
                message: WebSocketMessage::SessionProposal(SessionProposal {
                    session_id: wallet_id.clone(),
                    total: 2,
                    threshold: 2,
                    participants: vec!["alice".into(), "bob".into()],
                    session_type: SessionType::DKG,
                }),
            },
        )
        .unwrap();
    assert_eq!(cluster.node("bob").coordinator.invites().len(), 1);
    cluster
        .dispatch(
            "bob",
            SessionEvent::AcceptSession {
                session_id: wallet_id.clone(),
            },
        )
        .unwrap();
    let info = cluster
        .node("bob")
        .coordinator
        .session_info(&wallet_id)
        .expect("session exists");
    assert!(matches!(info.session_type, SessionType::Signing { .. }));
    assert_eq!(
        cluster.node("bob").coordinator.signing_state(&wallet_id),
        Some(&SigningState::Requested)
    );
}
