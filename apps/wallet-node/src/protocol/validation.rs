//! Structural validation ahead of the protocol layer.
//!
//! These checks enforce shape only: required fields present, ids non-empty,
//! counts in range, payloads hex. Failures are logged and the message is
//! dropped; they never fail a session on their own.

use super::direct::DirectMessage;
use super::signal::{SessionProposal, WebSocketMessage};

pub fn validate_signal(msg: &WebSocketMessage) -> Result<(), String> {
    match msg {
        WebSocketMessage::SessionProposal(proposal) => validate_proposal_shape(proposal),
        WebSocketMessage::SessionResponse(response) => {
            if response.session_id.is_empty() {
                return Err("session response with empty session_id".to_string());
            }
            Ok(())
        }
        WebSocketMessage::WebRTCSignal(_) => Ok(()),
    }
}

/// Shape-only proposal checks. Invariant checks (self-membership, keystore
/// match) belong to the session layer.
pub fn validate_proposal_shape(proposal: &SessionProposal) -> Result<(), String> {
    if proposal.session_id.is_empty() {
        return Err("proposal with empty session_id".to_string());
    }
    if proposal.total == 0 || proposal.threshold == 0 {
        return Err("proposal with zero total or threshold".to_string());
    }
    if proposal.threshold > proposal.total {
        return Err(format!(
            "proposal threshold {} exceeds total {}",
            proposal.threshold, proposal.total
        ));
    }
    if proposal.participants.len() != proposal.total as usize {
        return Err(format!(
            "proposal lists {} participants but total is {}",
            proposal.participants.len(),
            proposal.total
        ));
    }
    if proposal.participants.iter().any(|p| p.is_empty()) {
        return Err("proposal with empty participant id".to_string());
    }
    Ok(())
}

pub fn validate_direct(msg: &DirectMessage) -> Result<(), String> {
    match msg {
        DirectMessage::ChannelOpen { device_id } => non_empty("device_id", device_id),
        DirectMessage::MeshReady {
            session_id,
            device_id,
        } => {
            non_empty("session_id", session_id)?;
            non_empty("device_id", device_id)
        }
        DirectMessage::SimpleMessage { .. } => Ok(()),
        DirectMessage::DkgRound1Package { package } => hex_payload("package", package),
        DirectMessage::DkgRound2Package { package } => {
            if package.is_empty() {
                return Err("round 2 package map is empty".to_string());
            }
            for (key, value) in package {
                if key.len() != 64 || hex::decode(key).is_err() {
                    return Err(format!("round 2 map key is not a 32-byte identifier: {key}"));
                }
                hex_payload("package entry", value)?;
            }
            Ok(())
        }
        DirectMessage::DkgPackageRequest { round, requester } => {
            valid_round(*round)?;
            non_empty("requester", requester)
        }
        DirectMessage::DkgPackageResend { round, .. } => valid_round(*round),
        DirectMessage::SigningRequest {
            signing_id,
            transaction_data,
            required_signers,
        } => {
            non_empty("signing_id", signing_id)?;
            hex_payload("transaction_data", transaction_data)?;
            if *required_signers == 0 {
                return Err("signing request requires zero signers".to_string());
            }
            Ok(())
        }
        DirectMessage::SigningAcceptance { signing_id, .. } => non_empty("signing_id", signing_id),
        DirectMessage::SignerSelection {
            signing_id,
            selected_signers,
        } => {
            non_empty("signing_id", signing_id)?;
            if selected_signers.is_empty() {
                return Err("signer selection is empty".to_string());
            }
            Ok(())
        }
        DirectMessage::SigningCommitment {
            signing_id,
            sender_identifier,
            commitment,
        } => {
            non_empty("signing_id", signing_id)?;
            hex_payload("sender_identifier", sender_identifier)?;
            hex_payload("commitment", commitment)
        }
        DirectMessage::SignatureShare {
            signing_id,
            sender_identifier,
            share,
        } => {
            non_empty("signing_id", signing_id)?;
            hex_payload("sender_identifier", sender_identifier)?;
            hex_payload("share", share)
        }
        DirectMessage::AggregatedSignature {
            signing_id,
            signature,
        } => {
            non_empty("signing_id", signing_id)?;
            hex_payload("signature", signature)
        }
    }
}

fn non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err(format!("{field} is empty"))
    } else {
        Ok(())
    }
}

fn hex_payload(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} is empty"));
    }
    if hex::decode(value).is_err() {
        return Err(format!("{field} is not valid hex"));
    }
    Ok(())
}

fn valid_round(round: u8) -> Result<(), String> {
    match round {
        1 | 2 => Ok(()),
        other => Err(format!("unknown DKG round {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::signal::SessionType;
    use std::collections::BTreeMap;

    fn proposal(total: u16, threshold: u16, participants: Vec<&str>) -> SessionProposal {
        SessionProposal {
            session_id: "s1".to_string(),
            total,
            threshold,
            participants: participants.into_iter().map(String::from).collect(),
            session_type: SessionType::DKG,
        }
    }

    #[test]
    fn test_valid_proposal_passes() {
        assert!(validate_proposal_shape(&proposal(3, 2, vec!["a", "b", "c"])).is_ok());
    }

    #[test]
    fn test_threshold_above_total_rejected() {
        assert!(validate_proposal_shape(&proposal(2, 3, vec!["a", "b"])).is_err());
    }

    #[test]
    fn test_participant_count_mismatch_rejected() {
        assert!(validate_proposal_shape(&proposal(3, 2, vec!["a", "b"])).is_err());
    }

    #[test]
    fn test_non_hex_package_rejected() {
        let msg = DirectMessage::DkgRound1Package {
            package: "not-hex!".to_string(),
        };
        assert!(validate_direct(&msg).is_err());
    }

    #[test]
    fn test_round2_map_key_length_enforced() {
        let mut package = BTreeMap::new();
        package.insert("abcd".to_string(), "aa".to_string());
        assert!(validate_direct(&DirectMessage::DkgRound2Package { package }).is_err());

        let mut package = BTreeMap::new();
        package.insert(format!("{:064}", 2), "aabb".to_string());
        assert!(validate_direct(&DirectMessage::DkgRound2Package { package }).is_ok());
    }

    #[test]
    fn test_unknown_round_rejected() {
        let msg = DirectMessage::DkgPackageRequest {
            round: 3,
            requester: "alice".to_string(),
        };
        assert!(validate_direct(&msg).is_err());
    }
}
