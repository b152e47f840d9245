use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application-level messages carried on established direct channels.
///
/// Packages, commitments, shares, and signatures are hex strings; round-2
/// maps are keyed by the hex of the recipient's 32-byte FROST identifier,
/// so the ciphersuite never leaks into the transport layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "webrtc_msg_type")]
pub enum DirectMessage {
    /// Data channel opened notification
    ChannelOpen {
        device_id: String,
    },
    /// Mesh readiness notification
    MeshReady {
        session_id: String,
        device_id: String,
    },
    /// Diagnostics
    SimpleMessage {
        text: String,
    },

    // --- DKG messages ---
    DkgRound1Package {
        package: String,
    },
    /// Per-recipient round 2 subpackages, keyed by identifier hex. Each
    /// message carries exactly the entry addressed to the receiver.
    DkgRound2Package {
        package: BTreeMap<String, String>,
    },
    /// Ask a peer to resend a round package it already produced.
    DkgPackageRequest {
        round: u8,
        requester: String,
    },
    DkgPackageResend {
        round: u8,
        package: serde_json::Value,
    },

    // --- Signing messages ---
    /// Transaction signing request
    SigningRequest {
        signing_id: String,
        /// Hex-encoded message bytes
        transaction_data: String,
        required_signers: usize,
    },
    /// Acceptance of a signing request
    SigningAcceptance {
        signing_id: String,
        accepted: bool,
    },
    /// Selected signers for threshold signing (identifier hex, in
    /// selection order)
    SignerSelection {
        signing_id: String,
        selected_signers: Vec<String>,
    },
    /// FROST signing commitments (Round 1)
    SigningCommitment {
        signing_id: String,
        sender_identifier: String,
        commitment: String,
    },
    /// FROST signature shares (Round 2)
    SignatureShare {
        signing_id: String,
        sender_identifier: String,
        share: String,
    },
    /// Final aggregated signature
    AggregatedSignature {
        signing_id: String,
        signature: String,
    },
}

impl DirectMessage {
    /// Short label used in logs and protocol-violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DirectMessage::ChannelOpen { .. } => "ChannelOpen",
            DirectMessage::MeshReady { .. } => "MeshReady",
            DirectMessage::SimpleMessage { .. } => "SimpleMessage",
            DirectMessage::DkgRound1Package { .. } => "DkgRound1Package",
            DirectMessage::DkgRound2Package { .. } => "DkgRound2Package",
            DirectMessage::DkgPackageRequest { .. } => "DkgPackageRequest",
            DirectMessage::DkgPackageResend { .. } => "DkgPackageResend",
            DirectMessage::SigningRequest { .. } => "SigningRequest",
            DirectMessage::SigningAcceptance { .. } => "SigningAcceptance",
            DirectMessage::SignerSelection { .. } => "SignerSelection",
            DirectMessage::SigningCommitment { .. } => "SigningCommitment",
            DirectMessage::SignatureShare { .. } => "SignatureShare",
            DirectMessage::AggregatedSignature { .. } => "AggregatedSignature",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tag() {
        let msg = DirectMessage::MeshReady {
            session_id: "s1".to_string(),
            device_id: "alice".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["webrtc_msg_type"], "MeshReady");
        assert_eq!(value["session_id"], "s1");
    }

    #[test]
    fn test_round2_map_keys_are_identifier_hex() {
        let mut package = BTreeMap::new();
        package.insert(
            format!("{}{}", "0".repeat(56), "00000002"),
            "aabbcc".to_string(),
        );
        let msg = DirectMessage::DkgRound2Package { package };
        let text = serde_json::to_string(&msg).unwrap();
        let back: DirectMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }
}
