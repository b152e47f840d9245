use serde::{Deserialize, Serialize};

/// Session type enum
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum SessionType {
    /// Distributed Key Generation session
    DKG,
    /// Signing session over an existing wallet. Carries the initiator's
    /// detected-wallet hint; receivers re-verify against their own keystore.
    Signing {
        wallet_id: String,
        curve_type: String,
        group_public_key: String,
    },
}

// --- Session Info Struct ---
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: String,
    pub proposer_id: String,
    pub total: u16,
    pub threshold: u16,
    pub participants: Vec<String>,
    /// device_ids that have accepted
    pub accepted_devices: Vec<String>,
    pub session_type: SessionType,
}

impl SessionInfo {
    /// 1-based participant index assigned by position in `participants`.
    pub fn participant_index(&self, device_id: &str) -> Option<u16> {
        self.participants
            .iter()
            .position(|p| p == device_id)
            .map(|i| (i + 1) as u16)
    }

    pub fn device_at_index(&self, index: u16) -> Option<&str> {
        if index == 0 {
            return None;
        }
        self.participants.get((index - 1) as usize).map(|s| s.as_str())
    }
}

// --- Connection descriptors (sent via Relay, consumed by the embedding
// environment that establishes direct channels) ---
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum WebRtcSignal {
    Offer(SdpInfo),
    Answer(SdpInfo),
    Candidate(CandidateInfo),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SdpInfo {
    pub sdp: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CandidateInfo {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "websocket_msg_type")]
pub enum WebSocketMessage {
    /// Session proposal message
    SessionProposal(SessionProposal),
    /// Session response message
    SessionResponse(SessionResponse),
    WebRTCSignal(WebRtcSignal),
}

/// Session proposal information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionProposal {
    pub session_id: String,
    pub total: u16,
    pub threshold: u16,
    pub participants: Vec<String>,
    pub session_type: SessionType,
}

/// Session response information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionResponse {
    pub session_id: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_status: Option<WalletStatus>,
}

/// Wallet status for signing sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletStatus {
    pub has_wallet: bool,
    pub wallet_valid: bool,
    pub identifier: Option<u16>,
    pub error_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_wire_tag() {
        let msg = WebSocketMessage::SessionProposal(SessionProposal {
            session_id: "wallet_2of3".to_string(),
            total: 3,
            threshold: 2,
            participants: vec!["alice".into(), "bob".into(), "carol".into()],
            session_type: SessionType::DKG,
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["websocket_msg_type"], "SessionProposal");
        assert_eq!(value["total"], 3);
        assert_eq!(value["participants"][2], "carol");
    }

    #[test]
    fn test_candidate_field_renames() {
        let signal = WebRtcSignal::Candidate(CandidateInfo {
            candidate: "candidate:1".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        });
        let value = serde_json::to_value(&signal).unwrap();
        assert!(value["Candidate"]["sdpMid"].is_string());
        assert!(value["Candidate"]["sdpMLineIndex"].is_number());
    }

    #[test]
    fn test_participant_index_follows_order() {
        let info = SessionInfo {
            session_id: "s".into(),
            proposer_id: "alice".into(),
            total: 3,
            threshold: 2,
            participants: vec!["alice".into(), "bob".into(), "carol".into()],
            accepted_devices: vec![],
            session_type: SessionType::DKG,
        };
        assert_eq!(info.participant_index("alice"), Some(1));
        assert_eq!(info.participant_index("carol"), Some(3));
        assert_eq!(info.participant_index("mallory"), None);
        assert_eq!(info.device_at_index(2), Some("bob"));
        assert_eq!(info.device_at_index(0), None);
    }
}
