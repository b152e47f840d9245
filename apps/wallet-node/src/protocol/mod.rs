//! Wire formats for the two transport planes.
//!
//! `signal` covers payloads relayed through the signaling server; `direct`
//! covers application messages on established peer channels. `validation`
//! is the thin structural schema layer that precedes the protocol layer.

pub mod direct;
pub mod signal;
pub mod validation;

pub use direct::DirectMessage;
pub use signal::{
    CandidateInfo, SdpInfo, SessionInfo, SessionProposal, SessionResponse, SessionType,
    WalletStatus, WebRtcSignal, WebSocketMessage,
};
