//! Centralized error types for the wallet node.
//!
//! Session-level failures move the owning session to `Failed(reason)` and
//! surface as events; they are returned directly only to the caller that
//! initiated the operation.

use thiserror::Error;

/// Errors raised by the session protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),

    #[error("Wallet parameter mismatch: expected {expected}, actual {actual}")]
    WalletParameterMismatch { expected: String, actual: String },

    #[error("Protocol violation by {peer} in {phase}: {detail}")]
    ProtocolViolation {
        peer: String,
        phase: String,
        detail: String,
    },

    #[error("Timed out in {phase}")]
    Timeout { phase: String },

    #[error("Direct channel to {peer} closed mid-session")]
    TransportClosed { peer: String },

    #[error("Engine failure in {operation}: {detail}")]
    EngineFailure { operation: String, detail: String },

    #[error("Storage failure: {cause}")]
    StorageFailure { cause: String },

    #[error("Session cancelled")]
    Cancelled,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Session already active: {0}")]
    SessionExists(String),
}

impl SessionError {
    pub fn engine(operation: &str, err: frost_wallet_engine::FrostError) -> Self {
        SessionError::EngineFailure {
            operation: operation.to_string(),
            detail: err.to_string(),
        }
    }
}

/// Errors raised by the transport layer.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Direct channel to {0} is not open")]
    ChannelNotOpen(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Main error type encompassing every subsystem.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Keystore error: {0}")]
    Keystore(#[from] crate::keystore::KeystoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::registry::RegistryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Type alias for Results in this crate.
pub type Result<T> = std::result::Result<T, NodeError>;
