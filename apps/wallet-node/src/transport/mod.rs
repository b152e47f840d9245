//! Transport layer: the signaling plane and the direct-channel plane.
//!
//! Channel establishment (offer/answer/candidate) belongs to the embedding
//! environment. This layer consumes "channel opened for peer X" and
//! "inbound message from peer X" events and emits "send to peer X"; the
//! signaling plane is a single persistent duplex connection shared by all
//! sessions.

pub mod direct;
pub mod memory;
pub mod signaling;

pub use direct::DirectRouter;
pub use memory::InMemoryMesh;
pub use signaling::SignalingClient;

use crate::errors::TransportError;
use crate::protocol::direct::DirectMessage;

/// Events emitted by the transport planes toward the session layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    SignalingConnected,
    SignalingClosed,
    Devices(Vec<String>),
    Relay {
        from: String,
        data: serde_json::Value,
    },
    ChannelOpen {
        peer: String,
    },
    ChannelClosed {
        peer: String,
    },
    Direct {
        peer: String,
        message: DirectMessage,
    },
}

/// Sender half of the peer-to-peer substrate, provided by the embedding
/// environment (a WebRTC data channel, a TCP link, or the in-memory mesh).
pub trait PeerChannel: Send + Sync {
    fn send(&self, to: &str, payload: &str) -> Result<(), TransportError>;
}

/// Hook through which the session layer asks the embedding environment to
/// establish or tear down direct channels for a session.
pub trait ChannelController: Send + Sync {
    fn open_channels(&self, session_id: &str, peers: &[String]);
    fn close_channels(&self, session_id: &str, peers: &[String]);
}

/// Controller for hosts that manage channels entirely on their own.
pub struct NullChannelController;

impl ChannelController for NullChannelController {
    fn open_channels(&self, _session_id: &str, _peers: &[String]) {}
    fn close_channels(&self, _session_id: &str, _peers: &[String]) {}
}
