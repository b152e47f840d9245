//! In-process mesh used by tests and the local demo runner.
//!
//! Every attached device gets a receiver of `(from, payload)` pairs;
//! sending routes straight into the recipient's queue, preserving
//! per-sender order. This stands in for the embedding environment's real
//! peer-to-peer substrate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::PeerChannel;
use crate::errors::TransportError;

type Inbox = mpsc::UnboundedSender<(String, String)>;

#[derive(Clone, Default)]
pub struct InMemoryMesh {
    peers: Arc<Mutex<HashMap<String, Inbox>>>,
}

impl InMemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device and returns its send handle plus the stream of
    /// inbound `(from, payload)` messages.
    pub fn attach(&self, device_id: &str) -> (MeshHandle, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device_id.to_string(), tx);
        (
            MeshHandle {
                device_id: device_id.to_string(),
                mesh: self.clone(),
            },
            rx,
        )
    }

    pub fn detach(&self, device_id: &str) {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device_id);
    }

    fn route(&self, from: &str, to: &str, payload: &str) -> Result<(), TransportError> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let inbox = peers
            .get(to)
            .ok_or_else(|| TransportError::ChannelNotOpen(to.to_string()))?;
        inbox
            .send((from.to_string(), payload.to_string()))
            .map_err(|_| TransportError::ChannelNotOpen(to.to_string()))
    }
}

/// A device's sender half on the in-memory mesh.
pub struct MeshHandle {
    device_id: String,
    mesh: InMemoryMesh,
}

impl PeerChannel for MeshHandle {
    fn send(&self, to: &str, payload: &str) -> Result<(), TransportError> {
        self.mesh.route(&self.device_id, to, payload)
    }
}
