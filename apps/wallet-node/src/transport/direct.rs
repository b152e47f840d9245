//! Per-peer direct-channel bookkeeping.
//!
//! The router guarantees per-(sender,receiver) FIFO delivery by sending
//! in call order over one queue per peer. Messages sent before a channel
//! is observed `open` are queued and flushed on open; once a channel
//! leaves `open`, its pending outbound messages are discarded and
//! reported. Delivery on an open channel is assumed reliable, so nothing
//! here retries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::{PeerChannel, TransportEvent};
use crate::errors::TransportError;
use crate::protocol::direct::DirectMessage;

enum ChannelState {
    /// Not yet open; messages queue in send order.
    Pending(Vec<String>),
    Open,
}

pub struct DirectRouter {
    device_id: String,
    transport: Arc<dyn PeerChannel>,
    events: mpsc::UnboundedSender<TransportEvent>,
    channels: HashMap<String, ChannelState>,
}

impl DirectRouter {
    pub fn new(
        device_id: String,
        transport: Arc<dyn PeerChannel>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            device_id,
            transport,
            events,
            channels: HashMap::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_open(&self, peer: &str) -> bool {
        matches!(self.channels.get(peer), Some(ChannelState::Open))
    }

    /// The embedding environment observed the channel to `peer` open.
    /// Flushes queued messages in their original send order.
    pub fn channel_opened(&mut self, peer: &str) {
        let queued = match self.channels.insert(peer.to_string(), ChannelState::Open) {
            Some(ChannelState::Pending(queued)) => queued,
            _ => Vec::new(),
        };
        for payload in queued {
            if let Err(e) = self.transport.send(peer, &payload) {
                tracing::warn!("flush to {peer} failed: {e}");
            }
        }
        let _ = self.events.send(TransportEvent::ChannelOpen {
            peer: peer.to_string(),
        });
    }

    /// The channel to `peer` left the open state. Pending outbound
    /// messages are dropped, not retried.
    pub fn channel_closed(&mut self, peer: &str) {
        if let Some(ChannelState::Pending(queued)) = self.channels.remove(peer) {
            if !queued.is_empty() {
                tracing::warn!(
                    "discarding {} queued messages for closed channel to {peer}",
                    queued.len()
                );
            }
        }
        let _ = self.events.send(TransportEvent::ChannelClosed {
            peer: peer.to_string(),
        });
    }

    /// Sends or queues an application message for a peer.
    pub fn send(&mut self, peer: &str, message: &DirectMessage) -> Result<(), TransportError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        match self.channels.get_mut(peer) {
            Some(ChannelState::Open) => self.transport.send(peer, &payload),
            Some(ChannelState::Pending(queued)) => {
                queued.push(payload);
                Ok(())
            }
            None => {
                self.channels
                    .insert(peer.to_string(), ChannelState::Pending(vec![payload]));
                Ok(())
            }
        }
    }

    /// Inbound bytes from the embedding environment. Unparseable payloads
    /// are logged and dropped; they never reach the session layer.
    pub fn inbound(&self, peer: &str, payload: &str) {
        match serde_json::from_str::<DirectMessage>(payload) {
            Ok(message) => {
                let _ = self.events.send(TransportEvent::Direct {
                    peer: peer.to_string(),
                    message,
                });
            }
            Err(e) => {
                tracing::warn!("undecodable direct message from {peer}: {e}");
            }
        }
    }

    /// Session teardown: flush what an open channel still has queued, then
    /// forget the channel. Closing the underlying link is the embedding
    /// environment's job.
    pub fn close_channels(&mut self, peers: &[String]) {
        for peer in peers {
            if let Some(ChannelState::Pending(queued)) = self.channels.remove(peer) {
                if !queued.is_empty() {
                    tracing::debug!(
                        "dropping {} never-flushed messages for {peer}",
                        queued.len()
                    );
                }
            }
        }
    }
}
