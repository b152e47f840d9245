//! Per-session mesh readiness tracking.
//!
//! The tracker owns the channel/readiness sets; the session owns the state
//! machine. Readiness requires, for this node: an open direct channel to
//! every other participant, a sent `MeshReady`, and a received `MeshReady`
//! from every other participant. The persisted wire name for the received
//! set is `ready_devices`.

use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct MeshTracker {
    device_id: String,
    participants: Vec<String>,
    channel_open: HashSet<String>,
    mesh_ready_sent: bool,
    /// Devices that signaled `MeshReady` for this session; includes self
    /// once our own signal has been sent.
    ready_devices: HashSet<String>,
    local_accepted: bool,
}

impl MeshTracker {
    pub fn new(device_id: String, participants: Vec<String>) -> Self {
        Self {
            device_id,
            participants,
            channel_open: HashSet::new(),
            mesh_ready_sent: false,
            ready_devices: HashSet::new(),
            local_accepted: false,
        }
    }

    fn peers(&self) -> impl Iterator<Item = &String> {
        self.participants.iter().filter(move |p| **p != self.device_id)
    }

    pub fn record_local_accept(&mut self) {
        self.local_accepted = true;
    }

    pub fn is_participant(&self, device_id: &str) -> bool {
        self.participants.iter().any(|p| p == device_id)
    }

    /// Participants other than this node, in session order.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers().cloned().collect()
    }

    /// Drops a participant from the readiness requirement (a signing
    /// decliner is no longer needed for the mesh).
    pub fn remove_participant(&mut self, device_id: &str) {
        self.participants.retain(|p| p != device_id);
        self.channel_open.remove(device_id);
        self.ready_devices.remove(device_id);
    }

    /// Returns true if this newly opened the channel.
    pub fn record_channel_open(&mut self, peer: &str) -> bool {
        if !self.participants.iter().any(|p| p == peer) {
            return false;
        }
        self.channel_open.insert(peer.to_string())
    }

    pub fn record_channel_closed(&mut self, peer: &str) {
        self.channel_open.remove(peer);
    }

    pub fn is_channel_open(&self, peer: &str) -> bool {
        self.channel_open.contains(peer)
    }

    pub fn all_channels_open(&self) -> bool {
        self.peers().all(|p| self.channel_open.contains(p))
    }

    /// Idempotent: duplicate signals do not change the set.
    pub fn record_mesh_ready(&mut self, device_id: &str) {
        if self.participants.iter().any(|p| p == device_id) {
            self.ready_devices.insert(device_id.to_string());
        }
    }

    /// The `MeshReady` signal is sent exactly once, when every peer channel
    /// is open and the session has been locally accepted.
    pub fn should_send_ready(&self) -> bool {
        !self.mesh_ready_sent && self.local_accepted && self.all_channels_open()
    }

    pub fn mark_ready_sent(&mut self) {
        self.mesh_ready_sent = true;
        self.ready_devices.insert(self.device_id.clone());
    }

    pub fn ready_sent(&self) -> bool {
        self.mesh_ready_sent
    }

    /// Full mesh readiness for this node: DKG round 1 must not start until
    /// this holds.
    pub fn is_ready(&self) -> bool {
        self.mesh_ready_sent
            && self.all_channels_open()
            && self
                .participants
                .iter()
                .all(|p| self.ready_devices.contains(p))
    }

    pub fn ready_devices(&self) -> &HashSet<String> {
        &self.ready_devices
    }
}
