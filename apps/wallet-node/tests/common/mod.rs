#![allow(dead_code)] // each test binary uses a different slice of the harness

//! Deterministic multi-node harness.
//!
//! Each test node is a real coordinator with a real keystore; the harness
//! plays transport, moving relay payloads and direct messages between
//! coordinators in FIFO order. `hold` lets a test pin individual direct
//! messages (for example a `MeshReady`) and release them later.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tempfile::TempDir;

use frost_wallet_engine::CurveKind;
use wallet_node::config::NodeConfig;
use wallet_node::keystore::Keystore;
use wallet_node::protocol::direct::DirectMessage;
use wallet_node::session::{Effect, NodeEvent, SessionCoordinator, SessionEvent};
use wallet_node::SessionError;

pub struct TestNode {
    pub device_id: String,
    pub coordinator: SessionCoordinator,
    pub keystore: Arc<Mutex<Keystore>>,
    pub events: Vec<NodeEvent>,
    pub dir: TempDir,
}

impl TestNode {
    pub fn password(&self) -> String {
        format!("{}-password", self.device_id)
    }
}

pub struct Cluster {
    pub nodes: Vec<TestNode>,
    queue: VecDeque<(usize, SessionEvent)>,
    /// (from, to, message kind) triples to intercept
    hold: Vec<(String, String, &'static str)>,
    held: Vec<(usize, SessionEvent)>,
    /// Every direct message actually delivered, in order
    pub delivered: Vec<(String, String, DirectMessage)>,
}

impl Cluster {
    pub fn new(device_ids: &[&str], curve: CurveKind) -> Self {
        let nodes = device_ids
            .iter()
            .map(|device_id| {
                let dir = TempDir::new().expect("tempdir");
                let mut keystore =
                    Keystore::initialize(dir.path(), device_id).expect("keystore init");
                keystore.unlock(&format!("{device_id}-password"));
                let keystore = Arc::new(Mutex::new(keystore));
                let coordinator = SessionCoordinator::new(
                    device_id.to_string(),
                    NodeConfig::default(),
                    curve,
                    Some(keystore.clone()),
                );
                TestNode {
                    device_id: device_id.to_string(),
                    coordinator,
                    keystore,
                    events: Vec::new(),
                    dir,
                }
            })
            .collect();
        Self {
            nodes,
            queue: VecDeque::new(),
            hold: Vec::new(),
            held: Vec::new(),
            delivered: Vec::new(),
        }
    }

    pub fn index_of(&self, device_id: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.device_id == device_id)
            .unwrap_or_else(|| panic!("unknown device {device_id}"))
    }

    pub fn node(&self, device_id: &str) -> &TestNode {
        &self.nodes[self.index_of(device_id)]
    }

    /// Intercept direct messages of `kind` from one device to another
    /// until `release_held` is called.
    pub fn hold_direct(&mut self, from: &str, to: &str, kind: &'static str) {
        self.hold.push((from.to_string(), to.to_string(), kind));
    }

    pub fn release_held(&mut self) {
        self.hold.clear();
        let held = std::mem::take(&mut self.held);
        self.queue.extend(held);
        self.run();
    }

    /// Feeds a local command to a device and pumps the cluster to
    /// quiescence. Command validation errors surface here.
    pub fn dispatch(&mut self, device_id: &str, event: SessionEvent) -> Result<(), SessionError> {
        let idx = self.index_of(device_id);
        let effects = self.nodes[idx].coordinator.handle(event)?;
        self.apply(idx, effects);
        self.run();
        Ok(())
    }

    pub fn tick_all(&mut self, now: Instant) {
        for idx in 0..self.nodes.len() {
            let effects = self.nodes[idx]
                .coordinator
                .handle(SessionEvent::Tick { now })
                .expect("tick never fails");
            self.apply(idx, effects);
        }
        self.run();
    }

    fn run(&mut self) {
        while let Some((idx, event)) = self.queue.pop_front() {
            let effects = self.nodes[idx]
                .coordinator
                .handle(event)
                .expect("transport events never fail");
            self.apply(idx, effects);
        }
    }

    fn apply(&mut self, from_idx: usize, effects: Vec<Effect>) {
        let from = self.nodes[from_idx].device_id.clone();
        for effect in effects {
            match effect {
                Effect::Relay { to, message } => {
                    let to_idx = self.index_of(&to);
                    self.queue.push_back((
                        to_idx,
                        SessionEvent::SignalingMessage {
                            from: from.clone(),
                            message,
                        },
                    ));
                }
                Effect::SendDirect { to, message } => {
                    let to_idx = self.index_of(&to);
                    let kind = message.kind();
                    let event = SessionEvent::Direct {
                        from: from.clone(),
                        message: message.clone(),
                    };
                    if self
                        .hold
                        .iter()
                        .any(|(f, t, k)| f == &from && t == &to && *k == kind)
                    {
                        self.held.push((to_idx, event));
                    } else {
                        self.delivered.push((from.clone(), to, message));
                        self.queue.push_back((to_idx, event));
                    }
                }
                Effect::OpenChannels { peers, .. } => {
                    // Channel establishment is symmetric: both ends observe
                    // the open.
                    for peer in peers {
                        let peer_idx = self.index_of(&peer);
                        self.queue
                            .push_back((from_idx, SessionEvent::ChannelOpen { peer: peer.clone() }));
                        self.queue.push_back((
                            peer_idx,
                            SessionEvent::ChannelOpen { peer: from.clone() },
                        ));
                    }
                }
                Effect::CloseChannels { .. } => {}
                Effect::Emit(event) => {
                    self.nodes[from_idx].events.push(event);
                }
            }
        }
    }

    pub fn events_of(&self, device_id: &str) -> &[NodeEvent] {
        &self.node(device_id).events
    }

    pub fn find_event<'a, F>(&'a self, device_id: &str, predicate: F) -> Option<&'a NodeEvent>
    where
        F: Fn(&NodeEvent) -> bool,
    {
        self.events_of(device_id).iter().find(|e| predicate(e))
    }

    pub fn sent_by(&self, device_id: &str, kind: &str) -> usize {
        self.delivered
            .iter()
            .filter(|(from, _, message)| from == device_id && message.kind() == kind)
            .count()
    }
}

/// Runs a full DKG over the cluster and returns the wallet id.
pub fn run_dkg(cluster: &mut Cluster, session_id: &str, threshold: u16) -> String {
    let participants: Vec<String> = cluster.nodes.iter().map(|n| n.device_id.clone()).collect();
    let total = participants.len() as u16;
    let proposer = participants[0].clone();
    cluster
        .dispatch(
            &proposer,
            SessionEvent::ProposeSession {
                session_id: session_id.to_string(),
                total,
                threshold,
                participants: participants.clone(),
            },
        )
        .expect("proposal is valid");
    for device in &participants[1..] {
        cluster
            .dispatch(
                device,
                SessionEvent::AcceptSession {
                    session_id: session_id.to_string(),
                },
            )
            .expect("acceptance succeeds");
    }
    session_id.to_string()
}
