//! The session coordinator: from a proposal to a finalized key package or
//! signature, regardless of message arrival order, peer drop, and
//! duplicated messages.
//!
//! The coordinator is a driver loop: it processes one event at a time
//! against the pattern-matched session state and returns the side effects
//! to perform (relays, direct sends, channel management, emitted node
//! events). Messages that belong to a later phase of a known session are
//! buffered and replayed after each transition; messages for a past phase
//! are dropped; malformed messages are logged and dropped, with two
//! consecutive irrecoverable failures from the same sender in the same
//! round failing the session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use frost_wallet_engine::{CurveEngine, CurveKind, KeystoreData};

use crate::config::NodeConfig;
use crate::errors::SessionError;
use crate::keystore::{KeyShareRecord, Keystore, KEYSTORE_VERSION};
use crate::protocol::direct::DirectMessage;
use crate::protocol::signal::{
    SessionInfo, SessionProposal, SessionResponse, SessionType, WalletStatus, WebSocketMessage,
};
use crate::protocol::validation;
use crate::session::mesh::MeshTracker;
use crate::session::state::{DkgState, SigningState};

/// Inbound events, one at a time.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    // Local commands
    ProposeSession {
        session_id: String,
        total: u16,
        threshold: u16,
        participants: Vec<String>,
    },
    AcceptSession {
        session_id: String,
    },
    RejectSession {
        session_id: String,
    },
    CancelSession {
        session_id: String,
    },
    InitiateSigning {
        wallet_id: String,
        message_hex: String,
    },
    AcceptSigning {
        signing_id: String,
    },
    RejectSigning {
        signing_id: String,
    },
    // Transport events
    SignalingMessage {
        from: String,
        message: WebSocketMessage,
    },
    ChannelOpen {
        peer: String,
    },
    ChannelClosed {
        peer: String,
    },
    Direct {
        from: String,
        message: DirectMessage,
    },
    Tick {
        now: Instant,
    },
}

/// Side effects returned by the driver; the runtime performs them.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Send a payload to a device through the signaling server.
    Relay { to: String, message: WebSocketMessage },
    /// Send an application message on the direct channel to a peer.
    SendDirect { to: String, message: DirectMessage },
    /// Ask the embedding environment to establish direct channels.
    OpenChannels { session_id: String, peers: Vec<String> },
    /// Close a session's direct channels after flushing queued output.
    CloseChannels { session_id: String, peers: Vec<String> },
    /// Surface an event to the host.
    Emit(NodeEvent),
}

/// Events surfaced to the host application.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    InviteReceived {
        session: SessionInfo,
    },
    SessionAccepted {
        session_id: String,
        device_id: String,
    },
    SessionDeclined {
        session_id: String,
        device_id: String,
    },
    MeshReady {
        session_id: String,
    },
    DkgStateChanged {
        session_id: String,
        state: DkgState,
    },
    DkgComplete {
        session_id: String,
        wallet_id: String,
        address: String,
        group_public_key: String,
    },
    SigningRequestReceived {
        session_id: String,
        signing_id: String,
        from: String,
        message_hex: String,
    },
    SigningStateChanged {
        session_id: String,
        state: SigningState,
    },
    SigningComplete {
        session_id: String,
        signing_id: String,
        signature_hex: String,
    },
    SessionFailed {
        session_id: String,
        reason: SessionError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionKind {
    Dkg,
    Signing,
}

enum Disposition {
    Process,
    Buffer,
    Drop,
}

struct ActiveSession {
    info: SessionInfo,
    self_device_id: String,
    kind: SessionKind,
    dkg_state: DkgState,
    signing_state: SigningState,
    mesh: MeshTracker,
    engine: Option<CurveEngine>,
    curve: CurveKind,
    is_initiator: bool,
    // Session-level acceptance (SessionResponse tracking)
    accepted: HashSet<String>,
    rejected: HashSet<String>,
    // Signing ceremony
    signing_id: Option<String>,
    message_hex: Option<String>,
    // Signing-request acceptance, distinct from session acceptance
    signing_accepted: HashSet<String>,
    signing_rejected: HashSet<String>,
    selected_devices: Vec<String>,
    selected_identifiers: Vec<String>,
    aggregated: bool,
    // Duplicate suppression per phase, by device id
    round1_seen: HashSet<String>,
    round2_seen: HashSet<String>,
    commitments_seen: HashSet<String>,
    shares_seen: HashSet<String>,
    // Future-phase messages, replayed after each transition
    pending: Vec<(String, DirectMessage)>,
    // (last phase rank, consecutive count) per sender
    violations: HashMap<String, (u8, u8)>,
    deadline: Option<(Instant, String)>,
}

impl ActiveSession {
    fn peers(&self) -> Vec<String> {
        self.info
            .participants
            .iter()
            .filter(|p| **p != self.self_device_id)
            .cloned()
            .collect()
    }

    fn phase_rank(&self) -> u8 {
        match self.kind {
            SessionKind::Dkg => self.dkg_state.rank(),
            SessionKind::Signing => self.signing_state.rank(),
        }
    }

    fn is_terminal(&self) -> bool {
        match self.kind {
            SessionKind::Dkg => !self.dkg_state.is_active() && self.dkg_state != DkgState::Idle,
            SessionKind::Signing => {
                matches!(
                    self.signing_state,
                    SigningState::Complete | SigningState::Failed(_)
                ) || matches!(self.dkg_state, DkgState::Failed(_))
            }
        }
    }
}

/// Process-scoped session protocol driver.
pub struct SessionCoordinator {
    device_id: String,
    config: NodeConfig,
    curve: CurveKind,
    keystore: Option<Arc<Mutex<Keystore>>>,
    sessions: HashMap<String, ActiveSession>,
    invites: Vec<(SessionInfo, Instant)>,
    // Messages whose target session is not yet known, bounded
    unknown_buffer: VecDeque<(String, DirectMessage)>,
    // Session responses that raced ahead of our own acceptance, bounded
    // by the same window
    pending_responses: VecDeque<(String, SessionResponse)>,
}

impl SessionCoordinator {
    pub fn new(
        device_id: String,
        config: NodeConfig,
        curve: CurveKind,
        keystore: Option<Arc<Mutex<Keystore>>>,
    ) -> Self {
        Self {
            device_id,
            config,
            curve,
            keystore,
            sessions: HashMap::new(),
            invites: Vec::new(),
            unknown_buffer: VecDeque::new(),
            pending_responses: VecDeque::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn invites(&self) -> Vec<&SessionInfo> {
        self.invites.iter().map(|(info, _)| info).collect()
    }

    /// Messages currently parked for sessions this node does not know yet.
    pub fn unknown_buffered(&self) -> usize {
        self.unknown_buffer.len()
    }

    pub fn dkg_state(&self, session_id: &str) -> Option<&DkgState> {
        self.sessions.get(session_id).map(|s| &s.dkg_state)
    }

    pub fn signing_state(&self, session_id: &str) -> Option<&SigningState> {
        self.sessions.get(session_id).map(|s| &s.signing_state)
    }

    pub fn session_info(&self, session_id: &str) -> Option<&SessionInfo> {
        self.sessions.get(session_id).map(|s| &s.info)
    }

    /// Earliest pending deadline, for the runtime's timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|s| s.deadline.as_ref().map(|(at, _)| *at))
            .min()
    }

    /// Processes one event and every internal follow-up it unlocks.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<Effect>, SessionError> {
        let mut effects = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(event);
        while let Some(event) = queue.pop_front() {
            self.handle_one(event, &mut effects, &mut queue)?;
        }
        Ok(effects)
    }

    fn handle_one(
        &mut self,
        event: SessionEvent,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) -> Result<(), SessionError> {
        match event {
            SessionEvent::ProposeSession {
                session_id,
                total,
                threshold,
                participants,
            } => self.propose_session(session_id, total, threshold, participants, effects, queue),
            SessionEvent::AcceptSession { session_id } => {
                self.accept_session(&session_id, effects, queue)
            }
            SessionEvent::RejectSession { session_id } => self.reject_session(&session_id, effects),
            SessionEvent::CancelSession { session_id } => {
                self.cancel_session(&session_id, effects);
                Ok(())
            }
            SessionEvent::InitiateSigning {
                wallet_id,
                message_hex,
            } => self.initiate_signing(wallet_id, message_hex, effects, queue),
            SessionEvent::AcceptSigning { signing_id } => {
                self.accept_signing(&signing_id, true, effects)
            }
            SessionEvent::RejectSigning { signing_id } => {
                self.accept_signing(&signing_id, false, effects)
            }
            SessionEvent::SignalingMessage { from, message } => {
                self.on_signaling(from, message, effects, queue);
                Ok(())
            }
            SessionEvent::ChannelOpen { peer } => {
                self.on_channel_open(peer, effects, queue);
                Ok(())
            }
            SessionEvent::ChannelClosed { peer } => {
                self.on_channel_closed(peer, effects);
                Ok(())
            }
            SessionEvent::Direct { from, message } => {
                self.on_direct(from, message, effects, queue);
                Ok(())
            }
            SessionEvent::Tick { now } => {
                self.on_tick(now, effects);
                Ok(())
            }
        }
    }

    // --- Proposal / acceptance -------------------------------------------

    fn validate_proposal(
        &self,
        session_id: &str,
        total: u16,
        threshold: u16,
        participants: &[String],
    ) -> Result<(), SessionError> {
        if session_id.is_empty() {
            return Err(SessionError::InvalidProposal("empty session id".into()));
        }
        if total > 255 {
            return Err(SessionError::InvalidProposal(format!(
                "total {total} exceeds the 255-participant limit"
            )));
        }
        if threshold == 0 || threshold > total {
            return Err(SessionError::InvalidProposal(format!(
                "threshold {threshold} out of range for total {total}"
            )));
        }
        if participants.len() != total as usize {
            return Err(SessionError::InvalidProposal(format!(
                "{} participants listed but total is {total}",
                participants.len()
            )));
        }
        let unique: HashSet<&String> = participants.iter().collect();
        if unique.len() != participants.len() {
            return Err(SessionError::InvalidProposal(
                "duplicate participants".into(),
            ));
        }
        if !participants.iter().any(|p| p == &self.device_id) {
            return Err(SessionError::InvalidProposal(
                "own device not in participants".into(),
            ));
        }
        Ok(())
    }

    /// Auto-detection of session intent: a proposal whose id names a stored
    /// wallet is a signing session over that wallet, provided the group
    /// parameters match exactly. Runs on the proposer and again,
    /// independently, on every receiver.
    fn detect_session_type(
        &self,
        session_id: &str,
        total: u16,
        threshold: u16,
        participants: &[String],
    ) -> Result<SessionType, SessionError> {
        let Some(keystore) = &self.keystore else {
            return Ok(SessionType::DKG);
        };
        let guard = keystore.lock().unwrap_or_else(|e| e.into_inner());
        let Some(wallet) = guard.get_wallet(session_id) else {
            return Ok(SessionType::DKG);
        };
        if wallet.threshold != threshold
            || wallet.total_participants != total
            || wallet.participants != participants
        {
            return Err(SessionError::WalletParameterMismatch {
                expected: format!(
                    "{}-of-{} over {:?}",
                    wallet.threshold, wallet.total_participants, wallet.participants
                ),
                actual: format!("{threshold}-of-{total} over {participants:?}"),
            });
        }
        Ok(SessionType::Signing {
            wallet_id: wallet.id.clone(),
            curve_type: wallet.curve_type.clone(),
            group_public_key: wallet.group_public_key.clone(),
        })
    }

    fn propose_session(
        &mut self,
        session_id: String,
        total: u16,
        threshold: u16,
        participants: Vec<String>,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) -> Result<(), SessionError> {
        if let Some(existing) = self.sessions.get(&session_id) {
            if !existing.is_terminal() {
                return Err(SessionError::SessionExists(session_id));
            }
            self.sessions.remove(&session_id);
        }
        self.validate_proposal(&session_id, total, threshold, &participants)?;
        // Fails before any packet leaves the node.
        let session_type = self.detect_session_type(&session_id, total, threshold, &participants)?;

        let info = SessionInfo {
            session_id: session_id.clone(),
            proposer_id: self.device_id.clone(),
            total,
            threshold,
            participants: participants.clone(),
            accepted_devices: vec![self.device_id.clone()],
            session_type: session_type.clone(),
        };
        let mut session = self.new_session(info, true)?;
        session.dkg_state = DkgState::Proposed;
        session.mesh.record_local_accept();
        session.accepted.insert(self.device_id.clone());

        let proposal = WebSocketMessage::SessionProposal(SessionProposal {
            session_id: session_id.clone(),
            total,
            threshold,
            participants: participants.clone(),
            session_type,
        });
        for peer in session.peers() {
            effects.push(Effect::Relay {
                to: peer,
                message: proposal.clone(),
            });
        }
        // Proposed -> AwaitingAcceptances happens at broadcast for the
        // proposer.
        session.dkg_state = DkgState::AwaitingAcceptances;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.proposal_timeout_ms),
            "acceptance".to_string(),
        ));
        let peers = session.peers();
        effects.push(Effect::OpenChannels {
            session_id: session_id.clone(),
            peers,
        });
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.clone(),
            state: session.dkg_state.clone(),
        }));
        self.sessions.insert(session_id.clone(), session);
        self.drain_unknown_buffer(queue);
        self.check_acceptances(&session_id, effects, queue);
        Ok(())
    }

    fn new_session(&self, info: SessionInfo, is_initiator: bool) -> Result<ActiveSession, SessionError> {
        let (kind, curve) = match &info.session_type {
            SessionType::DKG => (SessionKind::Dkg, self.curve),
            SessionType::Signing { curve_type, .. } => (
                SessionKind::Signing,
                CurveKind::parse(curve_type).map_err(|e| SessionError::engine("curve", e))?,
            ),
        };
        let mesh = MeshTracker::new(self.device_id.clone(), info.participants.clone());
        Ok(ActiveSession {
            info,
            self_device_id: self.device_id.clone(),
            kind,
            dkg_state: DkgState::Idle,
            signing_state: SigningState::Idle,
            mesh,
            engine: None,
            curve,
            is_initiator,
            accepted: HashSet::new(),
            rejected: HashSet::new(),
            signing_id: None,
            message_hex: None,
            signing_accepted: HashSet::new(),
            signing_rejected: HashSet::new(),
            selected_devices: Vec::new(),
            selected_identifiers: Vec::new(),
            aggregated: false,
            round1_seen: HashSet::new(),
            round2_seen: HashSet::new(),
            commitments_seen: HashSet::new(),
            shares_seen: HashSet::new(),
            pending: Vec::new(),
            violations: HashMap::new(),
            deadline: None,
        })
    }

    fn accept_session(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) -> Result<(), SessionError> {
        let position = self
            .invites
            .iter()
            .position(|(info, _)| info.session_id == session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        let (info, _) = self.invites.remove(position);

        // Independent re-verification of the proposer's detected-wallet
        // hint against our own keystore.
        let detected = self.detect_session_type(
            &info.session_id,
            info.total,
            info.threshold,
            &info.participants,
        )?;
        let mut info = info;
        if matches!(detected, SessionType::Signing { .. }) {
            info.session_type = detected;
        }

        let mut session = self.new_session(info, false)?;
        session.dkg_state = DkgState::AwaitingAcceptances;
        session.mesh.record_local_accept();
        session.accepted.insert(self.device_id.clone());
        // The proposer's broadcast is its acceptance; it sends no response.
        session.accepted.insert(session.info.proposer_id.clone());
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.proposal_timeout_ms),
            "acceptance".to_string(),
        ));

        let wallet_status = self.wallet_status_for(&session);
        // Signing participants load their share up front so every later
        // phase is pure message handling.
        if session.kind == SessionKind::Signing {
            self.load_signing_engine(&mut session)?;
            session.signing_state = SigningState::Requested;
        }

        let response = WebSocketMessage::SessionResponse(SessionResponse {
            session_id: session.info.session_id.clone(),
            accepted: true,
            wallet_status,
        });
        for peer in session.peers() {
            effects.push(Effect::Relay {
                to: peer,
                message: response.clone(),
            });
        }
        effects.push(Effect::OpenChannels {
            session_id: session.info.session_id.clone(),
            peers: session.peers(),
        });
        effects.push(Effect::Emit(NodeEvent::SessionAccepted {
            session_id: session.info.session_id.clone(),
            device_id: self.device_id.clone(),
        }));
        let id = session.info.session_id.clone();
        self.sessions.insert(id.clone(), session);
        self.drain_unknown_buffer(queue);
        self.check_acceptances(&id, effects, queue);
        Ok(())
    }

    fn reject_session(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let position = self
            .invites
            .iter()
            .position(|(info, _)| info.session_id == session_id)
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        let (info, _) = self.invites.remove(position);
        let response = WebSocketMessage::SessionResponse(SessionResponse {
            session_id: info.session_id.clone(),
            accepted: false,
            wallet_status: None,
        });
        for peer in info.participants.iter().filter(|p| **p != self.device_id) {
            effects.push(Effect::Relay {
                to: peer.clone(),
                message: response.clone(),
            });
        }
        effects.push(Effect::Emit(NodeEvent::SessionDeclined {
            session_id: info.session_id,
            device_id: self.device_id.clone(),
        }));
        Ok(())
    }

    fn cancel_session(&mut self, session_id: &str, effects: &mut Vec<Effect>) {
        if self.sessions.contains_key(session_id) {
            self.fail_session(session_id, SessionError::Cancelled, effects);
        } else {
            self.invites.retain(|(info, _)| info.session_id != session_id);
        }
    }

    fn wallet_status_for(&self, session: &ActiveSession) -> Option<WalletStatus> {
        match &session.info.session_type {
            SessionType::DKG => None,
            SessionType::Signing { wallet_id, .. } => {
                let identifier = session.info.participant_index(&self.device_id);
                let has_wallet = self
                    .keystore
                    .as_ref()
                    .map(|k| {
                        k.lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .get_wallet(wallet_id)
                            .is_some()
                    })
                    .unwrap_or(false);
                Some(WalletStatus {
                    has_wallet,
                    wallet_valid: has_wallet,
                    identifier,
                    error_reason: None,
                })
            }
        }
    }

    // --- Signaling-plane handling ----------------------------------------

    fn on_signaling(
        &mut self,
        from: String,
        message: WebSocketMessage,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        if let Err(detail) = validation::validate_signal(&message) {
            tracing::warn!("dropping malformed signaling message from {from}: {detail}");
            return;
        }
        match message {
            WebSocketMessage::SessionProposal(proposal) => {
                self.on_proposal(from, proposal, effects)
            }
            WebSocketMessage::SessionResponse(response) => {
                self.on_session_response(from, response, effects, queue)
            }
            // Connection descriptors are consumed by the embedding
            // environment, not the protocol layer.
            WebSocketMessage::WebRTCSignal(_) => {}
        }
    }

    fn on_proposal(
        &mut self,
        from: String,
        proposal: SessionProposal,
        effects: &mut Vec<Effect>,
    ) {
        if from == self.device_id {
            return;
        }
        if !proposal.participants.iter().any(|p| p == &self.device_id) {
            tracing::warn!(
                "proposal {} from {from} does not include this device",
                proposal.session_id
            );
            return;
        }
        if let Some(existing) = self.sessions.get(&proposal.session_id) {
            if !existing.is_terminal() {
                tracing::debug!("duplicate proposal {} ignored", proposal.session_id);
                return;
            }
            // A finished session with this id (typically the DKG that
            // created the wallet) gives way to the new proposal.
            self.sessions.remove(&proposal.session_id);
        }
        if self
            .invites
            .iter()
            .any(|(info, _)| info.session_id == proposal.session_id)
        {
            tracing::debug!("duplicate proposal {} ignored", proposal.session_id);
            return;
        }

        // Receivers re-verify the detected wallet before any cryptographic
        // work; a parameter mismatch fails immediately.
        if let Err(err) = self.detect_session_type(
            &proposal.session_id,
            proposal.total,
            proposal.threshold,
            &proposal.participants,
        ) {
            let response = WebSocketMessage::SessionResponse(SessionResponse {
                session_id: proposal.session_id.clone(),
                accepted: false,
                wallet_status: Some(WalletStatus {
                    has_wallet: true,
                    wallet_valid: false,
                    identifier: None,
                    error_reason: Some(err.to_string()),
                }),
            });
            for peer in proposal.participants.iter().filter(|p| **p != self.device_id) {
                effects.push(Effect::Relay {
                    to: peer.clone(),
                    message: response.clone(),
                });
            }
            effects.push(Effect::Emit(NodeEvent::SessionFailed {
                session_id: proposal.session_id,
                reason: err,
            }));
            return;
        }

        let invite = SessionInfo {
            session_id: proposal.session_id.clone(),
            proposer_id: from,
            total: proposal.total,
            threshold: proposal.threshold,
            participants: proposal.participants,
            accepted_devices: Vec::new(),
            session_type: proposal.session_type,
        };
        effects.push(Effect::Emit(NodeEvent::InviteReceived {
            session: invite.clone(),
        }));
        self.invites.push((invite, Instant::now()));
    }

    fn on_session_response(
        &mut self,
        from: String,
        response: SessionResponse,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let session_id = response.session_id.clone();
        let Some(session) = self.sessions.get_mut(&session_id) else {
            // Another participant's response can overtake our own
            // acceptance; park it until the session exists locally.
            tracing::debug!("buffering response for not-yet-known session {session_id} from {from}");
            if self.pending_responses.len() >= self.config.buffered_msg_limit {
                self.pending_responses.pop_front();
            }
            self.pending_responses.push_back((from, response));
            return;
        };
        if !session.info.participants.iter().any(|p| p == &from) {
            tracing::warn!("response from non-participant {from} for {session_id}");
            return;
        }
        let wallet_invalid = response
            .wallet_status
            .as_ref()
            .map(|s| !s.wallet_valid)
            .unwrap_or(false);
        if response.accepted && !wallet_invalid {
            session.accepted.insert(from.clone());
            if !session.info.accepted_devices.contains(&from) {
                session.info.accepted_devices.push(from.clone());
            }
            effects.push(Effect::Emit(NodeEvent::SessionAccepted {
                session_id: session_id.clone(),
                device_id: from,
            }));
        } else {
            session.rejected.insert(from.clone());
            match session.kind {
                SessionKind::Dkg => {
                    // DKG needs every participant; a single decline is fatal.
                    let reason = if wallet_invalid {
                        let detail = response
                            .wallet_status
                            .and_then(|s| s.error_reason)
                            .unwrap_or_else(|| "wallet invalid on peer".to_string());
                        SessionError::ProtocolViolation {
                            peer: from.clone(),
                            phase: "acceptance".to_string(),
                            detail,
                        }
                    } else {
                        SessionError::InvalidProposal(format!("participant {from} declined"))
                    };
                    self.fail_session(&session_id, reason, effects);
                    return;
                }
                SessionKind::Signing => {
                    // Signing tolerates declines down to the threshold; the
                    // decliner is no longer required for mesh readiness.
                    session.mesh.remove_participant(&from);
                    effects.push(Effect::Emit(NodeEvent::SessionDeclined {
                        session_id: session_id.clone(),
                        device_id: from,
                    }));
                }
            }
        }
        self.check_acceptances(&session_id, effects, queue);
    }

    /// AwaitingAcceptances -> MeshForming once the acceptance set covers
    /// the session, then mesh-readiness bookkeeping.
    fn check_acceptances(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.dkg_state != DkgState::AwaitingAcceptances {
            self.try_advance_mesh(session_id, effects, queue);
            return;
        }
        let total = session.info.participants.len();
        let responded = session.accepted.len() + session.rejected.len();
        let enough = match session.kind {
            SessionKind::Dkg => session.accepted.len() == total,
            SessionKind::Signing => {
                responded == total && session.accepted.len() >= session.info.threshold as usize
            }
        };
        if session.kind == SessionKind::Signing
            && responded == total
            && session.accepted.len() < session.info.threshold as usize
        {
            self.fail_session(
                session_id,
                SessionError::InvalidProposal("not enough accepting participants".to_string()),
                effects,
            );
            return;
        }
        if !enough {
            return;
        }
        session.dkg_state = DkgState::MeshForming;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.dkg_round_timeout_ms),
            "mesh".to_string(),
        ));
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.to_string(),
            state: DkgState::MeshForming,
        }));
        self.try_advance_mesh(session_id, effects, queue);
    }

    // --- Mesh handling ----------------------------------------------------

    fn on_channel_open(
        &mut self,
        peer: String,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        // Announce our view of the channel to the peer.
        effects.push(Effect::SendDirect {
            to: peer.clone(),
            message: DirectMessage::ChannelOpen {
                device_id: self.device_id.clone(),
            },
        });
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_terminal() && s.info.participants.contains(&peer))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(session) = self.sessions.get_mut(&id) {
                session.mesh.record_channel_open(&peer);
            }
            self.try_advance_mesh(&id, effects, queue);
        }
    }

    fn on_channel_closed(&mut self, peer: String, effects: &mut Vec<Effect>) {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_terminal() && s.info.participants.contains(&peer))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            session.mesh.record_channel_closed(&peer);
            let mid_protocol = session.dkg_state.rank() >= DkgState::Round1InProgress.rank()
                && session.dkg_state.is_active()
                || session.signing_state.rank() >= SigningState::AcceptancePhase.rank()
                    && session.signing_state.is_active();
            let peer_still_needed = session.mesh.is_participant(&peer);
            if mid_protocol && peer_still_needed {
                self.fail_session(&id, SessionError::TransportClosed { peer: peer.clone() }, effects);
            }
        }
    }

    fn try_advance_mesh(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.is_terminal() || session.dkg_state.rank() < DkgState::MeshForming.rank() {
            return;
        }
        if session.mesh.should_send_ready() {
            session.mesh.mark_ready_sent();
            let message = DirectMessage::MeshReady {
                session_id: session_id.to_string(),
                device_id: self.device_id.clone(),
            };
            for peer in session.mesh.peer_ids() {
                effects.push(Effect::SendDirect {
                    to: peer,
                    message: message.clone(),
                });
            }
        }
        if session.dkg_state == DkgState::MeshForming && session.mesh.is_ready() {
            effects.push(Effect::Emit(NodeEvent::MeshReady {
                session_id: session_id.to_string(),
            }));
            match session.kind {
                SessionKind::Dkg => self.start_dkg_round1(session_id, effects, queue),
                SessionKind::Signing => self.start_signing_request(session_id, effects, queue),
            }
        }
    }

    // --- DKG rounds -------------------------------------------------------

    fn start_dkg_round1(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let Some(index) = session.info.participant_index(&self.device_id) else {
            self.fail_session(
                session_id,
                SessionError::InvalidProposal("own device not in participants".into()),
                effects,
            );
            return;
        };
        let total = session.info.total;
        let threshold = session.info.threshold;
        let mut engine = CurveEngine::new(session.curve);
        let package = engine
            .init_dkg(index, total, threshold)
            .and_then(|_| engine.generate_round1());
        let package = match package {
            Ok(p) => p,
            Err(err) => {
                self.fail_session(session_id, SessionError::engine("round1", err), effects);
                return;
            }
        };
        session.engine = Some(engine);
        session.dkg_state = DkgState::Round1InProgress;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.dkg_round_timeout_ms),
            "dkg_round1".to_string(),
        ));
        for peer in session.peers() {
            effects.push(Effect::SendDirect {
                to: peer,
                message: DirectMessage::DkgRound1Package {
                    package: package.clone(),
                },
            });
        }
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.to_string(),
            state: DkgState::Round1InProgress,
        }));
        self.replay_pending(session_id, queue);
    }

    fn process_round1(
        &mut self,
        session_id: &str,
        from: String,
        package: String,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.round1_seen.contains(&from) {
            tracing::debug!("duplicate round 1 package from {from} ignored");
            return;
        }
        let Some(sender_index) = session.info.participant_index(&from) else {
            return;
        };
        let result = session
            .engine
            .as_mut()
            .map(|e| e.add_round1_package(sender_index, &package));
        match result {
            Some(Ok(())) => {
                session.round1_seen.insert(from);
                let complete = session
                    .engine
                    .as_ref()
                    .map(|e| e.can_start_round2())
                    .unwrap_or(false);
                if complete {
                    session.dkg_state = DkgState::Round1Complete;
                    effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
                        session_id: session_id.to_string(),
                        state: DkgState::Round1Complete,
                    }));
                    self.start_dkg_round2(session_id, effects, queue);
                }
            }
            Some(Err(err)) => {
                self.record_violation(session_id, &from, "dkg_round1", &err.to_string(), effects);
            }
            None => {}
        }
    }

    fn start_dkg_round2(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let map = match session.engine.as_mut().map(|e| e.generate_round2()) {
            Some(Ok(map)) => map,
            Some(Err(err)) => {
                self.fail_session(session_id, SessionError::engine("round2", err), effects);
                return;
            }
            None => return,
        };
        // Each per-recipient subpackage goes only to its intended
        // recipient, keyed by that recipient's identifier hex.
        let mut sends = Vec::new();
        for (identifier_hex, package_hex) in map {
            let recipient = (1..=session.info.total).find_map(|i| {
                let hex = session
                    .engine
                    .as_ref()
                    .and_then(|e| e.identifier_hex(i).ok())?;
                if hex == identifier_hex {
                    session.info.device_at_index(i).map(|d| d.to_string())
                } else {
                    None
                }
            });
            if let Some(device) = recipient {
                let mut package = std::collections::BTreeMap::new();
                package.insert(identifier_hex, package_hex);
                sends.push((device, package));
            }
        }
        session.dkg_state = DkgState::Round2InProgress;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.dkg_round_timeout_ms),
            "dkg_round2".to_string(),
        ));
        for (device, package) in sends {
            effects.push(Effect::SendDirect {
                to: device,
                message: DirectMessage::DkgRound2Package { package },
            });
        }
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.to_string(),
            state: DkgState::Round2InProgress,
        }));
        self.replay_pending(session_id, queue);
    }

    fn process_round2(
        &mut self,
        session_id: &str,
        from: String,
        package: std::collections::BTreeMap<String, String>,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.round2_seen.contains(&from) {
            tracing::debug!("duplicate round 2 package from {from} ignored");
            return;
        }
        let Some(sender_index) = session.info.participant_index(&from) else {
            return;
        };
        let Some(own_index) = session.info.participant_index(&self.device_id) else {
            return;
        };
        let own_key = session
            .engine
            .as_ref()
            .and_then(|e| e.identifier_hex(own_index).ok());
        let Some(own_key) = own_key else { return };
        let Some(entry) = package.get(&own_key) else {
            self.record_violation(
                session_id,
                &from,
                "dkg_round2",
                "round 2 map lacks an entry for this device",
                effects,
            );
            return;
        };
        let result = session
            .engine
            .as_mut()
            .map(|e| e.add_round2_package(sender_index, entry));
        match result {
            Some(Ok(())) => {
                session.round2_seen.insert(from);
                let complete = session
                    .engine
                    .as_ref()
                    .map(|e| e.can_finalize())
                    .unwrap_or(false);
                if complete {
                    session.dkg_state = DkgState::Round2Complete;
                    effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
                        session_id: session_id.to_string(),
                        state: DkgState::Round2Complete,
                    }));
                    self.finalize_dkg(session_id, effects);
                }
            }
            Some(Err(err)) => {
                self.record_violation(session_id, &from, "dkg_round2", &err.to_string(), effects);
            }
            None => {}
        }
    }

    fn finalize_dkg(&mut self, session_id: &str, effects: &mut Vec<Effect>) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        session.dkg_state = DkgState::Finalizing;
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.to_string(),
            state: DkgState::Finalizing,
        }));
        let output = match session.engine.as_mut().map(|e| e.finalize_dkg()) {
            Some(Ok(output)) => output,
            Some(Err(err)) => {
                self.fail_session(session_id, SessionError::engine("finalize", err), effects);
                return;
            }
            None => return,
        };
        let info = session.info.clone();
        let curve = session.curve;
        let participant_index = info.participant_index(&self.device_id).unwrap_or(0);

        let record = KeyShareRecord {
            version: KEYSTORE_VERSION,
            curve: curve.as_str().to_string(),
            participant_index,
            total_participants: info.total,
            threshold: info.threshold,
            participants: info.participants.clone(),
            key_package: output.key_package.clone(),
            public_key_package: output.public_key_package.clone(),
            group_public_key: output.group_public_key.clone(),
            session_id: info.session_id.clone(),
            device_id: self.device_id.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            ethereum_address: matches!(curve, CurveKind::Secp256k1)
                .then(|| output.address.clone()),
            solana_address: matches!(curve, CurveKind::Ed25519).then(|| output.address.clone()),
            last_used: None,
            backup_date: None,
        };

        // Session id doubles as the wallet id; that equality is what the
        // signing auto-detection keys on.
        let wallet_id = info.session_id.clone();
        if let Some(keystore) = &self.keystore {
            let mut guard = keystore.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(err) = guard.add_wallet(&wallet_id, &record, &wallet_id) {
                drop(guard);
                self.fail_session(
                    session_id,
                    SessionError::StorageFailure {
                        cause: err.to_string(),
                    },
                    effects,
                );
                return;
            }
        } else {
            tracing::warn!("no keystore configured; DKG result for {session_id} not persisted");
        }

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.dkg_state = DkgState::Complete;
            session.deadline = None;
        }
        effects.push(Effect::Emit(NodeEvent::DkgStateChanged {
            session_id: session_id.to_string(),
            state: DkgState::Complete,
        }));
        effects.push(Effect::Emit(NodeEvent::DkgComplete {
            session_id: session_id.to_string(),
            wallet_id,
            address: output.address,
            group_public_key: output.group_public_key,
        }));
    }

    // --- Signing ----------------------------------------------------------

    fn initiate_signing(
        &mut self,
        wallet_id: String,
        message_hex: String,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) -> Result<(), SessionError> {
        if hex::decode(&message_hex).is_err() {
            return Err(SessionError::InvalidProposal(
                "message is not valid hex".into(),
            ));
        }
        let entry = {
            let keystore = self
                .keystore
                .as_ref()
                .ok_or_else(|| SessionError::InvalidProposal("no keystore configured".into()))?;
            let guard = keystore.lock().unwrap_or_else(|e| e.into_inner());
            guard
                .get_wallet(&wallet_id)
                .cloned()
                .ok_or_else(|| SessionError::UnknownSession(wallet_id.clone()))?
        };
        self.propose_session(
            wallet_id.clone(),
            entry.total_participants,
            entry.threshold,
            entry.participants.clone(),
            effects,
            queue,
        )?;
        let signing_id = uuid::Uuid::new_v4().to_string();
        let mut session = self
            .sessions
            .remove(&wallet_id)
            .ok_or_else(|| SessionError::UnknownSession(wallet_id.clone()))?;
        session.signing_id = Some(signing_id);
        session.message_hex = Some(message_hex);
        session.signing_state = SigningState::Requested;
        let load = self.load_signing_engine(&mut session);
        self.sessions.insert(wallet_id.clone(), session);
        if let Err(err) = load {
            self.fail_session(&wallet_id, err.clone(), effects);
            return Err(err);
        }
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: wallet_id,
            state: SigningState::Requested,
        }));
        Ok(())
    }

    /// Loads this device's share from the keystore into a fresh engine.
    fn load_signing_engine(&self, session: &mut ActiveSession) -> Result<(), SessionError> {
        let SessionType::Signing { wallet_id, .. } = &session.info.session_type else {
            return Ok(());
        };
        let keystore = self
            .keystore
            .as_ref()
            .ok_or_else(|| SessionError::InvalidProposal("no keystore configured".into()))?;
        let record = {
            let mut guard = keystore.lock().unwrap_or_else(|e| e.into_inner());
            guard.get_key_share(wallet_id).map_err(|e| {
                SessionError::EngineFailure {
                    operation: "load_share".to_string(),
                    detail: e.to_string(),
                }
            })?
        };
        let data = KeystoreData {
            key_package: BASE64.encode(record.key_package.as_bytes()),
            public_key_package: BASE64.encode(record.public_key_package.as_bytes()),
            min_signers: record.threshold,
            max_signers: record.total_participants,
            participant_index: record.participant_index,
            participant_indices: (1..=record.total_participants).collect(),
            curve: record.curve.clone(),
            wallet_id: Some(wallet_id.clone()),
            device_id: Some(record.device_id.clone()),
            session_id: Some(record.session_id.clone()),
            timestamp: None,
        };
        let json = serde_json::to_string(&data)
            .map_err(|e| SessionError::engine("load_share", frost_wallet_engine::FrostError::SerializationError(e.to_string())))?;
        let mut engine = CurveEngine::new(session.curve);
        engine
            .import_keystore(&json)
            .map_err(|e| SessionError::engine("import_keystore", e))?;
        session.engine = Some(engine);
        Ok(())
    }

    /// Mesh is ready on the initiator: fan the signing request out to every
    /// session-accepting participant.
    fn start_signing_request(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        // Both sides leave MeshForming here; only the initiator sends.
        session.dkg_state = DkgState::Complete;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.signing_round_timeout_ms),
            "signing_acceptance".to_string(),
        ));
        if !session.is_initiator {
            return;
        }
        let (Some(signing_id), Some(message_hex)) =
            (session.signing_id.clone(), session.message_hex.clone())
        else {
            return;
        };
        session.signing_state = SigningState::AcceptancePhase;
        session.signing_accepted.insert(self.device_id.clone());
        let request = DirectMessage::SigningRequest {
            signing_id,
            transaction_data: message_hex,
            required_signers: session.info.threshold as usize,
        };
        for peer in session.mesh.peer_ids() {
            effects.push(Effect::SendDirect {
                to: peer,
                message: request.clone(),
            });
        }
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::AcceptancePhase,
        }));
        self.replay_pending(session_id, queue);
    }

    fn session_id_for_signing(&self, signing_id: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|(_, s)| s.signing_id.as_deref() == Some(signing_id))
            .map(|(id, _)| id.clone())
    }

    fn accept_signing(
        &mut self,
        signing_id: &str,
        accepted: bool,
        effects: &mut Vec<Effect>,
    ) -> Result<(), SessionError> {
        let session_id = self
            .session_id_for_signing(signing_id)
            .ok_or_else(|| SessionError::UnknownSession(signing_id.to_string()))?;
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return Err(SessionError::UnknownSession(session_id));
        };
        if session.signing_state != SigningState::AcceptancePhase {
            return Err(SessionError::ProtocolViolation {
                peer: self.device_id.clone(),
                phase: "signing_acceptance".to_string(),
                detail: format!(
                    "cannot respond while in {}",
                    session.signing_state.display_status()
                ),
            });
        }
        let initiator = session.info.proposer_id.clone();
        effects.push(Effect::SendDirect {
            to: initiator,
            message: DirectMessage::SigningAcceptance {
                signing_id: signing_id.to_string(),
                accepted,
            },
        });
        Ok(())
    }

    fn on_signing_request(
        &mut self,
        from: String,
        signing_id: String,
        transaction_data: String,
        required_signers: usize,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session_id) = self
            .sessions
            .iter()
            .find(|(_, s)| {
                s.kind == SessionKind::Signing
                    && s.info.proposer_id == from
                    && !s.is_terminal()
            })
            .map(|(id, _)| id.clone())
        else {
            self.buffer_unknown(from, DirectMessage::SigningRequest {
                signing_id,
                transaction_data,
                required_signers,
            });
            return;
        };
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        if session.signing_state != SigningState::Requested {
            tracing::debug!("duplicate signing request {signing_id} ignored");
            return;
        }
        if required_signers != session.info.threshold as usize {
            self.record_violation(
                &session_id,
                &from,
                "signing_acceptance",
                "required signer count does not match wallet threshold",
                effects,
            );
            return;
        }
        session.signing_id = Some(signing_id.clone());
        session.message_hex = Some(transaction_data.clone());
        session.signing_state = SigningState::AcceptancePhase;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.signing_round_timeout_ms),
            "signing_acceptance".to_string(),
        ));
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.clone(),
            state: SigningState::AcceptancePhase,
        }));
        effects.push(Effect::Emit(NodeEvent::SigningRequestReceived {
            session_id,
            signing_id,
            from,
            message_hex: transaction_data,
        }));
    }

    fn on_signing_acceptance(
        &mut self,
        session_id: &str,
        from: String,
        accepted: bool,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if !session.is_initiator || session.signing_state != SigningState::AcceptancePhase {
            tracing::debug!("late signing acceptance from {from} ignored");
            return;
        }
        if !session.info.participants.contains(&from) {
            return;
        }
        if accepted {
            session.signing_accepted.insert(from);
        } else {
            session.signing_rejected.insert(from);
        }
        let threshold = session.info.threshold as usize;
        let total = session.info.participants.len();
        let accepting = session.signing_accepted.len();
        let rejecting = session.signing_rejected.len();
        if rejecting > total - threshold {
            self.fail_session(
                session_id,
                SessionError::InvalidProposal("not enough accepting signers".to_string()),
                effects,
            );
            return;
        }
        if accepting >= threshold {
            self.select_signers(session_id, effects, queue);
        }
    }

    /// Deterministic selection: initiator first, then ascending participant
    /// index over the accepting set, exactly `threshold` signers.
    fn select_signers(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.signing_state != SigningState::AcceptancePhase {
            return;
        }
        session.signing_state = SigningState::SignerSelection;
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::SignerSelection,
        }));

        let threshold = session.info.threshold as usize;
        let mut devices = vec![self.device_id.clone()];
        let mut accepting: Vec<(u16, String)> = session
            .signing_accepted
            .iter()
            .filter(|d| **d != self.device_id)
            .filter_map(|d| session.info.participant_index(d).map(|i| (i, d.clone())))
            .collect();
        accepting.sort();
        for (_, device) in accepting {
            if devices.len() < threshold {
                devices.push(device);
            }
        }
        let identifiers: Vec<String> = devices
            .iter()
            .filter_map(|d| {
                let index = session.info.participant_index(d)?;
                session
                    .engine
                    .as_ref()
                    .and_then(|e| e.identifier_hex(index).ok())
            })
            .collect();
        session.selected_devices = devices.clone();
        session.selected_identifiers = identifiers.clone();

        let Some(signing_id) = session.signing_id.clone() else {
            return;
        };
        let selection = DirectMessage::SignerSelection {
            signing_id,
            selected_signers: identifiers,
        };
        for peer in session.mesh.peer_ids() {
            effects.push(Effect::SendDirect {
                to: peer,
                message: selection.clone(),
            });
        }
        self.enter_commitment_phase(session_id, effects, queue);
    }

    fn on_signer_selection(
        &mut self,
        session_id: &str,
        from: String,
        selected_signers: Vec<String>,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if from != session.info.proposer_id {
            self.record_violation(
                session_id,
                &from,
                "signer_selection",
                "selection from a non-initiator",
                effects,
            );
            return;
        }
        if session.signing_state != SigningState::AcceptancePhase {
            tracing::debug!("duplicate signer selection ignored");
            return;
        }
        session.signing_state = SigningState::SignerSelection;
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::SignerSelection,
        }));
        let devices: Vec<String> = selected_signers
            .iter()
            .filter_map(|hex| {
                (1..=session.info.total).find_map(|i| {
                    let id_hex = session
                        .engine
                        .as_ref()
                        .and_then(|e| e.identifier_hex(i).ok())?;
                    if &id_hex == hex {
                        session.info.device_at_index(i).map(|d| d.to_string())
                    } else {
                        None
                    }
                })
            })
            .collect();
        session.selected_identifiers = selected_signers;
        session.selected_devices = devices;
        self.enter_commitment_phase(session_id, effects, queue);
    }

    fn enter_commitment_phase(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        session.signing_state = SigningState::CommitmentPhase;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.signing_round_timeout_ms),
            "signing_commitment".to_string(),
        ));
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::CommitmentPhase,
        }));

        let selected = session
            .selected_devices
            .iter()
            .any(|d| d == &self.device_id);
        if selected {
            let commitment = match session.engine.as_mut().map(|e| e.signing_commit()) {
                Some(Ok(c)) => c,
                Some(Err(err)) => {
                    self.fail_session(
                        session_id,
                        SessionError::engine("signing_commit", err),
                        effects,
                    );
                    return;
                }
                None => return,
            };
            let own_index = session.info.participant_index(&self.device_id).unwrap_or(0);
            let sender_identifier = session
                .engine
                .as_ref()
                .and_then(|e| e.identifier_hex(own_index).ok())
                .unwrap_or_default();
            let Some(signing_id) = session.signing_id.clone() else {
                return;
            };
            let message = DirectMessage::SigningCommitment {
                signing_id,
                sender_identifier,
                commitment,
            };
            let recipients: Vec<String> = session
                .selected_devices
                .iter()
                .filter(|d| **d != self.device_id)
                .cloned()
                .collect();
            for device in recipients {
                effects.push(Effect::SendDirect {
                    to: device,
                    message: message.clone(),
                });
            }
        }
        self.replay_pending(session_id, queue);
    }

    fn on_signing_commitment(
        &mut self,
        session_id: &str,
        from: String,
        sender_identifier: String,
        commitment: String,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if !session.selected_devices.iter().any(|d| d == &self.device_id) {
            return; // observers do not participate in rounds
        }
        if session.commitments_seen.contains(&from) {
            return;
        }
        let Some(sender_index) = session.info.participant_index(&from) else {
            return;
        };
        let expected = session
            .engine
            .as_ref()
            .and_then(|e| e.identifier_hex(sender_index).ok());
        if expected.as_deref() != Some(sender_identifier.as_str()) {
            self.record_violation(
                session_id,
                &from,
                "signing_commitment",
                "sender identifier does not match participant index",
                effects,
            );
            return;
        }
        let result = session
            .engine
            .as_mut()
            .map(|e| e.add_signing_commitment(sender_index, &commitment));
        match result {
            Some(Ok(())) => {
                session.commitments_seen.insert(from);
                let threshold = session.info.threshold as usize;
                let have = session
                    .engine
                    .as_ref()
                    .map(|e| e.commitment_count())
                    .unwrap_or(0);
                if have == threshold {
                    self.enter_share_phase(session_id, effects, queue);
                }
            }
            Some(Err(err)) => {
                self.record_violation(
                    session_id,
                    &from,
                    "signing_commitment",
                    &err.to_string(),
                    effects,
                );
            }
            None => {}
        }
    }

    fn enter_share_phase(
        &mut self,
        session_id: &str,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        session.signing_state = SigningState::SharePhase;
        session.deadline = Some((
            Instant::now() + Duration::from_millis(self.config.signing_round_timeout_ms),
            "signing_share".to_string(),
        ));
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::SharePhase,
        }));
        let Some(message_hex) = session.message_hex.clone() else {
            return;
        };
        let share = match session.engine.as_mut().map(|e| e.sign(&message_hex)) {
            Some(Ok(s)) => s,
            Some(Err(err)) => {
                self.fail_session(session_id, SessionError::engine("sign", err), effects);
                return;
            }
            None => return,
        };
        let own_index = session.info.participant_index(&self.device_id).unwrap_or(0);
        let sender_identifier = session
            .engine
            .as_ref()
            .and_then(|e| e.identifier_hex(own_index).ok())
            .unwrap_or_default();
        let Some(signing_id) = session.signing_id.clone() else {
            return;
        };
        let message = DirectMessage::SignatureShare {
            signing_id,
            sender_identifier,
            share,
        };
        let recipients: Vec<String> = session
            .selected_devices
            .iter()
            .filter(|d| **d != self.device_id)
            .cloned()
            .collect();
        for device in recipients {
            effects.push(Effect::SendDirect {
                to: device,
                message: message.clone(),
            });
        }
        self.replay_pending(session_id, queue);
    }

    fn on_signature_share(
        &mut self,
        session_id: &str,
        from: String,
        sender_identifier: String,
        share: String,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if !session.selected_devices.iter().any(|d| d == &self.device_id) {
            return;
        }
        if session.shares_seen.contains(&from) {
            return;
        }
        let Some(sender_index) = session.info.participant_index(&from) else {
            return;
        };
        let expected = session
            .engine
            .as_ref()
            .and_then(|e| e.identifier_hex(sender_index).ok());
        if expected.as_deref() != Some(sender_identifier.as_str()) {
            self.record_violation(
                session_id,
                &from,
                "signing_share",
                "sender identifier does not match participant index",
                effects,
            );
            return;
        }
        let result = session
            .engine
            .as_mut()
            .map(|e| e.add_signature_share(sender_index, &share));
        match result {
            Some(Ok(())) => {
                session.shares_seen.insert(from);
                let threshold = session.info.threshold as usize;
                let have = session.engine.as_ref().map(|e| e.share_count()).unwrap_or(0);
                if have == threshold {
                    self.aggregate(session_id, effects);
                }
            }
            Some(Err(err)) => {
                self.record_violation(session_id, &from, "signing_share", &err.to_string(), effects);
            }
            None => {}
        }
    }

    /// Any selected signer holding all shares may aggregate; duplicate
    /// aggregations are idempotent and the first broadcast wins.
    fn aggregate(&mut self, session_id: &str, effects: &mut Vec<Effect>) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.aggregated {
            return;
        }
        session.signing_state = SigningState::AggregationPhase;
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::AggregationPhase,
        }));
        let Some(message_hex) = session.message_hex.clone() else {
            return;
        };
        let signature = match session
            .engine
            .as_ref()
            .map(|e| e.aggregate_signature(&message_hex))
        {
            Some(Ok(s)) => s,
            Some(Err(err)) => {
                self.fail_session(session_id, SessionError::engine("aggregate", err), effects);
                return;
            }
            None => return,
        };
        let verified = session
            .engine
            .as_ref()
            .map(|e| e.verify_signature(&message_hex, &signature).unwrap_or(false))
            .unwrap_or(false);
        if !verified {
            self.fail_session(
                session_id,
                SessionError::EngineFailure {
                    operation: "aggregate".to_string(),
                    detail: "aggregated signature failed verification".to_string(),
                },
                effects,
            );
            return;
        }
        session.aggregated = true;
        let Some(signing_id) = session.signing_id.clone() else {
            return;
        };
        let message = DirectMessage::AggregatedSignature {
            signing_id: signing_id.clone(),
            signature: signature.clone(),
        };
        for peer in session.mesh.peer_ids() {
            effects.push(Effect::SendDirect {
                to: peer,
                message: message.clone(),
            });
        }
        self.complete_signing(session_id, signing_id, signature, effects);
    }

    fn on_aggregated_signature(
        &mut self,
        session_id: &str,
        from: String,
        signature: String,
        effects: &mut Vec<Effect>,
    ) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        if session.signing_state == SigningState::Complete {
            return; // duplicate aggregations are idempotent
        }
        let Some(message_hex) = session.message_hex.clone() else {
            return;
        };
        if let Some(engine) = session.engine.as_ref() {
            match engine.verify_signature(&message_hex, &signature) {
                Ok(true) => {}
                _ => {
                    self.record_violation(
                        session_id,
                        &from,
                        "signing_aggregation",
                        "aggregated signature failed verification",
                        effects,
                    );
                    return;
                }
            }
        }
        session.aggregated = true;
        let Some(signing_id) = session.signing_id.clone() else {
            return;
        };
        self.complete_signing(session_id, signing_id, signature, effects);
    }

    fn complete_signing(
        &mut self,
        session_id: &str,
        signing_id: String,
        signature: String,
        effects: &mut Vec<Effect>,
    ) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.signing_state = SigningState::Complete;
            session.deadline = None;
            if let Some(engine) = session.engine.as_mut() {
                engine.clear_signing();
            }
        }
        effects.push(Effect::Emit(NodeEvent::SigningStateChanged {
            session_id: session_id.to_string(),
            state: SigningState::Complete,
        }));
        effects.push(Effect::Emit(NodeEvent::SigningComplete {
            session_id: session_id.to_string(),
            signing_id,
            signature_hex: signature,
        }));
    }

    // --- Direct-message routing ------------------------------------------

    fn on_direct(
        &mut self,
        from: String,
        message: DirectMessage,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        if let Err(detail) = validation::validate_direct(&message) {
            tracing::warn!("dropping malformed direct message from {from}: {detail}");
            // Malformed traffic counts toward the per-sender strike limit
            // in whichever session the sender belongs to.
            if let Some(session_id) = self.route_by_sender(&from) {
                self.record_violation(&session_id, &from, "schema", &detail, effects);
            }
            return;
        }
        match message {
            DirectMessage::ChannelOpen { device_id } => {
                if device_id != from {
                    tracing::warn!("channel-open device id {device_id} does not match sender {from}");
                    return;
                }
                let ids: Vec<String> = self
                    .sessions
                    .iter()
                    .filter(|(_, s)| !s.is_terminal() && s.info.participants.contains(&from))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in ids {
                    if let Some(session) = self.sessions.get_mut(&id) {
                        session.mesh.record_channel_open(&from);
                    }
                    self.try_advance_mesh(&id, effects, queue);
                }
            }
            DirectMessage::MeshReady {
                session_id,
                device_id,
            } => {
                if device_id != from {
                    tracing::warn!("mesh-ready device id {device_id} does not match sender {from}");
                    return;
                }
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.mesh.record_mesh_ready(&from);
                    self.try_advance_mesh(&session_id, effects, queue);
                } else {
                    self.buffer_unknown(from, DirectMessage::MeshReady {
                        session_id,
                        device_id,
                    });
                }
            }
            DirectMessage::SimpleMessage { text } => {
                tracing::info!("message from {from}: {text}");
            }
            DirectMessage::DkgRound1Package { package } => {
                let Some(session_id) = self.route_dkg(&from) else {
                    self.buffer_unknown(from, DirectMessage::DkgRound1Package { package });
                    return;
                };
                match self.dkg_disposition(&session_id, DkgState::Round1InProgress.rank()) {
                    Disposition::Process => {
                        self.process_round1(&session_id, from, package, effects, queue)
                    }
                    Disposition::Buffer => self.buffer_pending(
                        &session_id,
                        from,
                        DirectMessage::DkgRound1Package { package },
                    ),
                    Disposition::Drop => {
                        tracing::debug!("round 1 package from {from} arrived after round 1; dropped")
                    }
                }
            }
            DirectMessage::DkgRound2Package { package } => {
                let Some(session_id) = self.route_dkg(&from) else {
                    self.buffer_unknown(from, DirectMessage::DkgRound2Package { package });
                    return;
                };
                let rank = self
                    .sessions
                    .get(&session_id)
                    .map(|s| s.dkg_state.rank())
                    .unwrap_or(0);
                if rank < DkgState::Round1Complete.rank() {
                    self.buffer_pending(&session_id, from, DirectMessage::DkgRound2Package { package });
                } else if rank <= DkgState::Round2InProgress.rank() {
                    self.process_round2(&session_id, from, package, effects);
                } else {
                    tracing::debug!("round 2 package from {from} arrived after round 2; dropped");
                }
            }
            DirectMessage::DkgPackageRequest { round, requester } => {
                self.on_package_request(from, round, requester, effects);
            }
            DirectMessage::DkgPackageResend { round, package } => {
                self.on_package_resend(from, round, package, effects, queue);
            }
            DirectMessage::SigningRequest {
                signing_id,
                transaction_data,
                required_signers,
            } => {
                self.on_signing_request(from, signing_id, transaction_data, required_signers, effects);
            }
            DirectMessage::SigningAcceptance {
                signing_id,
                accepted,
            } => {
                let Some(session_id) = self.session_id_for_signing(&signing_id) else {
                    self.buffer_unknown(from, DirectMessage::SigningAcceptance {
                        signing_id,
                        accepted,
                    });
                    return;
                };
                self.on_signing_acceptance(&session_id, from, accepted, effects, queue);
            }
            DirectMessage::SignerSelection {
                signing_id,
                selected_signers,
            } => {
                let Some(session_id) = self.session_id_for_signing(&signing_id) else {
                    self.buffer_unknown(from, DirectMessage::SignerSelection {
                        signing_id,
                        selected_signers,
                    });
                    return;
                };
                self.on_signer_selection(&session_id, from, selected_signers, effects, queue);
            }
            DirectMessage::SigningCommitment {
                signing_id,
                sender_identifier,
                commitment,
            } => {
                let Some(session_id) = self.session_id_for_signing(&signing_id) else {
                    self.buffer_unknown(from, DirectMessage::SigningCommitment {
                        signing_id,
                        sender_identifier,
                        commitment,
                    });
                    return;
                };
                let rank = self
                    .sessions
                    .get(&session_id)
                    .map(|s| s.signing_state.rank())
                    .unwrap_or(0);
                if rank < SigningState::CommitmentPhase.rank() {
                    self.buffer_pending(&session_id, from, DirectMessage::SigningCommitment {
                        signing_id,
                        sender_identifier,
                        commitment,
                    });
                } else if rank == SigningState::CommitmentPhase.rank() {
                    self.on_signing_commitment(
                        &session_id,
                        from,
                        sender_identifier,
                        commitment,
                        effects,
                        queue,
                    );
                } else {
                    tracing::debug!("late signing commitment from {from} dropped");
                }
            }
            DirectMessage::SignatureShare {
                signing_id,
                sender_identifier,
                share,
            } => {
                let Some(session_id) = self.session_id_for_signing(&signing_id) else {
                    self.buffer_unknown(from, DirectMessage::SignatureShare {
                        signing_id,
                        sender_identifier,
                        share,
                    });
                    return;
                };
                let rank = self
                    .sessions
                    .get(&session_id)
                    .map(|s| s.signing_state.rank())
                    .unwrap_or(0);
                if rank < SigningState::SharePhase.rank() {
                    self.buffer_pending(&session_id, from, DirectMessage::SignatureShare {
                        signing_id,
                        sender_identifier,
                        share,
                    });
                } else if rank <= SigningState::AggregationPhase.rank() {
                    self.on_signature_share(&session_id, from, sender_identifier, share, effects);
                } else {
                    tracing::debug!("late signature share from {from} dropped");
                }
            }
            DirectMessage::AggregatedSignature {
                signing_id,
                signature,
            } => {
                let Some(session_id) = self.session_id_for_signing(&signing_id) else {
                    self.buffer_unknown(from, DirectMessage::AggregatedSignature {
                        signing_id,
                        signature,
                    });
                    return;
                };
                self.on_aggregated_signature(&session_id, from, signature, effects);
            }
        }
    }

    fn on_package_request(
        &mut self,
        from: String,
        round: u8,
        requester: String,
        effects: &mut Vec<Effect>,
    ) {
        if requester != from {
            tracing::warn!("package request requester {requester} does not match sender {from}");
            return;
        }
        let Some(session_id) = self.route_dkg(&from) else {
            return;
        };
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        let Some(requester_index) = session.info.participant_index(&from) else {
            return;
        };
        let package = session
            .engine
            .as_ref()
            .and_then(|e| e.round_package_for(round, requester_index).ok())
            .flatten();
        let Some(package_hex) = package else {
            tracing::debug!("no round {round} package retained for {from}");
            return;
        };
        let package = match round {
            1 => serde_json::Value::String(package_hex),
            _ => {
                let key = session
                    .engine
                    .as_ref()
                    .and_then(|e| e.identifier_hex(requester_index).ok())
                    .unwrap_or_default();
                let mut map = std::collections::BTreeMap::new();
                map.insert(key, package_hex);
                serde_json::to_value(map).unwrap_or(serde_json::Value::Null)
            }
        };
        effects.push(Effect::SendDirect {
            to: from,
            message: DirectMessage::DkgPackageResend { round, package },
        });
    }

    fn on_package_resend(
        &mut self,
        from: String,
        round: u8,
        package: serde_json::Value,
        effects: &mut Vec<Effect>,
        queue: &mut VecDeque<SessionEvent>,
    ) {
        // A resend is processed exactly like the original message; the
        // duplicate suppression in the round handlers makes it idempotent.
        match round {
            1 => {
                if let Some(package) = package.as_str() {
                    self.on_direct(
                        from,
                        DirectMessage::DkgRound1Package {
                            package: package.to_string(),
                        },
                        effects,
                        queue,
                    );
                }
            }
            2 => {
                if let Ok(map) =
                    serde_json::from_value::<std::collections::BTreeMap<String, String>>(package)
                {
                    self.on_direct(from, DirectMessage::DkgRound2Package { package: map }, effects, queue);
                }
            }
            _ => {}
        }
    }

    // --- Routing helpers --------------------------------------------------

    fn route_dkg(&self, sender: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|(_, s)| {
                s.kind == SessionKind::Dkg
                    && !s.is_terminal()
                    && s.info.participants.iter().any(|p| p == sender)
            })
            .map(|(id, _)| id.clone())
    }

    fn route_by_sender(&self, sender: &str) -> Option<String> {
        self.sessions
            .iter()
            .find(|(_, s)| !s.is_terminal() && s.info.participants.iter().any(|p| p == sender))
            .map(|(id, _)| id.clone())
    }

    fn dkg_disposition(&self, session_id: &str, process_rank: u8) -> Disposition {
        let Some(session) = self.sessions.get(session_id) else {
            return Disposition::Drop;
        };
        let rank = session.dkg_state.rank();
        if rank < process_rank {
            Disposition::Buffer
        } else if rank == process_rank {
            Disposition::Process
        } else {
            Disposition::Drop
        }
    }

    fn buffer_pending(&mut self, session_id: &str, from: String, message: DirectMessage) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            tracing::debug!(
                "buffering {} from {from} for a later phase of {session_id}",
                message.kind()
            );
            session.pending.push((from, message));
        }
    }

    fn buffer_unknown(&mut self, from: String, message: DirectMessage) {
        if self.unknown_buffer.len() >= self.config.buffered_msg_limit {
            let dropped = self.unknown_buffer.pop_front();
            tracing::warn!(
                "unknown-session buffer full ({}); dropping oldest {:?}",
                self.config.buffered_msg_limit,
                dropped.map(|(_, m)| m.kind())
            );
        }
        self.unknown_buffer.push_back((from, message));
    }

    fn drain_unknown_buffer(&mut self, queue: &mut VecDeque<SessionEvent>) {
        for (from, response) in self.pending_responses.drain(..) {
            queue.push_back(SessionEvent::SignalingMessage {
                from,
                message: WebSocketMessage::SessionResponse(response),
            });
        }
        for (from, message) in self.unknown_buffer.drain(..) {
            queue.push_back(SessionEvent::Direct { from, message });
        }
    }

    fn replay_pending(&mut self, session_id: &str, queue: &mut VecDeque<SessionEvent>) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            for (from, message) in session.pending.drain(..) {
                queue.push_back(SessionEvent::Direct { from, message });
            }
        }
    }

    // --- Failure bookkeeping ----------------------------------------------

    fn record_violation(
        &mut self,
        session_id: &str,
        peer: &str,
        phase: &str,
        detail: &str,
        effects: &mut Vec<Effect>,
    ) {
        tracing::warn!("protocol violation by {peer} in {phase}: {detail}");
        let strikes = {
            let Some(session) = self.sessions.get_mut(session_id) else {
                return;
            };
            let rank = session.phase_rank();
            let entry = session.violations.entry(peer.to_string()).or_insert((rank, 0));
            if entry.0 == rank {
                entry.1 += 1;
            } else {
                *entry = (rank, 1);
            }
            entry.1
        };
        if strikes >= 2 {
            self.fail_session(
                session_id,
                SessionError::ProtocolViolation {
                    peer: peer.to_string(),
                    phase: phase.to_string(),
                    detail: detail.to_string(),
                },
                effects,
            );
        }
    }

    fn fail_session(&mut self, session_id: &str, reason: SessionError, effects: &mut Vec<Effect>) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };
        let code = failure_code(&reason);
        session.dkg_state = DkgState::Failed(code.clone());
        if session.kind == SessionKind::Signing {
            session.signing_state = SigningState::Failed(code);
        }
        session.deadline = None;
        session.pending.clear();
        let peers = session.peers();
        effects.push(Effect::CloseChannels {
            session_id: session_id.to_string(),
            peers,
        });
        effects.push(Effect::Emit(NodeEvent::SessionFailed {
            session_id: session_id.to_string(),
            reason,
        }));
    }

    fn on_tick(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        // Session invites live in a time-bounded inbox.
        let ttl = Duration::from_millis(self.config.proposal_timeout_ms);
        self.invites
            .retain(|(_, received)| now.saturating_duration_since(*received) < ttl);

        let expired: Vec<(String, String)> = self
            .sessions
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .filter_map(|(id, s)| {
                s.deadline
                    .as_ref()
                    .filter(|(at, _)| *at <= now)
                    .map(|(_, phase)| (id.clone(), phase.clone()))
            })
            .collect();
        for (session_id, phase) in expired {
            self.fail_session(&session_id, SessionError::Timeout { phase }, effects);
        }
    }
}

fn failure_code(reason: &SessionError) -> String {
    match reason {
        SessionError::Cancelled => "cancelled".to_string(),
        SessionError::Timeout { phase } => format!("timeout_{phase}"),
        SessionError::ProtocolViolation { .. } => "sender_protocol_violation".to_string(),
        SessionError::WalletParameterMismatch { .. } => "wallet_parameter_mismatch".to_string(),
        SessionError::TransportClosed { .. } => "transport_closed".to_string(),
        SessionError::EngineFailure { .. } => "engine_failure".to_string(),
        SessionError::StorageFailure { .. } => "storage_failure".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(buffered_msg_limit: usize) -> SessionCoordinator {
        let config = NodeConfig {
            buffered_msg_limit,
            ..NodeConfig::default()
        };
        SessionCoordinator::new("alice".to_string(), config, CurveKind::Secp256k1, None)
    }

    fn mesh_ready(session_id: &str, device_id: &str) -> SessionEvent {
        SessionEvent::Direct {
            from: device_id.to_string(),
            message: DirectMessage::MeshReady {
                session_id: session_id.to_string(),
                device_id: device_id.to_string(),
            },
        }
    }

    #[test]
    fn test_unknown_session_buffer_is_bounded() {
        let mut coordinator = coordinator(2);
        for i in 0..5 {
            coordinator
                .handle(mesh_ready(&format!("ghost-{i}"), "bob"))
                .unwrap();
        }
        // Oldest entries were dropped with a warning; the cap holds.
        assert_eq!(coordinator.unknown_buffered(), 2);
    }

    #[test]
    fn test_invites_expire_from_the_inbox() {
        let mut coordinator = coordinator(256);
        coordinator
            .handle(SessionEvent::SignalingMessage {
                from: "bob".to_string(),
                message: WebSocketMessage::SessionProposal(SessionProposal {
                    session_id: "s1".to_string(),
                    total: 2,
                    threshold: 2,
                    participants: vec!["alice".to_string(), "bob".to_string()],
                    session_type: SessionType::DKG,
                }),
            })
            .unwrap();
        assert_eq!(coordinator.invites().len(), 1);

        coordinator
            .handle(SessionEvent::Tick {
                now: Instant::now() + Duration::from_secs(600),
            })
            .unwrap();
        assert!(coordinator.invites().is_empty());
    }

    #[test]
    fn test_proposal_excluding_this_device_is_dropped() {
        let mut coordinator = coordinator(256);
        coordinator
            .handle(SessionEvent::SignalingMessage {
                from: "bob".to_string(),
                message: WebSocketMessage::SessionProposal(SessionProposal {
                    session_id: "s1".to_string(),
                    total: 2,
                    threshold: 2,
                    participants: vec!["bob".to_string(), "carol".to_string()],
                    session_type: SessionType::DKG,
                }),
            })
            .unwrap();
        assert!(coordinator.invites().is_empty());
    }

    #[test]
    fn test_accepting_an_unknown_invite_fails() {
        let mut coordinator = coordinator(256);
        let err = coordinator
            .handle(SessionEvent::AcceptSession {
                session_id: "nope".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownSession(_)));
    }
}
