//! Process-scoped node runtime.
//!
//! `Node` owns the keystore, the account and permission registries, the
//! transports, and the session coordinator, with explicit `init` and
//! `teardown`. It pumps transport events into the coordinator one at a
//! time and performs the effects the coordinator returns; hosts observe
//! progress through the broadcast event feed.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use frost_wallet_engine::CurveKind;

use crate::config::NodeConfig;
use crate::errors::{NodeError, Result};
use crate::keystore::Keystore;
use crate::protocol::signal::WebSocketMessage;
use crate::registry::{Account, AccountRegistry, PermissionRegistry};
use crate::session::{Effect, SessionCoordinator, SessionEvent};
use crate::transport::{
    ChannelController, DirectRouter, PeerChannel, SignalingClient, TransportEvent,
};

pub use crate::session::NodeEvent;

#[derive(Clone)]
struct Shared {
    coordinator: Arc<Mutex<SessionCoordinator>>,
    router: Arc<Mutex<DirectRouter>>,
    signaling: Option<Arc<SignalingClient>>,
    controller: Arc<dyn ChannelController>,
    keystore: Arc<Mutex<Keystore>>,
    accounts: Arc<Mutex<AccountRegistry>>,
    node_events: broadcast::Sender<NodeEvent>,
}

impl Shared {
    fn dispatch(&self, event: SessionEvent) -> Result<()> {
        let effects = {
            let mut coordinator = self
                .coordinator
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            coordinator.handle(event)?
        };
        self.apply(effects);
        Ok(())
    }

    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Relay { to, message } => {
                    if let Some(signaling) = &self.signaling {
                        if let Err(e) = signaling.relay(&to, &message) {
                            tracing::warn!("relay to {to} failed: {e}");
                        }
                    } else {
                        tracing::debug!("no signaling client; dropping relay to {to}");
                    }
                }
                Effect::SendDirect { to, message } => {
                    let mut router = self.router.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = router.send(&to, &message) {
                        tracing::warn!("direct send to {to} failed: {e}");
                    }
                }
                Effect::OpenChannels { session_id, peers } => {
                    self.controller.open_channels(&session_id, &peers);
                }
                Effect::CloseChannels { session_id, peers } => {
                    {
                        let mut router = self.router.lock().unwrap_or_else(|e| e.into_inner());
                        router.close_channels(&peers);
                    }
                    self.controller.close_channels(&session_id, &peers);
                }
                Effect::Emit(event) => {
                    self.mirror_into_accounts(&event);
                    let _ = self.node_events.send(event);
                }
            }
        }
    }

    /// Wallet metadata and accounts stay 1:1: a finished DKG creates the
    /// account for its wallet.
    fn mirror_into_accounts(&self, event: &NodeEvent) {
        let NodeEvent::DkgComplete {
            wallet_id,
            address,
            group_public_key,
            ..
        } = event
        else {
            return;
        };
        if wallet_id.is_empty() {
            return;
        }
        let blockchain = {
            let keystore = self.keystore.lock().unwrap_or_else(|e| e.into_inner());
            keystore
                .get_wallet(wallet_id)
                .map(|w| w.blockchain.clone())
                .unwrap_or_else(|| "ethereum".to_string())
        };
        let account = Account {
            id: wallet_id.clone(),
            address: address.clone(),
            display_name: wallet_id.clone(),
            balance: "0".to_string(),
            blockchain,
            public_key: group_public_key.clone(),
            created: String::new(),
            metadata: None,
        };
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = accounts.add_account(account) {
            tracing::warn!("account for wallet {wallet_id} not added: {e}");
        }
    }
}

pub struct Node {
    device_id: String,
    shared: Shared,
    permissions: Arc<Mutex<PermissionRegistry>>,
    devices: Arc<Mutex<Vec<String>>>,
    pump: tokio::task::JoinHandle<()>,
}

impl Node {
    /// Brings the node up: storage, registries, coordinator, transports,
    /// and the event pump. `transport` is the embedding environment's
    /// peer-to-peer sender; `controller` is its channel-establishment
    /// hook. `signaling_url: None` runs without a signaling plane (tests,
    /// local demos).
    pub fn init(
        device_id: &str,
        config: NodeConfig,
        curve: CurveKind,
        transport: Arc<dyn PeerChannel>,
        controller: Arc<dyn ChannelController>,
        signaling_url: Option<String>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| NodeError::Config(e.to_string()))?;
        let keystore = Arc::new(Mutex::new(Keystore::initialize(
            config.data_dir.join("keystore"),
            device_id,
        )?));
        let accounts = Arc::new(Mutex::new(AccountRegistry::load(&config.data_dir)?));
        let permissions = Arc::new(Mutex::new(PermissionRegistry::load(&config.data_dir)?));

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let router = Arc::new(Mutex::new(DirectRouter::new(
            device_id.to_string(),
            transport,
            events_tx.clone(),
        )));
        let signaling = signaling_url.map(|url| {
            Arc::new(SignalingClient::connect(
                url,
                device_id.to_string(),
                Duration::from_millis(config.reconnect_backoff_initial_ms),
                Duration::from_millis(config.reconnect_backoff_max_ms),
                events_tx.clone(),
            ))
        });
        let coordinator = Arc::new(Mutex::new(SessionCoordinator::new(
            device_id.to_string(),
            config.clone(),
            curve,
            Some(keystore.clone()),
        )));
        let (node_events, _) = broadcast::channel(256);

        let shared = Shared {
            coordinator,
            router,
            signaling,
            controller,
            keystore,
            accounts,
            node_events,
        };
        let devices = Arc::new(Mutex::new(Vec::new()));
        let pump = tokio::spawn(pump_loop(shared.clone(), devices.clone(), events_rx));

        Ok(Self {
            device_id: device_id.to_string(),
            shared,
            permissions,
            devices,
            pump,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.shared.node_events.subscribe()
    }

    pub fn keystore(&self) -> Arc<Mutex<Keystore>> {
        self.shared.keystore.clone()
    }

    pub fn accounts(&self) -> Arc<Mutex<AccountRegistry>> {
        self.shared.accounts.clone()
    }

    pub fn permissions(&self) -> Arc<Mutex<PermissionRegistry>> {
        self.permissions.clone()
    }

    /// Devices most recently reported by the signaling server.
    pub fn devices(&self) -> Vec<String> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // --- Session commands -------------------------------------------------

    pub fn propose_session(
        &self,
        session_id: &str,
        total: u16,
        threshold: u16,
        participants: Vec<String>,
    ) -> Result<()> {
        self.shared.dispatch(SessionEvent::ProposeSession {
            session_id: session_id.to_string(),
            total,
            threshold,
            participants,
        })
    }

    pub fn accept_session(&self, session_id: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::AcceptSession {
            session_id: session_id.to_string(),
        })
    }

    pub fn reject_session(&self, session_id: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::RejectSession {
            session_id: session_id.to_string(),
        })
    }

    pub fn cancel_session(&self, session_id: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::CancelSession {
            session_id: session_id.to_string(),
        })
    }

    pub fn initiate_signing(&self, wallet_id: &str, message_hex: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::InitiateSigning {
            wallet_id: wallet_id.to_string(),
            message_hex: message_hex.to_string(),
        })
    }

    pub fn accept_signing(&self, signing_id: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::AcceptSigning {
            signing_id: signing_id.to_string(),
        })
    }

    pub fn reject_signing(&self, signing_id: &str) -> Result<()> {
        self.shared.dispatch(SessionEvent::RejectSigning {
            signing_id: signing_id.to_string(),
        })
    }

    // --- Embedding-environment callbacks ----------------------------------

    /// The environment observed a direct channel to `peer` open.
    pub fn report_channel_open(&self, peer: &str) {
        let mut router = self
            .shared
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        router.channel_opened(peer);
    }

    /// The environment observed the channel to `peer` close.
    pub fn report_channel_closed(&self, peer: &str) {
        let mut router = self
            .shared
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        router.channel_closed(peer);
    }

    /// Inbound direct-channel payload from `peer`.
    pub fn inbound(&self, peer: &str, payload: &str) {
        let router = self
            .shared
            .router
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        router.inbound(peer, payload);
    }

    /// Stops the pump, disconnects signaling, and locks the keystore.
    pub fn teardown(self) {
        self.pump.abort();
        if let Some(signaling) = &self.shared.signaling {
            signaling.shutdown();
        }
        let mut keystore = self
            .shared
            .keystore
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        keystore.lock();
    }
}

async fn pump_loop(
    shared: Shared,
    devices: Arc<Mutex<Vec<String>>>,
    mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        let session_event = tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { return };
                match event {
                    TransportEvent::SignalingConnected => {
                        tracing::info!("signaling connected");
                        continue;
                    }
                    TransportEvent::SignalingClosed => {
                        tracing::warn!("signaling closed; sessions with open channels continue");
                        continue;
                    }
                    TransportEvent::Devices(list) => {
                        *devices.lock().unwrap_or_else(|e| e.into_inner()) = list;
                        continue;
                    }
                    TransportEvent::Relay { from, data } => {
                        match serde_json::from_value::<WebSocketMessage>(data) {
                            Ok(message) => SessionEvent::SignalingMessage { from, message },
                            Err(e) => {
                                tracing::warn!("unparseable relay payload from {from}: {e}");
                                continue;
                            }
                        }
                    }
                    TransportEvent::ChannelOpen { peer } => SessionEvent::ChannelOpen { peer },
                    TransportEvent::ChannelClosed { peer } => SessionEvent::ChannelClosed { peer },
                    TransportEvent::Direct { peer, message } => SessionEvent::Direct {
                        from: peer,
                        message,
                    },
                }
            }
            _ = tick.tick() => SessionEvent::Tick { now: Instant::now() },
        };
        if let Err(e) = shared.dispatch(session_event) {
            tracing::warn!("event dispatch failed: {e}");
        }
    }
}
