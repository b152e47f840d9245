//! Headless wallet node.
//!
//! `listen` joins the signaling server and auto-accepts session invites;
//! channel establishment is left to the embedding environment, so this
//! mode is mainly a discovery/diagnostics surface. `demo-dkg` runs three
//! in-process nodes over the in-memory mesh through a full 2-of-3 DKG and
//! a threshold signing ceremony.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use frost_wallet_engine::CurveKind;
use wallet_node::node::{Node, NodeEvent};
use wallet_node::transport::{InMemoryMesh, NullChannelController};
use wallet_node::NodeConfig;

#[derive(Parser)]
#[command(name = "wallet-node", about = "Threshold wallet node")]
struct Cli {
    /// Device identifier, stable across reconnects
    #[arg(long, default_value = "wallet-node-1")]
    device_id: String,

    /// Ciphersuite for new DKG sessions
    #[arg(long, default_value = "secp256k1")]
    curve: String,

    /// Signaling server endpoint (listen mode)
    #[arg(long)]
    signaling_url: Option<String>,

    /// Keystore password
    #[arg(long, default_value = "")]
    password: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the signaling server and auto-accept session invites
    Listen,
    /// Run a local three-node 2-of-3 DKG and signing ceremony
    DemoDkg,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let curve = CurveKind::parse(&cli.curve).map_err(|e| anyhow!("{e}"))?;
    match cli.command {
        Command::Listen => listen(cli, curve).await,
        Command::DemoDkg => demo_dkg(curve).await,
    }
}

async fn listen(cli: Cli, curve: CurveKind) -> Result<()> {
    let mut config = NodeConfig::load_or_create().await?;
    if let Some(url) = cli.signaling_url {
        config.signaling_url = url;
    }
    let mesh = InMemoryMesh::new();
    let (handle, _rx) = mesh.attach(&cli.device_id);
    let node = Node::init(
        &cli.device_id,
        config.clone(),
        curve,
        Arc::new(handle),
        Arc::new(NullChannelController),
        Some(config.signaling_url.clone()),
    )?;
    if !cli.password.is_empty() {
        node.keystore()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unlock(&cli.password);
    }
    tracing::info!(
        "listening as {} on {}",
        node.device_id(),
        config.signaling_url
    );

    let mut events = node.subscribe();
    loop {
        match events.recv().await {
            Ok(NodeEvent::InviteReceived { session }) => {
                tracing::info!(
                    "invite {} ({}-of-{}) from {}; accepting",
                    session.session_id,
                    session.threshold,
                    session.total,
                    session.proposer_id
                );
                if let Err(e) = node.accept_session(&session.session_id) {
                    tracing::warn!("accept failed: {e}");
                }
            }
            Ok(event) => tracing::info!("{event:?}"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event feed lagged by {n}");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

struct DemoNode {
    node: Arc<Node>,
    events: broadcast::Receiver<NodeEvent>,
}

async fn demo_dkg(curve: CurveKind) -> Result<()> {
    // An in-process signaling relay carries proposals and responses; the
    // in-memory mesh stands in for the peer-to-peer channels.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let signaling_url = format!("ws://{}", listener.local_addr()?);
    tokio::spawn(frost_signal_server::run(listener));

    let mesh = InMemoryMesh::new();
    let device_ids = ["alice", "bob", "carol"];
    let base = std::env::temp_dir().join(format!("wallet-node-demo-{}", std::process::id()));

    let mut nodes = Vec::new();
    for device_id in device_ids {
        let (handle, mut rx) = mesh.attach(device_id);
        let config = NodeConfig {
            data_dir: base.join(device_id),
            signaling_url: signaling_url.clone(),
            ..NodeConfig::default()
        };
        let node = Arc::new(Node::init(
            device_id,
            config,
            curve,
            Arc::new(handle),
            Arc::new(NullChannelController),
            Some(signaling_url.clone()),
        )?);
        node.keystore()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unlock("demo-password");
        let pump = node.clone();
        tokio::spawn(async move {
            while let Some((from, payload)) = rx.recv().await {
                pump.inbound(&from, &payload);
            }
        });
        let events = node.subscribe();
        nodes.push(DemoNode { node, events });
    }

    let participants: Vec<String> = device_ids.iter().map(|d| d.to_string()).collect();

    // Propose only once every device is registered with the relay.
    for _ in 0..100 {
        if nodes
            .iter()
            .all(|n| n.node.devices().len() == device_ids.len())
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let wallet_id = "demo_wallet_2of3";
    nodes[0]
        .node
        .propose_session(wallet_id, 3, 2, participants.clone())?;

    for i in 1..3 {
        wait_for(&mut nodes[i], |e| {
            matches!(e, NodeEvent::InviteReceived { session } if session.session_id == wallet_id)
        })
        .await?;
        nodes[i].node.accept_session(wallet_id)?;
    }
    open_full_mesh(&nodes, &participants);

    for i in 0..3 {
        let event = wait_for(&mut nodes[i], |e| {
            matches!(e, NodeEvent::DkgComplete { .. })
        })
        .await?;
        if let NodeEvent::DkgComplete {
            wallet_id, address, ..
        } = event
        {
            tracing::info!(
                "{}: wallet {wallet_id} ready, address {address}",
                nodes[i].node.device_id()
            );
        }
    }

    // Threshold signing: carol accepts, bob declines.
    let message_hex = hex::encode(b"hello");
    nodes[0].node.initiate_signing(wallet_id, &message_hex)?;
    for i in 1..3 {
        wait_for(&mut nodes[i], |e| {
            matches!(e, NodeEvent::InviteReceived { session } if session.session_id == wallet_id)
        })
        .await?;
        nodes[i].node.accept_session(wallet_id)?;
    }
    open_full_mesh(&nodes, &participants);

    let bob_request = wait_for(&mut nodes[1], |e| {
        matches!(e, NodeEvent::SigningRequestReceived { .. })
    })
    .await?;
    let carol_request = wait_for(&mut nodes[2], |e| {
        matches!(e, NodeEvent::SigningRequestReceived { .. })
    })
    .await?;
    if let NodeEvent::SigningRequestReceived { signing_id, .. } = bob_request {
        nodes[1].node.reject_signing(&signing_id)?;
    }
    if let NodeEvent::SigningRequestReceived { signing_id, .. } = carol_request {
        nodes[2].node.accept_signing(&signing_id)?;
    }

    let done = wait_for(&mut nodes[0], |e| {
        matches!(e, NodeEvent::SigningComplete { .. })
    })
    .await?;
    if let NodeEvent::SigningComplete { signature_hex, .. } = done {
        tracing::info!("aggregated signature: {signature_hex}");
    }

    for member in nodes {
        if let Ok(node) = Arc::try_unwrap(member.node) {
            node.teardown();
        }
    }
    Ok(())
}

fn open_full_mesh(nodes: &[DemoNode], participants: &[String]) {
    for member in nodes {
        for peer in participants {
            if peer != member.node.device_id() {
                member.node.report_channel_open(peer);
            }
        }
    }
}

async fn wait_for(
    member: &mut DemoNode,
    predicate: impl Fn(&NodeEvent) -> bool,
) -> Result<NodeEvent> {
    let events = &mut member.events;
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(anyhow!("event feed closed"))
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow!("timed out waiting for event"))?
}
