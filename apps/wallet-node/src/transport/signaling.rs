//! Signaling-plane client: one persistent duplex connection to the
//! well-known signaling endpoint, shared by every session.
//!
//! Connection loss triggers exponential-backoff reconnect with a capped
//! interval; each (re)connect re-registers the device and re-requests the
//! device list. Outbound messages sent while disconnected wait in the
//! channel and flush after the next successful register.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use frost_signal_server::{ClientMsg, ServerMsg};

use super::TransportEvent;
use crate::errors::TransportError;
use crate::protocol::signal::WebSocketMessage;

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

pub struct SignalingClient {
    device_id: String,
    out_tx: mpsc::UnboundedSender<ClientMsg>,
    task: tokio::task::JoinHandle<()>,
}

impl SignalingClient {
    /// Spawns the connection loop. Events flow into `events` for the node
    /// runtime to pump into the session layer.
    pub fn connect(
        url: String,
        device_id: String,
        backoff_initial: Duration,
        backoff_max: Duration,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_loop(
            url,
            device_id.clone(),
            out_rx,
            events,
            backoff_initial,
            backoff_max,
        ));
        Self {
            device_id,
            out_tx,
            task,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Relays a session-protocol payload to another device.
    pub fn relay(&self, to: &str, message: &WebSocketMessage) -> Result<(), TransportError> {
        let data = serde_json::to_value(message)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.out_tx
            .send(ClientMsg::Relay {
                to: to.to_string(),
                data,
            })
            .map_err(|_| TransportError::NotConnected)
    }

    pub fn list_devices(&self) -> Result<(), TransportError> {
        self.out_tx
            .send(ClientMsg::ListDevices)
            .map_err(|_| TransportError::NotConnected)
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_loop(
    url: String,
    device_id: String,
    mut out_rx: mpsc::UnboundedReceiver<ClientMsg>,
    events: mpsc::UnboundedSender<TransportEvent>,
    backoff_initial: Duration,
    backoff_max: Duration,
) {
    let mut backoff = backoff_initial;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                tracing::info!("connected to signaling server {url}");
                backoff = backoff_initial;
                let _ = events.send(TransportEvent::SignalingConnected);
                let (mut ws_sink, mut ws_stream) = ws_stream.split();

                // Register and refresh the device list on every connect.
                if send_client_msg(
                    &mut ws_sink,
                    &ClientMsg::Register {
                        device_id: device_id.clone(),
                    },
                )
                .await
                .is_ok()
                {
                    let _ = send_client_msg(&mut ws_sink, &ClientMsg::ListDevices).await;

                    loop {
                        tokio::select! {
                            outbound = out_rx.recv() => {
                                match outbound {
                                    Some(msg) => {
                                        if send_client_msg(&mut ws_sink, &msg).await.is_err() {
                                            break;
                                        }
                                    }
                                    // Client handle dropped; stop entirely.
                                    None => return,
                                }
                            }
                            inbound = ws_stream.next() => {
                                match inbound {
                                    Some(Ok(msg)) => {
                                        if handle_server_message(msg, &events, &mut ws_sink).await {
                                            break;
                                        }
                                    }
                                    _ => break,
                                }
                            }
                        }
                    }
                }
                let _ = events.send(TransportEvent::SignalingClosed);
                tracing::warn!("signaling connection lost; reconnecting");
            }
            Err(e) => {
                tracing::warn!("signaling connect to {url} failed: {e}");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, backoff_max);
    }
}

async fn send_client_msg(ws_sink: &mut WsSink, msg: &ClientMsg) -> Result<(), TransportError> {
    let text =
        serde_json::to_string(msg).map_err(|e| TransportError::Serialization(e.to_string()))?;
    ws_sink
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))
}

/// Returns true when the connection should be torn down.
async fn handle_server_message(
    msg: Message,
    events: &mpsc::UnboundedSender<TransportEvent>,
    ws_sink: &mut WsSink,
) -> bool {
    match msg {
        Message::Text(txt) => {
            match serde_json::from_str::<ServerMsg>(&txt) {
                Ok(ServerMsg::Devices { devices }) => {
                    let _ = events.send(TransportEvent::Devices(devices));
                }
                Ok(ServerMsg::Relay { from, data }) => {
                    let _ = events.send(TransportEvent::Relay { from, data });
                }
                Ok(ServerMsg::Error { error }) => {
                    tracing::warn!("signaling server error: {error}");
                }
                Err(e) => {
                    tracing::warn!("unparseable server message: {e}");
                }
            }
            false
        }
        Message::Ping(ping_data) => {
            let _ = ws_sink.send(Message::Pong(ping_data)).await;
            false
        }
        Message::Close(_) => true,
        _ => false,
    }
}
