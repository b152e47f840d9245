use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use crate::{ClientMsg, ServerMsg};

type DeviceSender = mpsc::UnboundedSender<Message>;
type DeviceMap = Arc<Mutex<HashMap<String, DeviceSender>>>;

/// Accept loop. Runs until the listener fails; callers that need shutdown
/// race this future against a signal (see `main.rs`).
pub async fn run(listener: TcpListener) {
    let devices: DeviceMap = Arc::new(Mutex::new(HashMap::new()));

    while let Ok((stream, addr)) = listener.accept().await {
        let devices = devices.clone();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::warn!("websocket handshake with {addr} failed: {e}");
                    return;
                }
            };
            let (mut ws_sink, mut ws_stream) = ws_stream.split();
            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            let mut device_id: Option<String> = None;

            // Task to forward messages from rx to ws_sink
            let ws_sink_task = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if ws_sink.send(msg).await.is_err() {
                        break;
                    }
                }
            });

            while let Some(msg) = ws_stream.next().await {
                let msg = match msg {
                    Ok(m) if m.is_text() => match m.into_text() {
                        Ok(txt) => txt,
                        Err(_) => continue,
                    },
                    Ok(m) if m.is_close() => break,
                    Err(_) => break,
                    _ => continue,
                };

                match serde_json::from_str::<ClientMsg>(&msg) {
                    Ok(ClientMsg::Register { device_id: reg_id }) => {
                        let mut devices_guard = devices.lock().unwrap();
                        if devices_guard.contains_key(&reg_id) {
                            let err = ServerMsg::Error {
                                error: "device_id already registered".to_string(),
                            };
                            let _ = tx.send(text(&err));
                            break;
                        }
                        device_id = Some(reg_id.clone());
                        devices_guard.insert(reg_id.clone(), tx.clone());
                        tracing::info!("registered device: {reg_id}");

                        broadcast_device_list(&devices_guard);
                    }
                    Ok(ClientMsg::ListDevices) => {
                        let devices_guard = devices.lock().unwrap();
                        let device_list: Vec<String> = devices_guard.keys().cloned().collect();
                        let _ = tx.send(text(&ServerMsg::Devices {
                            devices: device_list,
                        }));
                    }
                    Ok(ClientMsg::Relay { to, data }) => {
                        let devices_guard = devices.lock().unwrap();
                        if let Some(device_tx) = devices_guard.get(&to) {
                            let relay = ServerMsg::Relay {
                                from: device_id.as_deref().unwrap_or_default().to_string(),
                                data,
                            };
                            tracing::debug!(
                                "relaying from {} to {to}",
                                device_id.as_deref().unwrap_or("unknown")
                            );
                            let _ = device_tx.send(text(&relay));
                        } else {
                            tracing::warn!("relay failed: unknown device {to}");
                            let err = ServerMsg::Error {
                                error: format!("unknown device: {to}"),
                            };
                            let _ = tx.send(text(&err));
                        }
                    }
                    Err(_) => {
                        let err = ServerMsg::Error {
                            error: "invalid message".to_string(),
                        };
                        let _ = tx.send(text(&err));
                    }
                }
            }

            // Cleanup on disconnect
            if let Some(my_id) = device_id {
                let mut devices_guard = devices.lock().unwrap();
                devices_guard.remove(&my_id);
                tracing::info!("device {my_id} disconnected");
                broadcast_device_list(&devices_guard);
            }
            ws_sink_task.abort();
        });
    }
}

fn text(msg: &ServerMsg) -> Message {
    Message::Text(
        serde_json::to_string(msg)
            .unwrap_or_else(|_| String::from("{\"type\":\"error\",\"error\":\"encode\"}"))
            .into(),
    )
}

fn broadcast_device_list(devices: &HashMap<String, DeviceSender>) {
    let device_list: Vec<String> = devices.keys().cloned().collect();
    let msg = ServerMsg::Devices {
        devices: device_list,
    };
    for ptx in devices.values() {
        let _ = ptx.send(text(&msg));
    }
}
