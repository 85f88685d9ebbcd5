use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use parley_types::events::GatewayCommand;
use parley_types::models::ConnectionId;

use crate::relay::RelayCore;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Longest slice of a bad frame that makes it into the log.
const LOGGED_FRAME_CHARS: usize = 200;

/// Drive one WebSocket from upgrade to close. The socket gets a fresh
/// connection id; when it goes away for any reason the relay's disconnect
/// handler runs.
pub async fn handle_connection(socket: WebSocket, relay: RelayCore) {
    let conn_id = ConnectionId::generate();
    let (mut sender, mut receiver) = socket.split();

    let mut outbox = relay.dispatcher().register(conn_id.clone()).await;
    info!(connection = %conn_id, "connected to gateway");

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("failed to encode {}: {}", event.kind(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client, one at a time. A stop signal ends the loop
    // between commands, never in the middle of one.
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let relay_recv = relay.clone();
    let conn_recv = conn_id.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = &mut stop_rx => break,
                frame = receiver.next() => frame,
            };
            let Some(Ok(msg)) = frame else { break };

            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Err(e) = relay_recv.handle(&conn_recv, cmd).await {
                            error!(connection = %conn_recv, "event dropped: {}", e);
                        }
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(LOGGED_FRAME_CHARS).collect();
                        warn!(connection = %conn_recv, "bad command: {} -- raw: {}", e, raw);
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish. If the send side goes first, let the
    // command in flight complete so disconnect sees its effects.
    tokio::select! {
        _ = &mut send_task => {
            let _ = stop_tx.send(());
            if let Err(e) = recv_task.await {
                error!(connection = %conn_id, "receive task failed: {}", e);
            }
        }
        _ = &mut recv_task => send_task.abort(),
    }

    relay.dispatcher().unregister(&conn_id).await;
    relay.disconnect(&conn_id).await;
    info!(connection = %conn_id, "disconnected from gateway");
}
