use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use retro_types::events::Envelope;

use crate::hub::Hub;
use crate::mux::Mux;

/// Server sends a Ping every 15 seconds. Two missed Pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_HEARTBEATS: u8 = 2;

/// Upper bound on a single socket write. A client that stops reading is
/// dropped rather than stalling its writer forever.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve one WebSocket until either side closes it.
///
/// Incoming text frames are decoded as envelopes and handed to the mux one
/// at a time, in arrival order. Outgoing messages, unicast and broadcast
/// alike, go through the connection's queue so a slow client never blocks
/// the sender.
pub async fn handle_connection(socket: WebSocket, hub: Hub, mux: Mux) {
    let (sender, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = hub.register(tx);
    let conn_id = conn.id();

    info!("Connection {} opened ({} open)", conn_id, hub.len());

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(
        sender,
        rx,
        pong_received.clone(),
        HEARTBEAT_INTERVAL,
        SEND_TIMEOUT,
    ));

    let mut recv_task = tokio::spawn(async move {
        let mut conn = conn;
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(env) => {
                        if mux.dispatch(&mut conn, env).is_break() {
                            break;
                        }
                    }
                    Err(e) => warn!(
                        "Connection {} sent bad envelope: {} -- raw: {}",
                        conn.id(),
                        e,
                        text.chars().take(200).collect::<String>()
                    ),
                },
                Ok(Message::Pong(_)) => pong_received.store(true, Ordering::Release),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Connection {} read failed: {}", conn.id(), e);
                    break;
                }
            }
        }
        if let Some(err) = conn.err() {
            info!("Connection {} ({}) closing: {}", conn.id(), conn.name(), err);
        }
    });

    // When the reader stops first, let the writer flush what is already
    // queued (a bad-auth error, say). It ends once every sender is gone.
    let reader_done = tokio::select! {
        _ = &mut send_task => false,
        _ = &mut recv_task => true,
    };

    if reader_done {
        hub.unregister(conn_id);
        if let Err(e) = send_task.await {
            debug!("Connection {} writer ended abnormally: {}", conn_id, e);
        }
    } else {
        recv_task.abort();
        hub.unregister(conn_id);
    }

    info!("Connection {} closed ({} open)", conn_id, hub.len());
}

/// Drain the queue onto the socket and keep the peer honest with pings.
/// Returns when the queue closes (after a close frame), when a write fails
/// or takes longer than `send_timeout`, or when the peer misses too many
/// pongs.
async fn write_loop<S>(
    mut sender: S,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    pong_received: Arc<AtomicBool>,
    heartbeat_every: Duration,
    send_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut heartbeat = tokio::time::interval(heartbeat_every);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                let text = match serde_json::to_string(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} event: {}", msg.op, e);
                        continue;
                    }
                };
                if !send(&mut sender, Message::Text(text.into()), send_timeout).await {
                    return;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= MAX_MISSED_HEARTBEATS {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        return;
                    }
                }
                if !send(&mut sender, Message::Ping(Bytes::new()), send_timeout).await {
                    return;
                }
            }
        }
    }

    let close = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }));
    send(&mut sender, close, send_timeout).await;
}

/// Write one frame, giving up after `limit`.
async fn send<S>(sender: &mut S, msg: Message, limit: Duration) -> bool
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Socket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Socket write timed out after {:?}", limit);
            false
        }
    }
}
