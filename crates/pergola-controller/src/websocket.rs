//! WebSocket sessions.
//!
//! Each connection joins the [`BroadcastHub`](crate::BroadcastHub) through
//! a bounded queue and gets the current snapshot as its first message. Text
//! messages are commands; replies to them go back on the same socket,
//! while state changes reach every session through the broadcast.
//!
//! # Heartbeat
//!
//! The server pings every 30 seconds and closes the session after three
//! pings go unanswered.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::command::Reply;
use crate::error::ProtocolError;

/// Broadcasts a session may have queued before it counts as unresponsive.
pub const SESSION_BUFFER: usize = 16;

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler, mounted on `/` and `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Sends a direct reply. Returns `false` if the client is gone.
async fn send_reply(sender: &mut SplitSink<WebSocket, Message>, reply: &Reply) -> bool {
    let json = match reply.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize reply: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(json)).await.is_ok()
}

/// Handles a single WebSocket connection.
///
/// - Registers with the broadcast hub and forwards its messages
/// - Sends the current snapshot before anything else
/// - Routes text messages as commands and answers on this socket only
/// - Sends heartbeat pings and closes after missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Queued broadcasts are only forwarded after the initial snapshot
    let (queue_tx, mut queue) = mpsc::channel::<Arc<str>>(SESSION_BUFFER);
    let session = state.hub.register(queue_tx).await;

    let snapshot = match state.controller.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!("Cannot serve session: {}", e);
            state.hub.unregister(session).await;
            return;
        }
    };

    if !send_reply(&mut sender, &Reply::Snapshot(snapshot)).await {
        debug!("Client disconnected before receiving initial state");
        state.hub.unregister(session).await;
        return;
    }

    info!(session, "WebSocket client connected, sent initial state");

    let mut heartbeat_interval = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = state.router.route(&text).await {
                            if !send_reply(&mut sender, &reply).await {
                                debug!("Failed to send reply, client disconnected");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = Reply::error(ProtocolError::BinaryMessage);
                        if !send_reply(&mut sender, &reply).await {
                            debug!("Failed to send reply, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(session, "Client requested close");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            broadcast = queue.recv() => {
                let Some(message) = broadcast else {
                    // The hub dropped us after a failed delivery
                    info!(session, "Session removed by broadcast hub");
                    break;
                };
                if sender.send(Message::Text(message.to_string())).await.is_err() {
                    debug!("Failed to send broadcast, client disconnected");
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(session, "Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    state.hub.unregister(session).await;
    info!(session, "WebSocket client disconnected");
}
