//! Connection Hub: the WebSocket upgrade handler and the per-connection
//! reader/writer task pair.
//!
//! Split/spawn shape grounded on the project-websocket handler elsewhere in
//! this pack: one task drains a broadcast-style channel and writes frames,
//! the other reads frames inline and feeds a shared router. Protocol-level
//! ping/pong is answered by the underlying WebSocket implementation; the
//! writer task only tracks the client's most recent pong to detect a
//! connection that has gone silent.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use agentbridge_common::ids::ConnectionId;
use agentbridge_wire::envelope::ServerMessage;
use agentbridge_wire::ErrorCode;

use crate::rate_limit::TokenBucket;
use crate::router;
use crate::state::AppState;

pub async fn upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !origin_allowed(&state, &headers) {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr.ip()))
}

/// An empty `allowed_origins` list means "accept any origin"; otherwise the
/// `Origin` header must match one of the configured values exactly. A
/// missing header is allowed through — not every WebSocket client (mobile
/// apps in particular) sets one.
fn origin_allowed(state: &AppState, headers: &HeaderMap) -> bool {
    if state.config.network.allowed_origins.is_empty() {
        return true;
    }
    let Some(origin) = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    state.config.network.allowed_origins.iter().any(|allowed| allowed == origin)
}

async fn handle_socket(socket: WebSocket, state: AppState, ip: IpAddr) {
    if !state.governor.accepts_new_work() {
        reject(socket, ErrorCode::ResourceLimit, "server under memory pressure, rejecting new connections").await;
        return;
    }
    let permit = match state.limiter.try_acquire(ip) {
        Ok(permit) => permit,
        Err(code) => {
            reject(socket, code, "connection limit reached").await;
            return;
        }
    };

    let connection_id = ConnectionId::new();
    state.governor.connection_opened();
    tracing::info!(%connection_id, %ip, "connection accepted");

    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(state.config.limits.outbound_queue_capacity);

    let ping_interval = Duration::from_secs(state.config.network.ping_interval_secs.max(1));
    let pong_timeout = ping_interval * state.config.network.pong_timeout_intervals.max(1);
    let last_pong = Arc::new(AtomicI64::new(Utc::now().timestamp()));

    let writer_last_pong = last_pong.clone();
    let writer_connection_id = connection_id;
    let writer_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                maybe_message = outbound_rx.recv() => {
                    let Some(message) = maybe_message else { break };
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(err) => {
                            tracing::error!(connection_id = %writer_connection_id, error = %err, "failed to encode outbound frame");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let idle = Utc::now().timestamp() - writer_last_pong.load(Ordering::Relaxed);
                    if idle > pong_timeout.as_secs() as i64 {
                        tracing::warn!(connection_id = %writer_connection_id, idle_secs = idle, "closing connection: missed pong deadline");
                        break;
                    }
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let rate_limiter = TokenBucket::new(state.config.limits.rate_limit_per_sec, state.config.limits.rate_limit_burst);
    let max_frame_size = state.config.limits.max_frame_size_bytes;

    loop {
        let frame = match stream.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => {
                tracing::debug!(%connection_id, error = %err, "websocket transport error");
                break;
            }
            None => break,
        };

        match frame {
            Message::Text(text) => {
                if !rate_limiter.try_take() {
                    send_direct(&outbound_tx, ServerMessage::error(ErrorCode::ResourceLimit, "rate limit exceeded"));
                    continue;
                }
                if text.len() > max_frame_size {
                    send_direct(
                        &outbound_tx,
                        ServerMessage::error(ErrorCode::InvalidMessage, format!("frame of {} bytes exceeds limit", text.len())),
                    );
                    continue;
                }
                let raw = match serde_json::from_str(&text) {
                    Ok(raw) => raw,
                    Err(err) => {
                        send_direct(&outbound_tx, ServerMessage::error(ErrorCode::InvalidMessage, format!("invalid JSON: {err}")));
                        continue;
                    }
                };
                for response in router::route(&state, connection_id, &outbound_tx, raw).await {
                    send_direct(&outbound_tx, response);
                }
            }
            Message::Binary(_) => {
                tracing::trace!(%connection_id, "ignoring binary frame");
            }
            Message::Pong(_) => {
                last_pong.store(Utc::now().timestamp(), Ordering::Relaxed);
            }
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }

    tracing::info!(%connection_id, "connection closed");
    state.subscriptions.remove_connection(connection_id).await;
    drop(outbound_tx);
    let _ = writer_task.await;
    state.governor.connection_closed();
    drop(permit);
}

/// Best-effort enqueue of a frame destined only for this connection (an ack
/// or an error reply, as opposed to a fan-out broadcast). A full queue here
/// means the connection is already unhealthy; the ping/pong path will close
/// it in time, so the frame is dropped rather than blocking the reader.
fn send_direct(outbound: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if outbound.try_send(message).is_err() {
        tracing::debug!("dropped outbound frame: connection queue full");
    }
}

/// A connection refused at admission control still completes the WebSocket
/// handshake (the refusal is a protocol-level message, not an HTTP rejection)
/// so the client can read a structured reason before the socket closes.
async fn reject(mut socket: WebSocket, code: ErrorCode, reason: &str) {
    let message = ServerMessage::error(code, reason);
    if let Ok(text) = serde_json::to_string(&message) {
        let _ = socket.send(Message::Text(text)).await;
    }
    let _ = socket.close().await;
}
