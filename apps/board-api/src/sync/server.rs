//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::tokens::verify_join_token;
use crate::error::SyncError;
use crate::oracle::Position;
use crate::AppState;

use super::connection::Connection;
use super::events::{
    AuthorizePayload, ClientMessage, EventName, HeartbeatPayload, JoinPayload, LoadPayload,
    MovePayload, NavPayload, SyncMessage, CLOSE_AUTH_FAILED, CLOSE_NOT_AUTHENTICATED,
    CLOSE_SESSION_TIMEOUT, CLOSE_UNKNOWN_ERROR, CLOSE_UNKNOWN_OPCODE, OP_AUTHORIZE, OP_HEARTBEAT,
    OP_JOIN, OP_LOAD, OP_MOVE, OP_NAV,
};
use super::room::{Outbound, Room};
use super::roster::Participant;

/// Heartbeat interval advertised to clients in the BOOTSTRAP payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Timeout for receiving JOIN after connection (seconds).
const JOIN_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/sync", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: wait for JOIN within the handshake timeout.
    let join_result = time::timeout(Duration::from_secs(JOIN_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during join");
                    return Err("read error");
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("client closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => {
                    let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                    return Err("invalid json");
                }
            };

            if client_msg.op != OP_JOIN {
                let _ = send_close(&mut ws_tx, CLOSE_NOT_AUTHENTICATED, "Expected JOIN").await;
                return Err("expected join");
            }

            let payload: JoinPayload =
                serde_json::from_value(client_msg.d).map_err(|_| "invalid join payload")?;
            return Ok(payload);
        }
        Err("connection closed before join")
    })
    .await;

    let payload = match join_result {
        Ok(Ok(payload)) => payload,
        Ok(Err(reason)) => {
            tracing::debug!(%reason, "join handshake failed");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: validate the join token against the requested room.
    let claims = match verify_join_token(
        &state.config.join_token_secret,
        &payload.token,
        &payload.room_key,
    ) {
        Ok(claims) => claims,
        Err(reason) => {
            tracing::debug!(%reason, room_key = %payload.room_key, "join token rejected");
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, reason).await;
            return;
        }
    };

    // Step 3: attach to the room. Bootstrap lands in the outbox before any
    // later commit, so the event loop can simply drain in order.
    let connection_id = liveboard_common::id::prefixed_ulid(liveboard_common::id::prefix::CONNECTION);
    let conn = Arc::new(Connection::new(
        connection_id.clone(),
        claims.sub,
        claims.name,
        claims.role,
        payload.room_key.clone(),
    ));
    let participant = Participant::new(
        conn.connection_id.clone(),
        conn.user_id.clone(),
        conn.display_name.clone(),
        conn.role,
    );
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let room = state
        .rooms
        .join(
            &payload.room_key,
            participant,
            payload.start_position.map(Position::new),
            outbox_tx,
        )
        .await;

    tracing::info!(
        room_key = %conn.room_key,
        connection_id = %conn.connection_id,
        user_id = %conn.user_id,
        role = ?conn.role,
        "participant joined"
    );

    run_session(conn.clone(), room, ws_tx, ws_rx, outbox_rx).await;

    // Step 4: surface the disconnect as Leave (evicts the room when empty).
    state.rooms.leave(&conn.room_key, &conn.connection_id).await;

    tracing::info!(
        room_key = %conn.room_key,
        connection_id = %conn.connection_id,
        "participant left"
    );
}

/// Main session event loop: handle client requests, drain the outbox,
/// enforce the heartbeat deadline.
async fn run_session(
    conn: Arc<Connection>,
    room: Arc<Room>,
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut ws_rx: futures_util::stream::SplitStream<WebSocket>,
    mut outbox_rx: mpsc::UnboundedReceiver<Outbound>,
) {
    // Client must heartbeat within 1.5× the advertised interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid JSON").await;
                                break;
                            }
                        };

                        if !handle_client_op(&conn, &room, &mut ws_tx, client_msg, &mut got_heartbeat).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %conn.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Committed room event queued for this connection.
            out = outbox_rx.recv() => {
                match out {
                    Some(ev) => {
                        let msg = SyncMessage::dispatch(ev.event, conn.next_seq(), ev.data);
                        let json = serde_json::to_string(&msg).unwrap();
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(
                        connection_id = %conn.connection_id,
                        "heartbeat timeout, closing connection"
                    );
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Dispatch one client opcode. Returns `false` when the connection should
/// close.
async fn handle_client_op(
    conn: &Arc<Connection>,
    room: &Arc<Room>,
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    client_msg: ClientMessage,
    got_heartbeat: &mut bool,
) -> bool {
    match client_msg.op {
        OP_HEARTBEAT => {
            *got_heartbeat = true;
            let payload: HeartbeatPayload =
                serde_json::from_value(client_msg.d).unwrap_or(HeartbeatPayload { seq: 0 });
            let ack = SyncMessage::heartbeat_ack(payload.seq);
            let json = serde_json::to_string(&ack).unwrap();
            ws_tx.send(Message::Text(json.into())).await.is_ok()
        }
        OP_MOVE => {
            let payload: MovePayload = match serde_json::from_value(client_msg.d) {
                Ok(p) => p,
                Err(_) => {
                    let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid move payload").await;
                    return false;
                }
            };
            match room
                .apply_move(&conn.connection_id, payload.from_index, &payload.mv)
                .await
            {
                Ok(()) => true,
                Err(err) => send_rejection(ws_tx, conn, EventName::MOVE_REJECTED, &err).await,
            }
        }
        OP_NAV => {
            let payload: NavPayload = match serde_json::from_value(client_msg.d) {
                Ok(p) => p,
                Err(_) => {
                    let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid nav payload").await;
                    return false;
                }
            };
            match room.navigate(&conn.connection_id, payload.target_index).await {
                Ok(()) => true,
                Err(err) => send_rejection(ws_tx, conn, EventName::REQUEST_REJECTED, &err).await,
            }
        }
        OP_AUTHORIZE => {
            let payload: AuthorizePayload = match serde_json::from_value(client_msg.d) {
                Ok(p) => p,
                Err(_) => {
                    let _ =
                        send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid authorize payload").await;
                    return false;
                }
            };
            match room
                .authorize(
                    &conn.connection_id,
                    &payload.target_connection_id,
                    payload.grant,
                )
                .await
            {
                Ok(()) => true,
                Err(err) => send_rejection(ws_tx, conn, EventName::REQUEST_REJECTED, &err).await,
            }
        }
        OP_LOAD => {
            let payload: LoadPayload = match serde_json::from_value(client_msg.d) {
                Ok(p) => p,
                Err(_) => {
                    let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Invalid load payload").await;
                    return false;
                }
            };
            match room.load(&conn.connection_id, &payload.text).await {
                Ok(()) => true,
                Err(err) => send_rejection(ws_tx, conn, EventName::REQUEST_REJECTED, &err).await,
            }
        }
        OP_JOIN => {
            // Already joined.
            let _ = send_close(ws_tx, CLOSE_UNKNOWN_ERROR, "Already joined").await;
            false
        }
        _ => {
            let _ = send_close(ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
            false
        }
    }
}

/// Unicast a rejection to the requester. Returns `false` if the socket died.
async fn send_rejection(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    conn: &Arc<Connection>,
    event: &str,
    err: &SyncError,
) -> bool {
    let msg = SyncMessage::dispatch(
        event,
        conn.next_seq(),
        serde_json::json!({
            "code": err.code(),
            "reason": err.to_string(),
        }),
    );
    let json = serde_json::to_string(&msg).unwrap();
    ws_tx.send(Message::Text(json.into())).await.is_ok()
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
