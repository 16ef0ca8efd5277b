//! Connection State Machine (C6, spec.md §4.6): the per-connection
//! lifecycle every endpoint shares. `connecting -> authenticating ->
//! established -> closing -> closed`, with `heartbeat`/`subscribe`/
//! `unsubscribe` always handled here and never delegated.
//!
//! Grounded on the teacher's `websocket::chat-server` example: split the
//! socket into a receive stream and a send sink, forward a bounded mpsc
//! channel into the sink on its own task, and drive the receive stream on
//! the caller's task. Generalized with the handshake, rate-limit, and
//! built-in message handling the specification requires.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::http::HeaderMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::channel::{self, ChannelAccessContext};
use super::connection::{AuthPhase, Connection, ConnectionState};
use super::endpoint::{Endpoint, GatewayContext};
use super::message::{ClientMessage, CloseCode, ServerMessage};
use crate::auth::verifier::{extract_token, AuthVerifier, HandshakeRequest};
use crate::auth::Principal;
use crate::error::Error;

/// How small a connection's lifetime has to be to count as "very
/// short-lived" for metrics purposes (spec.md §4.9).
const VERY_SHORT_LIVED_THRESHOLD: chrono::Duration = chrono::Duration::milliseconds(500);

/// Outbound channel capacity between the receive loop (and any endpoint
/// broadcast) and the socket's send half.
const SEND_CHANNEL_CAPACITY: usize = 128;

/// Drive one upgraded WebSocket connection end to end: handshake,
/// authenticate, register, dispatch frames, and clean up on close.
pub async fn run_connection(
    socket: WebSocket,
    headers: HeaderMap,
    query: String,
    subprotocol: Option<String>,
    endpoint: Arc<dyn Endpoint>,
    ctx: GatewayContext,
    auth: Arc<AuthVerifier>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_CHANNEL_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let config = endpoint.config().clone();

    // --- authenticating ---
    let handshake_req = HandshakeRequest {
        headers: &headers,
        query: query.as_str(),
        subprotocol: subprotocol.as_deref(),
    };
    let token = extract_token(config.auth_mode, &handshake_req);

    let auth_future = async move {
        match token {
            Some((token, _source)) => auth.verify(&token).await.unwrap_or(Principal::Anonymous),
            None => Principal::Anonymous,
        }
    };

    let principal = tokio::select! {
        principal = auth_future => principal,
        maybe_frame = ws_receiver.next() => {
            // The client disconnected (or sent something) before the
            // handshake finished; per spec.md §4.2 this is counted
            // separately and short-circuits the rest of the handshake.
            tracing::debug!(?maybe_frame, "connection interrupted during authentication");
            ctx.metrics.auth_interrupted();
            let _ = tx.send(Message::Close(None)).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let authenticated = principal.is_authenticated();
    if config.auth_required && !authenticated && config.public_channels.is_empty() {
        let err = Error::Auth("authentication required".to_string());
        let _ = tx.send(Message::Text(err.to_frame(None).to_json().into())).await;
        let _ = tx
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Unauthorized.as_u16(),
                reason: CloseCode::Unauthorized.reason().into(),
            })))
            .await;
        drop(tx);
        let _ = send_task.await;
        return;
    }

    // auth_phase is marked completed before any subscribe/data frame is
    // accepted (spec.md §4.2).
    let ceiling = config.resolved_rate_limit(&ctx.rate_limit_defaults);
    let heartbeat_interval = config.resolved_heartbeat_interval(&ctx.heartbeat_defaults);
    let heartbeat_timeout = config.resolved_heartbeat_timeout(&ctx.heartbeat_defaults);
    let conn = Arc::new(
        Connection::with_principal(tx.clone(), ceiling, principal).with_heartbeat_timing(heartbeat_interval, heartbeat_timeout),
    );
    conn.set_auth_phase(AuthPhase::Completed);
    conn.set_state(ConnectionState::Established);

    ctx.clients.insert(conn.clone());
    ctx.metrics.connection_opened();
    if authenticated {
        ctx.metrics.mark_authenticated();
    }

    let user_json = match &conn.principal {
        Principal::Identified { wallet_id, role } => {
            Some(serde_json::json!({ "walletId": wallet_id, "role": role }))
        }
        Principal::Anonymous => None,
    };
    let _ = conn
        .send_text(ServerMessage::welcome(&conn.id, serde_json::json!({"heartbeat": true, "subscribe": true})).to_json())
        .await;
    let _ = conn
        .send_text(ServerMessage::connection_established(&conn.id, authenticated, user_json).to_json())
        .await;

    if let Err(e) = endpoint.on_connection(&ctx, &conn).await {
        tracing::warn!(connection_id = %conn.id, error = %e, "on_connection hook failed");
        ctx.metrics.error();
    }

    let access_ctx = ChannelAccessContext {
        auth_required: config.auth_required,
    };
    let shutdown = conn.shutdown_token();

    // --- established: dispatch loop ---
    loop {
        tokio::select! {
            // Torn down by an external signal (currently only the
            // heartbeat sweep, §4.3) rather than by anything read from
            // the socket. A close frame was already queued by whoever
            // called `request_close`; an unresponsive client would
            // otherwise never free its registry entry.
            _ = shutdown.cancelled() => {
                tracing::debug!(connection_id = %conn.id, "connection torn down by external shutdown signal");
                break;
            }
            frame = ws_receiver.next() => {
                let Some(frame) = frame else { break };

                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        // axum surfaces an oversize frame (beyond `ws.max_message_size`,
                        // set from `config.max_payload_bytes` in transport.rs) as a
                        // receive error here, not as a decodable frame. Treat any
                        // receive error as a protocol fault: spec.md §8 requires
                        // `invalid_message` + close 1003 for oversize frames.
                        tracing::debug!(connection_id = %conn.id, error = %e, "websocket receive error");
                        let err = Error::Protocol(format!("frame receive error: {e}"));
                        send_error(&conn, &err, None).await;
                        ctx.metrics.error();
                        close_connection(&conn, CloseCode::UnsupportedData).await;
                        break;
                    }
                };

                match frame {
                    Message::Close(_) => break,
                    Message::Ping(data) => {
                        conn.touch();
                        let _ = conn.send(Message::Pong(data)).await;
                    }
                    Message::Pong(_) => {
                        conn.touch();
                    }
                    Message::Binary(_) => {
                        let err = Error::Protocol("binary frames are not supported".to_string());
                        send_error(&conn, &err, None).await;
                        ctx.metrics.error();
                    }
                    Message::Text(text) => {
                        ctx.metrics.message_in();

                        if !conn.try_consume_budget() {
                            ctx.metrics.rate_limit_breach();
                            send_error(&conn, &Error::RateLimited, None).await;
                            close_connection(&conn, CloseCode::PolicyViolation).await;
                            break;
                        }
                        conn.touch();

                        match ClientMessage::parse(&text) {
                            Ok(message) => {
                                let started = std::time::Instant::now();
                                let flow = handle_message(&endpoint, &ctx, &conn, &access_ctx, message).await;
                                ctx.metrics.handler_latency.record(started.elapsed().as_micros() as u64);
                                if flow.is_break() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let err = Error::Protocol(format!("invalid json: {e}"));
                                send_error(&conn, &err, None).await;
                                ctx.metrics.error();
                                close_connection(&conn, CloseCode::UnsupportedData).await;
                                break;
                            }
                        }
                    }
                    // axum's `Message` is `#[non_exhaustive]`; any frame kind
                    // this engine doesn't interpret (e.g. a raw protocol frame)
                    // is simply ignored.
                    _ => {}
                }
            }
        }
    }

    // --- closing -> closed ---
    conn.set_state(ConnectionState::Closing);
    ctx.clients.remove(&conn.id, &ctx.channels, &ctx.metrics);
    endpoint.on_close(&ctx, &conn).await;
    conn.set_state(ConnectionState::Closed);

    if chrono::Utc::now() - conn.connected_at < VERY_SHORT_LIVED_THRESHOLD {
        ctx.metrics.very_short_lived_connection();
    }

    drop(conn);
    send_task.abort();
}

enum Flow {
    Continue,
    Break,
}

impl Flow {
    fn is_break(&self) -> bool {
        matches!(self, Flow::Break)
    }
}

/// Handle one decoded frame once past rate limiting. `subscribe`,
/// `unsubscribe` and `heartbeat` are always handled here; every other
/// type is delegated to the endpoint specialization (spec.md §4.6).
async fn handle_message(
    endpoint: &Arc<dyn Endpoint>,
    ctx: &GatewayContext,
    conn: &Arc<Connection>,
    access_ctx: &ChannelAccessContext,
    message: ClientMessage,
) -> Flow {
    match message.kind.as_str() {
        "heartbeat" => {
            let _ = conn.send_text(ServerMessage::heartbeat_ack().to_json()).await;
            Flow::Continue
        }
        "subscribe" => {
            handle_subscribe(endpoint, ctx, conn, access_ctx, message).await;
            Flow::Continue
        }
        "unsubscribe" => {
            handle_unsubscribe(endpoint, ctx, conn, message).await;
            Flow::Continue
        }
        _ => {
            match endpoint.on_message(ctx, conn, message).await {
                Ok(Some(response)) => {
                    let _ = conn.send_text(response.to_json()).await;
                    ctx.metrics.message_out();
                }
                Ok(None) => {}
                Err(e) => {
                    // Endpoint handler failure: translate to a frame,
                    // never close the connection (spec.md §4.8).
                    tracing::warn!(connection_id = %conn.id, error = %e, "endpoint handler error");
                    ctx.metrics.error();
                    send_error(conn, &e, None).await;
                }
            }
            Flow::Continue
        }
    }
}

async fn handle_subscribe(
    endpoint: &Arc<dyn Endpoint>,
    ctx: &GatewayContext,
    conn: &Arc<Connection>,
    access_ctx: &ChannelAccessContext,
    message: ClientMessage,
) {
    let Some(channel_name) = message.channel.clone() else {
        send_error(conn, &Error::Protocol("subscribe requires a channel".to_string()), message.request_id).await;
        return;
    };

    if !channel::is_allowed(&channel_name, &conn.principal, *access_ctx) {
        send_error(
            conn,
            &Error::Authorization("You do not have access to this channel".to_string()),
            message.request_id,
        )
        .await;
        return;
    }

    // Confirmation is sent before registering with the router so it is
    // always delivered ahead of any subsequent broadcast on this
    // channel to this connection (spec.md §4.5 ordering guarantee).
    let _ = conn
        .send_text(ServerMessage::subscription_confirmed(channel_name.clone()).to_json())
        .await;

    ctx.channels.subscribe(&channel_name, conn.clone());
    conn.add_subscription(channel_name.clone());
    ctx.metrics.channel_subscriber_inc(&channel_name);

    endpoint.on_subscribe(ctx, conn, &channel_name).await;
}

async fn handle_unsubscribe(endpoint: &Arc<dyn Endpoint>, ctx: &GatewayContext, conn: &Arc<Connection>, message: ClientMessage) {
    let Some(channel_name) = message.channel.clone() else {
        send_error(conn, &Error::Protocol("unsubscribe requires a channel".to_string()), message.request_id).await;
        return;
    };

    ctx.channels.unsubscribe(&channel_name, &conn.id);
    conn.remove_subscription(&channel_name);
    ctx.metrics.channel_subscriber_dec(&channel_name);

    let _ = conn
        .send_text(ServerMessage::unsubscription_confirmed(channel_name.clone()).to_json())
        .await;

    endpoint.on_unsubscribe(ctx, conn, &channel_name).await;
}

async fn send_error(conn: &Connection, err: &Error, request_id: Option<String>) {
    let _ = conn.send_text(err.to_frame(request_id).to_json()).await;
}

async fn close_connection(conn: &Connection, code: CloseCode) {
    let _ = conn
        .send(Message::Close(Some(CloseFrame {
            code: code.as_u16(),
            reason: code.reason().into(),
        })))
        .await;
}
