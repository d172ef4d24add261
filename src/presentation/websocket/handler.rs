//! WebSocket Connection Handler
//!
//! Accepts the upgrade, authenticates the handshake, registers the
//! connection with the gateway and runs the read loop. The write half is
//! driven by a separate task fed from the connection's outbound queue.
//!
//! The socket loop only sees a `Sink`/`Stream` pair, so it runs the same
//! over an axum socket or an in-memory channel.

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::events::{process_frame, EventContext};
use super::gateway::Gateway;
use super::messages::{
    Outbound, ServerEvent, CLOSE_AUTH_FAILED, CLOSE_CAPACITY_EXCEEDED, CLOSE_SERVER_SHUTDOWN,
};
use super::session::{ConnectionHandle, DisconnectReason, SessionState};
use crate::application::Authenticator;
use crate::config::GatewaySettings;
use crate::domain::{ConnectionId, MessageStore};
use crate::infrastructure::metrics;
use crate::shared::error::GatewayError;
use crate::startup::AppState;

/// How long the writer may take to flush a final close frame
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

/// Deadlines applied to one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketTimeouts {
    /// Bound on token verification and user lookup
    pub handshake: Duration,
    /// Interval between server pings and liveness checks
    pub ping_interval: Duration,
    /// Silence after which the peer is considered gone
    pub heartbeat: Duration,
}

impl SocketTimeouts {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            handshake: settings.handshake_timeout(),
            ping_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            heartbeat: settings.heartbeat_timeout(),
        }
    }
}

impl Default for SocketTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            heartbeat: Duration::from_secs(90),
        }
    }
}

/// Services a socket task uses.
#[derive(Clone)]
pub struct SocketContext {
    pub gateway: Gateway,
    pub authenticator: Arc<Authenticator>,
    pub message_store: Arc<dyn MessageStore>,
    pub timeouts: SocketTimeouts,
}

impl SocketContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            gateway: state.gateway.clone(),
            authenticator: state.authenticator.clone(),
            message_store: state.message_store.clone(),
            timeouts: SocketTimeouts::from_settings(&state.settings.gateway),
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> Response {
    let token = query.token.or_else(|| bearer_token(&headers));
    let address = client_address(&headers, peer.ip(), state.settings.gateway.trust_proxy_headers);
    let ctx = SocketContext::from_state(&state);

    ws.max_message_size(state.settings.websocket.max_message_size)
        .max_frame_size(state.settings.websocket.max_frame_size)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            serve_socket(sink, stream, ctx, token, address).await;
        })
}

/// Run one connection from handshake to cleanup.
///
/// Every exit after a successful admission goes through
/// [`Gateway::disconnect`].
pub async fn serve_socket<W, R, E>(
    sink: W,
    mut stream: R,
    ctx: SocketContext,
    token: Option<String>,
    address: IpAddr,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = ConnectionId::new();
    let mut session = SessionState::new(connection_id);
    let timeouts = ctx.timeouts;

    tracing::debug!(connection_id = %connection_id, address = %address, "New WebSocket connection");

    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = spawn_writer(sink, rx, timeouts.ping_interval);

    // Authenticate within the handshake deadline
    let authenticated = timeout(
        timeouts.handshake,
        ctx.authenticator.authenticate(token.as_deref()),
    )
    .await
    .unwrap_or(Err(GatewayError::HandshakeTimeout));

    let identity = match authenticated {
        Ok(identity) => identity,
        Err(err) => {
            tracing::debug!(connection_id = %connection_id, error = %err, "Handshake rejected");
            metrics::record_admission(err.code());
            reject(tx, writer, &err).await;
            return;
        }
    };

    let cancel = CancellationToken::new();
    let handle = ConnectionHandle::new(
        connection_id,
        identity.clone(),
        address,
        tx.clone(),
        cancel.clone(),
    );

    if let Err(err) = ctx.gateway.admit(handle).await {
        reject(tx, writer, &err).await;
        return;
    }
    session.authenticate(identity);

    let events = EventContext {
        connection_id,
        gateway: &ctx.gateway,
        store: ctx.message_store.as_ref(),
    };

    let mut reason = DisconnectReason::ClientClosed;
    let mut last_seen = Instant::now();
    let mut liveness = interval_at(last_seen + timeouts.ping_interval, timeouts.ping_interval);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Main message loop
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(connection_id = %connection_id, "Connection released by gateway");
                break;
            }
            _ = liveness.tick() => {
                if last_seen.elapsed() > timeouts.heartbeat {
                    tracing::info!(
                        connection_id = %connection_id,
                        silent_secs = last_seen.elapsed().as_secs(),
                        "Heartbeat timeout, closing connection"
                    );
                    reason = DisconnectReason::TransportLost;
                    break;
                }
            }
            frame = stream.next() => {
                if matches!(frame, Some(Ok(_))) {
                    last_seen = Instant::now();
                }
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = process_frame(&events, &mut session, text.as_str()).await {
                            tracing::debug!(
                                connection_id = %connection_id,
                                error = %err,
                                "Event failed"
                            );
                            let _ = tx.send(Outbound::event(ServerEvent::error(&err)));
                            if err.is_fatal() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(connection_id = %connection_id, "Connection closed");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pings are answered by axum; pongs only refresh liveness
                    }
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                        reason = DisconnectReason::TransportLost;
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    ctx.gateway.disconnect(connection_id, reason);
    drop(tx);
    if timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Writer did not drain in time");
    }

    tracing::info!(
        connection_id = %connection_id,
        reason = %reason,
        events = session.events_handled(),
        "WebSocket session ended"
    );
}

/// Forward queued items to the socket until a close frame or a send error,
/// pinging the peer on a fixed interval.
fn spawn_writer<S>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    ping_interval: Duration,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let message = tokio::select! {
                item = rx.recv() => match item {
                    Some(Outbound::Event(event)) => match serde_json::to_string(event.as_ref()) {
                        Ok(text) => Message::Text(text.into()),
                        Err(e) => {
                            tracing::error!("Failed to serialize event: {}", e);
                            continue;
                        }
                    },
                    Some(Outbound::Close(frame)) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code: frame.code,
                                reason: frame.reason.into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                },
                _ = ping.tick() => Message::Ping(Bytes::new()),
            };

            if sink.send(message).await.is_err() {
                break;
            }
        }
    })
}

/// Report a handshake failure and close the transport.
async fn reject(tx: mpsc::UnboundedSender<Outbound>, writer: JoinHandle<()>, err: &GatewayError) {
    let code = match err {
        GatewayError::CapacityExceeded(_) => CLOSE_CAPACITY_EXCEEDED,
        GatewayError::Unavailable => CLOSE_SERVER_SHUTDOWN,
        _ => CLOSE_AUTH_FAILED,
    };
    let _ = tx.send(Outbound::event(ServerEvent::error(err)));
    let _ = tx.send(Outbound::close(code, err.to_string()));
    drop(tx);
    let _ = timeout(WRITER_DRAIN_TIMEOUT, writer).await;
}

/// Token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Remote address used for the per-address cap.
///
/// Forwarding headers are only honoured when the gateway sits behind a
/// trusted proxy.
pub fn client_address(headers: &HeaderMap, peer: IpAddr, trust_proxy_headers: bool) -> IpAddr {
    if !trust_proxy_headers {
        return peer;
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok())
        })
        .unwrap_or(peer)
}
