//! WebSocket Session Management
//!
//! [`SessionState`] is owned by the socket task and tracks the handshake
//! phase. [`ConnectionHandle`] is the gateway's view of the same connection:
//! identity, address and the outbound queue.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::messages::{
    Outbound, ServerEvent, CLOSE_IDLE_TIMEOUT, CLOSE_NORMAL, CLOSE_SERVER_SHUTDOWN,
    CLOSE_TRANSPORT_LOST,
};
use crate::domain::{ConnectionId, Identity};
use crate::shared::error::GatewayError;

/// Phase of a connection's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Transport accepted, identity not yet established
    Unauthenticated,
    /// Authenticated and waiting for the next event
    Idle,
    /// Handling an inbound event
    Processing,
}

/// WebSocket session state
#[derive(Debug)]
pub struct SessionState {
    pub connection_id: ConnectionId,
    pub opened_at: Instant,
    phase: SessionPhase,
    identity: Option<Identity>,
    events_handled: u64,
}

impl SessionState {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            opened_at: Instant::now(),
            phase: SessionPhase::Unauthenticated,
            identity: None,
            events_handled: 0,
        }
    }

    pub fn authenticate(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.phase = SessionPhase::Idle;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Enter `Processing`. Events are only accepted from `Idle`.
    pub fn begin(&mut self) -> Result<Identity, GatewayError> {
        match (self.phase, &self.identity) {
            (SessionPhase::Idle, Some(identity)) => {
                self.phase = SessionPhase::Processing;
                Ok(identity.clone())
            }
            (SessionPhase::Unauthenticated, _) | (_, None) => Err(GatewayError::MissingToken),
            (SessionPhase::Processing, _) => Err(GatewayError::InvalidPayload(
                "previous event still in progress".into(),
            )),
        }
    }

    /// Return to `Idle` after handling an event, whatever its outcome.
    pub fn finish(&mut self) {
        if self.phase == SessionPhase::Processing {
            self.phase = SessionPhase::Idle;
            self.events_handled += 1;
        }
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled
    }
}

/// Why a connection is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client closed the transport or the read loop ended
    ClientClosed,
    /// The heartbeat sweep found the transport gone
    TransportLost,
    /// The idle deadline passed
    IdleTimeout,
    /// The gateway is shutting down
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::TransportLost => "transport_lost",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::Shutdown => "shutdown",
        }
    }

    pub fn close_code(&self) -> u16 {
        match self {
            DisconnectReason::ClientClosed => CLOSE_NORMAL,
            DisconnectReason::TransportLost => CLOSE_TRANSPORT_LOST,
            DisconnectReason::IdleTimeout => CLOSE_IDLE_TIMEOUT,
            DisconnectReason::Shutdown => CLOSE_SERVER_SHUTDOWN,
        }
    }

    pub fn close_message(&self) -> &'static str {
        match self {
            DisconnectReason::ClientClosed => "Connection closed",
            DisconnectReason::TransportLost => "Connection lost",
            DisconnectReason::IdleTimeout => "Idle timeout",
            DisconnectReason::Shutdown => "Server shutting down",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered connection as seen by the gateway.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    pub address: IpAddr,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        address: IpAddr,
        sender: mpsc::UnboundedSender<Outbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            identity,
            address,
            connected_at: Utc::now(),
            sender,
            cancel,
        }
    }

    /// Queue an event. Returns `false` when the writer has gone away.
    pub fn send(&self, event: Arc<ServerEvent>) -> bool {
        self.sender.send(Outbound::Event(event)).is_ok()
    }

    /// Queue a close frame and stop the connection's read loop.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.send(Outbound::close(code, reason));
        self.cancel.cancel();
    }

    /// Stop the read loop without a close frame.
    pub fn release(&self) {
        self.cancel.cancel();
    }

    /// Whether the transport is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed() || self.cancel.is_cancelled()
    }
}
