//! Connection Lifecycle Manager
//!
//! Owns every per-connection registry: handles, rooms, presence, rate
//! windows, typing timers and idle timers. The manager is driven by the hub
//! task only, so each operation runs to completion without interleaving
//! and cleanup of one connection is always observed as a whole.

use std::collections::{HashMap, HashSet};
use std::future::poll_fn;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::messages::{
    ConnectedPayload, PresencePayload, ServerEvent, ShutdownPayload, TypingPayload,
};
use super::presence::{OnlineUser, PresenceRegistry};
use super::rate_limiter::{RateDecision, RateLimiter};
use super::rooms::RoomTracker;
use super::session::{ConnectionHandle, DisconnectReason};
use super::timers::Timers;
use super::typing::{TypingKey, TypingRegistry};
use crate::config::GatewayLimits;
use crate::domain::{ConnectionId, Identity, Room};
use crate::infrastructure::metrics::{self, RegistrySizes};
use crate::shared::error::{CapacityScope, GatewayError};

/// Point-in-time sizes of the gateway registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub connections: usize,
    pub online_users: usize,
    pub rooms: usize,
    pub room_memberships: usize,
    pub typing_timers: usize,
    pub idle_timers: usize,
    pub rate_windows: usize,
}

impl GatewayStats {
    /// No state is held for any connection
    pub fn is_empty(&self) -> bool {
        *self == GatewayStats::default()
    }
}

/// Result of one heartbeat sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub removed: usize,
    pub stats: GatewayStats,
    pub warnings: Vec<String>,
}

/// A timer that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    Idle(ConnectionId),
    Typing(TypingKey),
}

pub struct ConnectionManager {
    limits: GatewayLimits,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    rooms: RoomTracker,
    presence: PresenceRegistry,
    rate_limiter: RateLimiter,
    typing: TypingRegistry,
    idle_timers: Timers<ConnectionId>,
}

impl ConnectionManager {
    pub fn new(limits: GatewayLimits) -> Self {
        Self {
            rate_limiter: RateLimiter::new(limits.rate_limit_window, limits.rate_limit_max_events),
            typing: TypingRegistry::new(limits.typing_timeout),
            limits,
            connections: HashMap::new(),
            rooms: RoomTracker::new(),
            presence: PresenceRegistry::new(),
            idle_timers: Timers::new(),
        }
    }

    pub fn limits(&self) -> &GatewayLimits {
        &self.limits
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Register an authenticated connection.
    ///
    /// On success the connection is in its role, user and crew rooms, has an
    /// idle timer, has been sent `connected`, and operators have been told
    /// the user is online. On rejection nothing is registered.
    pub fn admit(&mut self, handle: ConnectionHandle) -> Result<(), GatewayError> {
        if let Err(err) = self.check_capacity(&handle) {
            warn!(
                connection_id = %handle.id,
                user_id = %handle.identity.user_id,
                address = %handle.address,
                error = %err,
                "Connection rejected"
            );
            metrics::record_admission(err.code());
            return Err(err);
        }

        let id = handle.id;
        let identity = handle.identity.clone();

        let user_connections = self.presence.insert(id, &identity, handle.address);
        self.rooms.join(id, Room::Role(identity.role));
        self.rooms.join(id, Room::user(identity.user_id.clone()));
        if let Some(crew_id) = &identity.crew_id {
            self.rooms.join(id, Room::crew(crew_id.clone()));
        }
        self.idle_timers.arm(id, self.limits.idle_timeout);

        handle.send(Arc::new(ServerEvent::Connected(ConnectedPayload {
            connection_id: id,
            user_id: identity.user_id.clone(),
            role: identity.role,
            crew_id: identity.crew_id.clone(),
            timestamp: Utc::now(),
        })));
        self.connections.insert(id, handle);

        self.fan_out(
            &Room::operators(),
            ServerEvent::UserOnline(presence_payload(&identity, user_connections)),
            None,
        );

        info!(
            connection_id = %id,
            user_id = %identity.user_id,
            role = %identity.role,
            user_connections,
            "Connection admitted"
        );
        metrics::record_admission("admitted");
        self.refresh_gauges();
        Ok(())
    }

    fn check_capacity(&self, handle: &ConnectionHandle) -> Result<(), GatewayError> {
        if self.connections.contains_key(&handle.id) {
            return Err(GatewayError::InvalidPayload("connection already registered".into()));
        }
        if self.presence.user_connection_count(&handle.identity.user_id)
            >= self.limits.max_connections_per_user
        {
            return Err(GatewayError::CapacityExceeded(CapacityScope::User));
        }
        if self.presence.address_connection_count(&handle.address)
            >= self.limits.max_connections_per_address()
        {
            return Err(GatewayError::CapacityExceeded(CapacityScope::Address));
        }
        Ok(())
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove a connection and every piece of state tied to it.
    ///
    /// Safe to call any number of times; every step runs regardless of what
    /// earlier calls already removed. Returns `true` if a live connection
    /// was removed.
    pub fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let handle = self.connections.remove(&id);

        self.idle_timers.cancel(&id);
        self.rate_limiter.forget(&id);
        let typing_threads = self.typing.stop_all(&id);
        self.rooms.leave_all(&id);
        let departure = self.presence.remove(&id);

        let Some(handle) = handle else {
            return false;
        };

        match reason {
            DisconnectReason::ClientClosed => handle.release(),
            _ => handle.close(reason.close_code(), reason.close_message()),
        }

        for thread_id in typing_threads {
            self.broadcast_stopped_typing(&thread_id, &handle.identity.user_id, id);
        }

        if let Some(departure) = departure.filter(|d| d.went_offline()) {
            self.fan_out(
                &Room::operators(),
                ServerEvent::UserOffline(presence_payload(&departure.identity, 0)),
                None,
            );
        }

        info!(
            connection_id = %id,
            user_id = %handle.identity.user_id,
            reason = %reason,
            connected_for_secs = (Utc::now() - handle.connected_at).num_seconds(),
            "Connection removed"
        );
        metrics::record_disconnect(reason.as_str());
        self.refresh_gauges();
        true
    }

    // ========================================================================
    // Per-connection operations
    // ========================================================================

    fn require(&self, id: &ConnectionId) -> Result<&ConnectionHandle, GatewayError> {
        self.connections.get(id).ok_or(GatewayError::Unavailable)
    }

    /// Count an inbound event against the connection's rate window.
    pub fn check_rate(&mut self, id: ConnectionId) -> Result<RateDecision, GatewayError> {
        self.require(&id)?;
        let decision = self.rate_limiter.check_and_record(id);
        if !decision.allowed {
            debug!(connection_id = %id, count = decision.count, "Rate limit exceeded");
        }
        Ok(decision)
    }

    pub fn join(&mut self, id: ConnectionId, room: Room) -> Result<(), GatewayError> {
        self.require(&id)?;
        if self.rooms.join(id, room.clone()) {
            debug!(connection_id = %id, room = %room, "Joined room");
        }
        Ok(())
    }

    pub fn leave(&mut self, id: ConnectionId, room: &Room) -> bool {
        self.rooms.leave(&id, room)
    }

    /// Start or restart a typing indicator. The connection must be
    /// subscribed to the thread.
    pub fn start_typing(&mut self, id: ConnectionId, thread_id: &str) -> Result<(), GatewayError> {
        let user_id = self.require(&id)?.identity.user_id.clone();
        let room = Room::thread(thread_id);
        if !self.rooms.is_member(&id, &room) {
            return Err(GatewayError::NotSubscribed(thread_id.to_string()));
        }

        self.typing.start(TypingKey::new(id, thread_id));
        self.fan_out(
            &[room],
            ServerEvent::UserTyping(TypingPayload {
                thread_id: thread_id.to_string(),
                user_id,
                timestamp: Utc::now(),
            }),
            Some(id),
        );
        Ok(())
    }

    /// Stop a typing indicator. No-op when none is live.
    pub fn stop_typing(&mut self, id: ConnectionId, thread_id: &str) -> bool {
        if !self.typing.stop(&TypingKey::new(id, thread_id)) {
            return false;
        }
        if let Some(handle) = self.connections.get(&id) {
            let user_id = handle.identity.user_id.clone();
            self.broadcast_stopped_typing(thread_id, &user_id, id);
        }
        true
    }

    fn broadcast_stopped_typing(&self, thread_id: &str, user_id: &str, typist: ConnectionId) {
        self.fan_out(
            &[Room::thread(thread_id)],
            ServerEvent::UserStoppedTyping(TypingPayload {
                thread_id: thread_id.to_string(),
                user_id: user_id.to_string(),
                timestamp: Utc::now(),
            }),
            Some(typist),
        );
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Poll both timer queues. `Ready(None)` when no timer is armed.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> Poll<Option<Expiry>> {
        let idle = match self.idle_timers.poll_expired(cx) {
            Poll::Ready(Some(id)) => return Poll::Ready(Some(Expiry::Idle(id))),
            Poll::Ready(None) => true,
            Poll::Pending => false,
        };
        let typing = match self.typing.timers_mut().poll_expired(cx) {
            Poll::Ready(Some(key)) => return Poll::Ready(Some(Expiry::Typing(key))),
            Poll::Ready(None) => true,
            Poll::Pending => false,
        };
        if idle && typing {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }

    pub async fn next_expired(&mut self) -> Option<Expiry> {
        poll_fn(|cx| self.poll_expired(cx)).await
    }

    pub fn on_expired(&mut self, expiry: Expiry) {
        match expiry {
            Expiry::Idle(id) => {
                debug!(connection_id = %id, "Idle timeout");
                self.disconnect(id, DisconnectReason::IdleTimeout);
            }
            Expiry::Typing(key) => {
                if let Some(handle) = self.connections.get(&key.connection_id) {
                    let user_id = handle.identity.user_id.clone();
                    self.broadcast_stopped_typing(&key.thread_id, &user_id, key.connection_id);
                }
            }
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    /// Deliver an event to every member of the given rooms, once per
    /// connection, optionally skipping one connection. Returns the number of
    /// connections the event was queued for.
    pub fn fan_out(&self, rooms: &[Room], event: ServerEvent, except: Option<ConnectionId>) -> usize {
        let targets: HashSet<ConnectionId> = rooms
            .iter()
            .flat_map(|room| self.rooms.members(room))
            .copied()
            .filter(|id| Some(*id) != except)
            .collect();

        let event = Arc::new(event);
        targets
            .iter()
            .filter_map(|id| self.connections.get(id))
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    pub fn broadcast_all(&self, event: ServerEvent, except: Option<ConnectionId>) -> usize {
        let event = Arc::new(event);
        self.connections
            .values()
            .filter(|handle| Some(handle.id) != except)
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        self.connections
            .get(&id)
            .map(|handle| handle.send(Arc::new(event)))
            .unwrap_or(false)
    }

    // ========================================================================
    // Heartbeat and shutdown
    // ========================================================================

    /// Remove connections whose transport is gone and check registry sizes.
    pub fn sweep(&mut self) -> SweepReport {
        let dead: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|handle| handle.is_closed())
            .map(|handle| handle.id)
            .collect();

        for id in &dead {
            self.disconnect(*id, DisconnectReason::TransportLost);
        }

        let stats = self.stats();
        let thresholds = self.limits.leak_thresholds;
        let mut warnings = Vec::new();
        if stats.connections > thresholds.max_connections {
            warnings.push(format!(
                "connections {} exceed {}",
                stats.connections, thresholds.max_connections
            ));
        }
        if stats.rooms > thresholds.max_rooms {
            warnings.push(format!("rooms {} exceed {}", stats.rooms, thresholds.max_rooms));
        }
        if stats.typing_timers > thresholds.max_typing_timers {
            warnings.push(format!(
                "typing timers {} exceed {}",
                stats.typing_timers, thresholds.max_typing_timers
            ));
        }
        for warning in &warnings {
            warn!(warning = %warning, "Possible gateway state leak");
        }

        debug!(
            removed = dead.len(),
            connections = stats.connections,
            online_users = stats.online_users,
            rooms = stats.rooms,
            typing_timers = stats.typing_timers,
            idle_timers = stats.idle_timers,
            "Heartbeat sweep"
        );
        self.refresh_gauges();

        SweepReport {
            removed: dead.len(),
            stats,
            warnings,
        }
    }

    /// Notify and close every connection, then clear all state.
    ///
    /// Returns the number of connections that were open.
    pub fn shutdown(&mut self) -> usize {
        self.idle_timers.clear();
        self.typing.clear();

        let notice = Arc::new(ServerEvent::ServerShutdown(ShutdownPayload {
            message: "Server is shutting down".into(),
            timestamp: Utc::now(),
        }));
        let reason = DisconnectReason::Shutdown;
        for handle in self.connections.values() {
            handle.send(notice.clone());
            handle.close(reason.close_code(), reason.close_message());
        }

        let closed = self.connections.len();
        self.connections.clear();
        self.rooms.clear();
        self.presence.clear();
        self.rate_limiter.clear();

        info!(closed, "Gateway shut down");
        self.refresh_gauges();
        closed
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.connections.len(),
            online_users: self.presence.user_count(),
            rooms: self.rooms.room_count(),
            room_memberships: self.rooms.membership_count(),
            typing_timers: self.typing.len(),
            idle_timers: self.idle_timers.len(),
            rate_windows: self.rate_limiter.len(),
        }
    }

    pub fn connected_users(&self) -> Vec<OnlineUser> {
        self.presence.online_users()
    }

    pub fn crew_online(&self, crew_id: &str) -> Vec<OnlineUser> {
        self.presence.crew_members(crew_id)
    }

    #[cfg(test)]
    fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    #[cfg(test)]
    fn rooms_of(&self, id: &ConnectionId) -> Vec<Room> {
        self.rooms.rooms_of(id)
    }

    #[cfg(test)]
    fn is_typing(&self, id: ConnectionId, thread_id: &str) -> bool {
        self.typing.is_typing(&TypingKey::new(id, thread_id))
    }

    fn refresh_gauges(&self) {
        let stats = self.stats();
        metrics::set_registry_sizes(RegistrySizes {
            connections: stats.connections,
            online_users: stats.online_users,
            rooms: stats.rooms,
            typing_timers: stats.typing_timers,
            idle_timers: stats.idle_timers,
            rate_windows: stats.rate_windows,
        });
    }
}

fn presence_payload(identity: &Identity, connections: usize) -> PresencePayload {
    PresencePayload {
        user_id: identity.user_id.clone(),
        role: identity.role,
        crew_id: identity.crew_id.clone(),
        connections,
        timestamp: Utc::now(),
    }
}
