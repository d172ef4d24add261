//! WebSocket Gateway
//!
//! Cloneable handle to the hub task. Socket tasks use it to register and
//! remove connections; other subsystems use it as the broadcast API to push
//! events into rooms.

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::hub::{Command, Reply};
use super::manager::{GatewayStats, SweepReport};
use super::messages::{
    AnalyticsPayload, JobUpdatePayload, ServerEvent, ThreadMessagePayload, DEFAULT_DASHBOARD,
};
use super::presence::OnlineUser;
use super::rate_limiter::RateDecision;
use super::session::{ConnectionHandle, DisconnectReason};
use crate::domain::{ConnectionId, Role, Room, ThreadMessage};
use crate::shared::error::GatewayError;

/// Handle to the gateway hub
#[derive(Clone)]
pub struct Gateway {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
}

impl Gateway {
    pub(crate) fn new(commands: mpsc::UnboundedSender<Command>, shutdown: CancellationToken) -> Self {
        Self { commands, shutdown }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Gateway hub is not running, command dropped");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, GatewayError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| GatewayError::Unavailable)?;
        response.await.map_err(|_| GatewayError::Unavailable)
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Register an authenticated connection, enforcing the capacity limits.
    pub async fn admit(&self, handle: ConnectionHandle) -> Result<(), GatewayError> {
        self.request(|reply| Command::Admit { handle, reply }).await?
    }

    /// Remove a connection. Idempotent.
    pub fn disconnect(&self, connection_id: ConnectionId, reason: DisconnectReason) {
        self.send(Command::Disconnect {
            connection_id,
            reason,
        });
    }

    pub async fn check_rate(&self, connection_id: ConnectionId) -> Result<RateDecision, GatewayError> {
        self.request(|reply| Command::CheckRate {
            connection_id,
            reply,
        })
        .await?
    }

    pub async fn join(&self, connection_id: ConnectionId, room: Room) -> Result<(), GatewayError> {
        self.request(|reply| Command::Join {
            connection_id,
            room,
            reply,
        })
        .await?
    }

    pub fn leave(&self, connection_id: ConnectionId, room: Room) {
        self.send(Command::Leave {
            connection_id,
            room,
        });
    }

    pub async fn start_typing(
        &self,
        connection_id: ConnectionId,
        thread_id: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let thread_id = thread_id.into();
        self.request(|reply| Command::StartTyping {
            connection_id,
            thread_id,
            reply,
        })
        .await?
    }

    pub fn stop_typing(&self, connection_id: ConnectionId, thread_id: impl Into<String>) {
        self.send(Command::StopTyping {
            connection_id,
            thread_id: thread_id.into(),
        });
    }

    // ========================================================================
    // Broadcast API
    // ========================================================================

    /// Deliver an event to the members of several rooms, once per connection.
    pub fn emit_to_rooms(&self, rooms: Vec<Room>, event: ServerEvent, except: Option<ConnectionId>) {
        self.send(Command::Emit {
            rooms,
            event,
            except,
        });
    }

    pub fn emit_to_room(&self, room: Room, event: ServerEvent) {
        self.emit_to_rooms(vec![room], event, None);
    }

    pub fn emit_to_user(&self, user_id: impl Into<String>, event: ServerEvent) {
        self.emit_to_room(Room::user(user_id), event);
    }

    pub fn emit_to_crew(&self, crew_id: impl Into<String>, event: ServerEvent) {
        self.emit_to_room(Room::crew(crew_id), event);
    }

    pub fn emit_to_role(&self, role: Role, event: ServerEvent) {
        self.emit_to_room(Room::Role(role), event);
    }

    pub fn emit_to_job(&self, job_id: impl Into<String>, event: ServerEvent) {
        self.emit_to_room(Room::job(job_id), event);
    }

    pub fn emit_to_thread(&self, thread_id: impl Into<String>, event: ServerEvent) {
        self.emit_to_room(Room::thread(thread_id), event);
    }

    pub fn emit_to_analytics(&self, dashboard: impl Into<String>, event: ServerEvent) {
        self.emit_to_room(Room::analytics(dashboard), event);
    }

    /// Send to the supervising roles (admin, super admin, dispatcher).
    pub fn emit_to_operators(&self, event: ServerEvent, except: Option<ConnectionId>) {
        self.emit_to_rooms(Room::operators(), event, except);
    }

    pub fn emit_to_all(&self, event: ServerEvent, except: Option<ConnectionId>) {
        self.send(Command::EmitAll { event, except });
    }

    pub fn send_to(&self, connection_id: ConnectionId, event: ServerEvent) {
        self.send(Command::SendTo {
            connection_id,
            event,
        });
    }

    /// A job changed: notify its subscribers, the assigned crew and the
    /// operators.
    pub fn job_updated(&self, job_id: impl Into<String>, crew_id: Option<&str>, data: Value) {
        let job_id = job_id.into();
        let event = ServerEvent::JobUpdate(JobUpdatePayload {
            job_id: job_id.clone(),
            data,
            timestamp: Utc::now(),
        });
        let mut rooms = vec![Room::job(job_id)];
        rooms.extend(crew_id.map(Room::crew));
        rooms.extend(Room::operators());
        self.emit_to_rooms(rooms, event, None);
    }

    pub fn analytics_updated(&self, dashboard: Option<&str>, data: Value) {
        let dashboard = dashboard.unwrap_or(DEFAULT_DASHBOARD).to_string();
        let event = ServerEvent::AnalyticsUpdate(AnalyticsPayload {
            dashboard: Some(dashboard.clone()),
            data,
            timestamp: Utc::now(),
        });
        self.emit_to_analytics(dashboard, event);
    }

    /// Live metrics go to every dashboard subscriber of the default board.
    pub fn metrics_updated(&self, data: Value) {
        let event = ServerEvent::MetricsUpdate(AnalyticsPayload {
            dashboard: Some(DEFAULT_DASHBOARD.to_string()),
            data,
            timestamp: Utc::now(),
        });
        self.emit_to_analytics(DEFAULT_DASHBOARD, event);
    }

    /// A generated report is ready.
    pub fn report_updated(&self, data: Value) {
        let event = ServerEvent::ReportUpdate(AnalyticsPayload {
            dashboard: None,
            data,
            timestamp: Utc::now(),
        });
        self.emit_to_operators(event, None);
    }

    /// A message was created outside the socket path (e.g. over HTTP).
    pub fn message_created(&self, message: ThreadMessage) {
        let thread_id = message.thread_id.clone();
        self.emit_to_thread(
            thread_id,
            ServerEvent::MessageCreated(ThreadMessagePayload::new(message)),
        );
    }

    // ========================================================================
    // Queries and control
    // ========================================================================

    pub async fn connected_users(&self) -> Result<Vec<OnlineUser>, GatewayError> {
        self.request(|reply| Command::ConnectedUsers { reply }).await
    }

    pub async fn crew_online(&self, crew_id: impl Into<String>) -> Result<Vec<OnlineUser>, GatewayError> {
        let crew_id = crew_id.into();
        self.request(|reply| Command::CrewOnline { crew_id, reply })
            .await
    }

    pub async fn stats(&self) -> Result<GatewayStats, GatewayError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Run a heartbeat sweep now.
    pub async fn sweep(&self) -> Result<SweepReport, GatewayError> {
        self.request(|reply| Command::Sweep { reply }).await
    }

    /// Close every connection and stop the hub. Returns the final stats.
    pub async fn shutdown(&self) -> Result<GatewayStats, GatewayError> {
        let stats = self.request(|reply| Command::Shutdown { reply }).await;
        self.shutdown.cancel();
        stats
    }
}
