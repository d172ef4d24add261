//! WebSocket Message Types
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": {...}}`.
//! Inbound frames decode into [`ClientEvent`], outbound frames are encoded
//! from [`ServerEvent`]. Payload fields are camelCase.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::domain::{ConnectionId, Identity, ReadMarker, Role, ThreadMessage};
use crate::shared::error::GatewayError;

/// Close codes (4000-range for application-level).
pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_AUTH_FAILED: u16 = 4001;
pub const CLOSE_CAPACITY_EXCEEDED: u16 = 4008;
pub const CLOSE_IDLE_TIMEOUT: u16 = 4009;
pub const CLOSE_SERVER_SHUTDOWN: u16 = 4010;
pub const CLOSE_TRANSPORT_LOST: u16 = 4011;

/// Dashboard joined by `subscribeToAnalytics` when none is named.
pub const DEFAULT_DASHBOARD: &str = "overview";

// ============================================================================
// Inbound events
// ============================================================================

/// Events a client may send once authenticated.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "subscribeToJob")]
    SubscribeToJob(JobRef),
    #[serde(rename = "unsubscribeFromJob")]
    UnsubscribeFromJob(JobRef),
    #[serde(rename = "locationUpdate")]
    LocationUpdate(LocationUpdate),
    #[serde(rename = "statusUpdate")]
    StatusUpdate(StatusUpdate),
    #[serde(rename = "sendMessage")]
    SendMessage(DirectMessage),
    #[serde(rename = "emergencyAlert")]
    EmergencyAlert(EmergencyAlert),
    #[serde(rename = "subscribeToAnalytics")]
    SubscribeToAnalytics(AnalyticsSubscription),
    #[serde(rename = "message.send")]
    MessageSend(MessageDraft),
    #[serde(rename = "typing.start")]
    TypingStart(ThreadRef),
    #[serde(rename = "typing.stop")]
    TypingStop(ThreadRef),
    #[serde(rename = "message.read")]
    MessageRead(ReadRequest),
    #[serde(rename = "message.edit")]
    MessageEdit(EditRequest),
    #[serde(rename = "message.delete")]
    MessageDelete(MessageRef),
    #[serde(rename = "thread.subscribe")]
    ThreadSubscribe(ThreadRef),
    #[serde(rename = "thread.unsubscribe")]
    ThreadUnsubscribe(ThreadRef),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JobRef {
    #[validate(length(min = 1, max = 128))]
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
    #[validate(range(min = 0.0))]
    pub accuracy: Option<f64>,
    #[validate(range(min = 0.0, max = 360.0))]
    pub heading: Option<f64>,
    #[validate(range(min = 0.0))]
    pub speed: Option<f64>,
    #[validate(length(min = 1, max = 128))]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[validate(length(min = 1, max = 64))]
    pub status: String,
    #[validate(length(min = 1, max = 128))]
    pub job_id: Option<String>,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

/// Addressee kind of a `sendMessage` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTarget {
    User,
    Crew,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub to: MessageTarget,
    #[validate(length(min = 1, max = 128))]
    pub target_id: Option<String>,
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct GeoPoint {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 64))]
    pub alert_type: String,
    #[validate(length(min = 1, max = 4000))]
    pub message: String,
    #[validate(nested)]
    pub location: Option<GeoPoint>,
    #[validate(length(min = 1, max = 128))]
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSubscription {
    #[validate(length(min = 1, max = 64))]
    pub dashboard_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[validate(length(min = 1, max = 128))]
    pub thread_id: String,
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
    #[validate(length(min = 1, max = 128))]
    pub reply_to_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRef {
    #[validate(length(min = 1, max = 128))]
    pub thread_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    #[validate(length(min = 1, max = 128))]
    pub thread_id: String,
    #[validate(length(min = 1, max = 128))]
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    #[validate(length(min = 1, max = 128))]
    pub message_id: String,
    #[validate(length(min = 1, max = 4000))]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    #[validate(length(min = 1, max = 128))]
    pub message_id: String,
}

impl ClientEvent {
    /// Decode and validate one text frame.
    ///
    /// A frame without `data` (or with `data: null`) is read as `data: {}`.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        let mut frame: Value = serde_json::from_str(text)
            .map_err(|e| GatewayError::InvalidPayload(format!("invalid JSON: {}", e)))?;

        if let Some(object) = frame.as_object_mut() {
            if object.get("data").map_or(true, Value::is_null) {
                object.insert("data".to_string(), json!({}));
            }
        }

        let event: ClientEvent = serde_json::from_value(frame)
            .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        event.validate_payload()?;
        Ok(event)
    }

    fn validate_payload(&self) -> Result<(), GatewayError> {
        let result = match self {
            ClientEvent::SubscribeToJob(p) | ClientEvent::UnsubscribeFromJob(p) => p.validate(),
            ClientEvent::LocationUpdate(p) => p.validate(),
            ClientEvent::StatusUpdate(p) => p.validate(),
            ClientEvent::SendMessage(p) => p.validate(),
            ClientEvent::EmergencyAlert(p) => p.validate(),
            ClientEvent::SubscribeToAnalytics(p) => p.validate(),
            ClientEvent::MessageSend(p) => p.validate(),
            ClientEvent::TypingStart(p)
            | ClientEvent::TypingStop(p)
            | ClientEvent::ThreadSubscribe(p)
            | ClientEvent::ThreadUnsubscribe(p) => p.validate(),
            ClientEvent::MessageRead(p) => p.validate(),
            ClientEvent::MessageEdit(p) => p.validate(),
            ClientEvent::MessageDelete(p) => p.validate(),
        };
        result.map_err(|e| GatewayError::InvalidPayload(e.to_string()))
    }

    /// Wire name of the event
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::SubscribeToJob(_) => "subscribeToJob",
            ClientEvent::UnsubscribeFromJob(_) => "unsubscribeFromJob",
            ClientEvent::LocationUpdate(_) => "locationUpdate",
            ClientEvent::StatusUpdate(_) => "statusUpdate",
            ClientEvent::SendMessage(_) => "sendMessage",
            ClientEvent::EmergencyAlert(_) => "emergencyAlert",
            ClientEvent::SubscribeToAnalytics(_) => "subscribeToAnalytics",
            ClientEvent::MessageSend(_) => "message.send",
            ClientEvent::TypingStart(_) => "typing.start",
            ClientEvent::TypingStop(_) => "typing.stop",
            ClientEvent::MessageRead(_) => "message.read",
            ClientEvent::MessageEdit(_) => "message.edit",
            ClientEvent::MessageDelete(_) => "message.delete",
            ClientEvent::ThreadSubscribe(_) => "thread.subscribe",
            ClientEvent::ThreadUnsubscribe(_) => "thread.unsubscribe",
        }
    }

    /// Role check for the event.
    pub fn authorize(&self, identity: &Identity) -> Result<(), GatewayError> {
        match self {
            ClientEvent::LocationUpdate(_) | ClientEvent::StatusUpdate(_) => {
                if identity.role == Role::Crew {
                    Ok(())
                } else {
                    Err(GatewayError::Forbidden(
                        "only crew members can send location and status updates".into(),
                    ))
                }
            }
            ClientEvent::SendMessage(DirectMessage {
                to: MessageTarget::Broadcast,
                ..
            }) => {
                if identity.role.is_admin() {
                    Ok(())
                } else {
                    Err(GatewayError::Forbidden(
                        "only administrators can broadcast messages".into(),
                    ))
                }
            }
            ClientEvent::SubscribeToAnalytics(_) => {
                if identity.role.is_operator() {
                    Ok(())
                } else {
                    Err(GatewayError::Forbidden(
                        "analytics are limited to administrators and dispatchers".into(),
                    ))
                }
            }
            ClientEvent::SendMessage(_)
            | ClientEvent::SubscribeToJob(_)
            | ClientEvent::UnsubscribeFromJob(_)
            | ClientEvent::EmergencyAlert(_)
            | ClientEvent::MessageSend(_)
            | ClientEvent::TypingStart(_)
            | ClientEvent::TypingStop(_)
            | ClientEvent::MessageRead(_)
            | ClientEvent::MessageEdit(_)
            | ClientEvent::MessageDelete(_)
            | ClientEvent::ThreadSubscribe(_)
            | ClientEvent::ThreadUnsubscribe(_) => Ok(()),
        }
    }
}

// ============================================================================
// Outbound events
// ============================================================================

/// Events the server sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "connected")]
    Connected(ConnectedPayload),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    #[serde(rename = "userOnline")]
    UserOnline(PresencePayload),
    #[serde(rename = "userOffline")]
    UserOffline(PresencePayload),
    #[serde(rename = "jobUpdate")]
    JobUpdate(JobUpdatePayload),
    #[serde(rename = "crewLocationUpdate")]
    CrewLocationUpdate(LocationPayload),
    #[serde(rename = "jobLocationUpdate")]
    JobLocationUpdate(LocationPayload),
    #[serde(rename = "crewStatusUpdate")]
    CrewStatusUpdate(StatusPayload),
    #[serde(rename = "teamStatusUpdate")]
    TeamStatusUpdate(StatusPayload),
    #[serde(rename = "newMessage")]
    NewMessage(DirectMessagePayload),
    #[serde(rename = "broadcast")]
    Broadcast(DirectMessagePayload),
    #[serde(rename = "emergencyAlert")]
    EmergencyAlert(EmergencyPayload),
    #[serde(rename = "jobEmergency")]
    JobEmergency(EmergencyPayload),
    #[serde(rename = "teamEmergency")]
    TeamEmergency(EmergencyPayload),
    #[serde(rename = "message.created")]
    MessageCreated(ThreadMessagePayload),
    #[serde(rename = "message.edited")]
    MessageEdited(ThreadMessagePayload),
    #[serde(rename = "message.deleted")]
    MessageDeleted(DeletedMessagePayload),
    #[serde(rename = "user.typing")]
    UserTyping(TypingPayload),
    #[serde(rename = "user.stopped_typing")]
    UserStoppedTyping(TypingPayload),
    #[serde(rename = "message.read_receipt")]
    MessageReadReceipt(ReadReceiptPayload),
    #[serde(rename = "analyticsUpdate")]
    AnalyticsUpdate(AnalyticsPayload),
    #[serde(rename = "metricsUpdate")]
    MetricsUpdate(AnalyticsPayload),
    #[serde(rename = "reportUpdate")]
    ReportUpdate(AnalyticsPayload),
    #[serde(rename = "serverShutdown")]
    ServerShutdown(ShutdownPayload),
}

impl ServerEvent {
    /// Get the event name for dispatch
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::Error(_) => "error",
            ServerEvent::UserOnline(_) => "userOnline",
            ServerEvent::UserOffline(_) => "userOffline",
            ServerEvent::JobUpdate(_) => "jobUpdate",
            ServerEvent::CrewLocationUpdate(_) => "crewLocationUpdate",
            ServerEvent::JobLocationUpdate(_) => "jobLocationUpdate",
            ServerEvent::CrewStatusUpdate(_) => "crewStatusUpdate",
            ServerEvent::TeamStatusUpdate(_) => "teamStatusUpdate",
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::Broadcast(_) => "broadcast",
            ServerEvent::EmergencyAlert(_) => "emergencyAlert",
            ServerEvent::JobEmergency(_) => "jobEmergency",
            ServerEvent::TeamEmergency(_) => "teamEmergency",
            ServerEvent::MessageCreated(_) => "message.created",
            ServerEvent::MessageEdited(_) => "message.edited",
            ServerEvent::MessageDeleted(_) => "message.deleted",
            ServerEvent::UserTyping(_) => "user.typing",
            ServerEvent::UserStoppedTyping(_) => "user.stopped_typing",
            ServerEvent::MessageReadReceipt(_) => "message.read_receipt",
            ServerEvent::AnalyticsUpdate(_) => "analyticsUpdate",
            ServerEvent::MetricsUpdate(_) => "metricsUpdate",
            ServerEvent::ReportUpdate(_) => "reportUpdate",
            ServerEvent::ServerShutdown(_) => "serverShutdown",
        }
    }

    pub fn error(err: &GatewayError) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: err.client_message(),
            code: err.code().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub role: Role,
    pub crew_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: String,
    pub role: Role,
    pub crew_id: Option<String>,
    /// Live connections the user has after this change
    pub connections: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdatePayload {
    pub job_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationPayload {
    pub user_id: String,
    pub crew_id: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LocationPayload {
    pub fn new(identity: &Identity, update: LocationUpdate) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            crew_id: identity.crew_id.clone(),
            lat: update.lat,
            lng: update.lng,
            accuracy: update.accuracy,
            heading: update.heading,
            speed: update.speed,
            job_id: update.job_id,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub user_id: String,
    pub crew_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusPayload {
    pub fn new(identity: &Identity, update: StatusUpdate) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            crew_id: identity.crew_id.clone(),
            status: update.status,
            job_id: update.job_id,
            note: update.note,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessagePayload {
    pub from_user_id: String,
    pub from_role: Role,
    pub to: MessageTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub message: String,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
}

impl DirectMessagePayload {
    pub fn new(identity: &Identity, message: DirectMessage) -> Self {
        Self {
            from_user_id: identity.user_id.clone(),
            from_role: identity.role,
            to: message.to,
            target_id: message.target_id,
            message: message.message,
            priority: message.priority,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyPayload {
    pub user_id: String,
    pub role: Role,
    pub crew_id: Option<String>,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl EmergencyPayload {
    pub fn new(identity: &Identity, alert: EmergencyAlert) -> Self {
        Self {
            user_id: identity.user_id.clone(),
            role: identity.role,
            crew_id: identity.crew_id.clone(),
            alert_type: alert.alert_type,
            message: alert.message,
            location: alert.location,
            job_id: alert.job_id,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessagePayload {
    pub message: ThreadMessage,
    pub timestamp: DateTime<Utc>,
}

impl ThreadMessagePayload {
    pub fn new(message: ThreadMessage) -> Self {
        Self {
            message,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedMessagePayload {
    pub message_id: String,
    pub thread_id: String,
    pub deleted_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub thread_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptPayload {
    pub thread_id: String,
    pub message_id: String,
    pub user_id: String,
    pub read_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl From<ReadMarker> for ReadReceiptPayload {
    fn from(marker: ReadMarker) -> Self {
        Self {
            thread_id: marker.thread_id,
            message_id: marker.message_id,
            user_id: marker.user_id,
            read_at: marker.read_at,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<String>,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownPayload {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Transport
// ============================================================================

/// Close frame requested by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    pub code: u16,
    pub reason: String,
}

/// Item queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<ServerEvent>),
    Close(CloseRequest),
}

impl Outbound {
    pub fn event(event: ServerEvent) -> Self {
        Outbound::Event(Arc::new(event))
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Outbound::Close(CloseRequest {
            code,
            reason: reason.into(),
        })
    }

    /// The event carried by this item, if any.
    pub fn as_event(&self) -> Option<&ServerEvent> {
        match self {
            Outbound::Event(event) => Some(event),
            Outbound::Close(_) => None,
        }
    }
}
