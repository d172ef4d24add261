//! Inbound event handling
//!
//! Every frame passes the same gates in order: session phase, rate limit,
//! decoding, role check. Message-store calls complete before any fan-out,
//! so a failed write is never announced.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use super::gateway::Gateway;
use super::messages::{
    ClientEvent, DeletedMessagePayload, DirectMessagePayload, EmergencyPayload, LocationPayload,
    MessageTarget, ReadReceiptPayload, ServerEvent, StatusPayload, ThreadMessagePayload,
    DEFAULT_DASHBOARD,
};
use super::session::SessionState;
use crate::domain::{ConnectionId, Identity, MessageStore, NewThreadMessage, Room};
use crate::infrastructure::metrics;
use crate::shared::error::{AppError, GatewayError};

/// What a handler needs to act on behalf of one connection.
pub struct EventContext<'a> {
    pub connection_id: ConnectionId,
    pub gateway: &'a Gateway,
    pub store: &'a dyn MessageStore,
}

/// Run one text frame through the gates and its handler.
pub async fn process_frame(
    ctx: &EventContext<'_>,
    session: &mut SessionState,
    text: &str,
) -> Result<(), GatewayError> {
    let identity = session.begin()?;
    let result = gate_and_handle(ctx, &identity, text).await;
    session.finish();
    result
}

async fn gate_and_handle(
    ctx: &EventContext<'_>,
    identity: &Identity,
    text: &str,
) -> Result<(), GatewayError> {
    let decision = ctx.gateway.check_rate(ctx.connection_id).await?;
    if !decision.allowed {
        metrics::record_event("unknown", "rate_limited");
        return Err(GatewayError::RateLimited);
    }

    let event = ClientEvent::parse(text)?;
    let name = event.event_name();

    if let Err(err) = event.authorize(identity) {
        debug!(
            connection_id = %ctx.connection_id,
            user_id = %identity.user_id,
            event = name,
            "Event rejected by role check"
        );
        metrics::record_event(name, "forbidden");
        return Err(err);
    }

    let result = handle_event(ctx, identity, event).await;
    metrics::record_event(name, if result.is_ok() { "ok" } else { "error" });
    result
}

/// Execute an authorized event.
pub async fn handle_event(
    ctx: &EventContext<'_>,
    identity: &Identity,
    event: ClientEvent,
) -> Result<(), GatewayError> {
    let id = ctx.connection_id;
    let gateway = ctx.gateway;

    match event {
        ClientEvent::SubscribeToJob(job) => gateway.join(id, Room::job(job.job_id)).await,

        ClientEvent::UnsubscribeFromJob(job) => {
            gateway.leave(id, Room::job(job.job_id));
            Ok(())
        }

        ClientEvent::LocationUpdate(update) => {
            let payload = LocationPayload::new(identity, update);
            if let Some(job_id) = payload.job_id.clone() {
                gateway.emit_to_job(job_id, ServerEvent::JobLocationUpdate(payload.clone()));
            }
            gateway.emit_to_operators(ServerEvent::CrewLocationUpdate(payload), None);
            Ok(())
        }

        ClientEvent::StatusUpdate(update) => {
            let payload = StatusPayload::new(identity, update);
            if let Some(crew_id) = identity.crew_id.clone() {
                gateway.emit_to_rooms(
                    vec![Room::crew(crew_id)],
                    ServerEvent::TeamStatusUpdate(payload.clone()),
                    Some(id),
                );
            }
            gateway.emit_to_operators(ServerEvent::CrewStatusUpdate(payload), None);
            Ok(())
        }

        ClientEvent::SendMessage(message) => {
            let target = message.to;
            let target_id = message.target_id.clone();
            let payload = DirectMessagePayload::new(identity, message);
            match target {
                MessageTarget::User => {
                    let user_id = require_target(target_id, "user")?;
                    gateway.emit_to_user(user_id, ServerEvent::NewMessage(payload));
                }
                MessageTarget::Crew => {
                    let crew_id = require_target(target_id, "crew")?;
                    gateway.emit_to_crew(crew_id, ServerEvent::NewMessage(payload));
                }
                MessageTarget::Broadcast => {
                    gateway.emit_to_all(ServerEvent::Broadcast(payload), None);
                }
            }
            Ok(())
        }

        ClientEvent::EmergencyAlert(alert) => {
            let payload = EmergencyPayload::new(identity, alert);
            warn!(
                user_id = %identity.user_id,
                alert_type = %payload.alert_type,
                job_id = ?payload.job_id,
                "Emergency alert raised"
            );
            if let Some(job_id) = payload.job_id.clone() {
                gateway.emit_to_job(job_id, ServerEvent::JobEmergency(payload.clone()));
            }
            if let Some(crew_id) = identity.crew_id.clone() {
                gateway.emit_to_rooms(
                    vec![Room::crew(crew_id)],
                    ServerEvent::TeamEmergency(payload.clone()),
                    Some(id),
                );
            }
            gateway.emit_to_operators(ServerEvent::EmergencyAlert(payload), None);
            Ok(())
        }

        ClientEvent::SubscribeToAnalytics(subscription) => {
            let dashboard = subscription
                .dashboard_type
                .unwrap_or_else(|| DEFAULT_DASHBOARD.to_string());
            gateway.join(id, Room::analytics(dashboard)).await
        }

        ClientEvent::MessageSend(draft) => {
            let message = timed(
                "create_message",
                ctx.store.create_message(
                    &identity.user_id,
                    NewThreadMessage {
                        thread_id: draft.thread_id,
                        content: draft.content,
                        reply_to_id: draft.reply_to_id,
                    },
                ),
            )
            .await?;

            gateway.stop_typing(id, message.thread_id.clone());
            gateway.emit_to_thread(
                message.thread_id.clone(),
                ServerEvent::MessageCreated(ThreadMessagePayload::new(message)),
            );
            Ok(())
        }

        ClientEvent::TypingStart(thread) => gateway.start_typing(id, thread.thread_id).await,

        ClientEvent::TypingStop(thread) => {
            gateway.stop_typing(id, thread.thread_id);
            Ok(())
        }

        ClientEvent::MessageRead(read) => {
            let marker = timed(
                "mark_read",
                ctx.store
                    .mark_read(&identity.user_id, &read.thread_id, &read.message_id),
            )
            .await?;
            gateway.emit_to_thread(
                marker.thread_id.clone(),
                ServerEvent::MessageReadReceipt(ReadReceiptPayload::from(marker)),
            );
            Ok(())
        }

        ClientEvent::MessageEdit(edit) => {
            let message = timed(
                "edit_message",
                ctx.store
                    .edit_message(&identity.user_id, &edit.message_id, &edit.content),
            )
            .await?;
            gateway.emit_to_thread(
                message.thread_id.clone(),
                ServerEvent::MessageEdited(ThreadMessagePayload::new(message)),
            );
            Ok(())
        }

        ClientEvent::MessageDelete(target) => {
            let deleted = timed(
                "delete_message",
                ctx.store.delete_message(&identity.user_id, &target.message_id),
            )
            .await?;
            gateway.emit_to_thread(
                deleted.thread_id.clone(),
                ServerEvent::MessageDeleted(DeletedMessagePayload {
                    message_id: deleted.id,
                    thread_id: deleted.thread_id,
                    deleted_by: identity.user_id.clone(),
                    timestamp: Utc::now(),
                }),
            );
            Ok(())
        }

        ClientEvent::ThreadSubscribe(thread) => {
            let allowed = timed(
                "can_access_thread",
                ctx.store.can_access_thread(&identity.user_id, &thread.thread_id),
            )
            .await?;
            if !allowed {
                return Err(GatewayError::Forbidden(format!(
                    "no access to thread {}",
                    thread.thread_id
                )));
            }
            gateway.join(id, Room::thread(thread.thread_id)).await
        }

        ClientEvent::ThreadUnsubscribe(thread) => {
            gateway.stop_typing(id, thread.thread_id.clone());
            gateway.leave(id, Room::thread(thread.thread_id));
            Ok(())
        }
    }
}

fn require_target(target_id: Option<String>, kind: &str) -> Result<String, GatewayError> {
    target_id.ok_or_else(|| GatewayError::InvalidPayload(format!("targetId is required for {} messages", kind)))
}

async fn timed<T>(
    operation: &'static str,
    call: impl Future<Output = Result<T, AppError>>,
) -> Result<T, GatewayError> {
    let started = Instant::now();
    let result = call.await;
    metrics::record_store_call(operation, started.elapsed().as_secs_f64());
    result.map_err(GatewayError::from)
}
