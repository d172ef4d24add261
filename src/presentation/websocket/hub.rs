//! Gateway hub task
//!
//! A single task owns the [`ConnectionManager`] and applies commands one at
//! a time, interleaved with timer expiries and the heartbeat sweep. Every
//! other task talks to it through a [`Gateway`] handle.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::gateway::Gateway;
use super::manager::{ConnectionManager, GatewayStats, SweepReport};
use super::messages::ServerEvent;
use super::presence::OnlineUser;
use super::rate_limiter::RateDecision;
use super::session::{ConnectionHandle, DisconnectReason};
use crate::config::GatewayLimits;
use crate::domain::{ConnectionId, Room};
use crate::shared::error::GatewayError;

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Requests accepted by the hub.
pub(crate) enum Command {
    Admit {
        handle: ConnectionHandle,
        reply: Reply<Result<(), GatewayError>>,
    },
    Disconnect {
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },
    CheckRate {
        connection_id: ConnectionId,
        reply: Reply<Result<RateDecision, GatewayError>>,
    },
    Join {
        connection_id: ConnectionId,
        room: Room,
        reply: Reply<Result<(), GatewayError>>,
    },
    Leave {
        connection_id: ConnectionId,
        room: Room,
    },
    StartTyping {
        connection_id: ConnectionId,
        thread_id: String,
        reply: Reply<Result<(), GatewayError>>,
    },
    StopTyping {
        connection_id: ConnectionId,
        thread_id: String,
    },
    Emit {
        rooms: Vec<Room>,
        event: ServerEvent,
        except: Option<ConnectionId>,
    },
    EmitAll {
        event: ServerEvent,
        except: Option<ConnectionId>,
    },
    SendTo {
        connection_id: ConnectionId,
        event: ServerEvent,
    },
    ConnectedUsers {
        reply: Reply<Vec<OnlineUser>>,
    },
    CrewOnline {
        crew_id: String,
        reply: Reply<Vec<OnlineUser>>,
    },
    Stats {
        reply: Reply<GatewayStats>,
    },
    Sweep {
        reply: Reply<SweepReport>,
    },
    Shutdown {
        reply: Reply<GatewayStats>,
    },
}

pub struct Hub {
    manager: ConnectionManager,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Start the hub task and return a handle to it.
    pub fn spawn(limits: GatewayLimits) -> (Gateway, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let hub = Hub {
            manager: ConnectionManager::new(limits),
            commands: rx,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(hub.run());
        (Gateway::new(tx, shutdown), task)
    }

    async fn run(mut self) {
        let period = self.manager.limits().heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            heartbeat_secs = period.as_secs(),
            max_connections_per_user = self.manager.limits().max_connections_per_user,
            "Gateway hub started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.manager.shutdown();
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown.cancel();
                        self.manager.shutdown();
                        let _ = reply.send(self.manager.stats());
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => {
                        self.manager.shutdown();
                        break;
                    }
                },
                Some(expiry) = self.manager.next_expired() => {
                    self.manager.on_expired(expiry);
                }
                _ = heartbeat.tick() => {
                    self.manager.sweep();
                }
            }
        }

        tracing::info!("Gateway hub stopped");
    }

    fn handle(&mut self, command: Command) {
        let manager = &mut self.manager;
        match command {
            Command::Admit { handle, reply } => {
                let _ = reply.send(manager.admit(handle));
            }
            Command::Disconnect {
                connection_id,
                reason,
            } => {
                manager.disconnect(connection_id, reason);
            }
            Command::CheckRate {
                connection_id,
                reply,
            } => {
                let _ = reply.send(manager.check_rate(connection_id));
            }
            Command::Join {
                connection_id,
                room,
                reply,
            } => {
                let _ = reply.send(manager.join(connection_id, room));
            }
            Command::Leave {
                connection_id,
                room,
            } => {
                manager.leave(connection_id, &room);
            }
            Command::StartTyping {
                connection_id,
                thread_id,
                reply,
            } => {
                let _ = reply.send(manager.start_typing(connection_id, &thread_id));
            }
            Command::StopTyping {
                connection_id,
                thread_id,
            } => {
                manager.stop_typing(connection_id, &thread_id);
            }
            Command::Emit {
                rooms,
                event,
                except,
            } => {
                let delivered = manager.fan_out(&rooms, event, except);
                tracing::trace!(rooms = rooms.len(), delivered, "Event emitted");
            }
            Command::EmitAll { event, except } => {
                manager.broadcast_all(event, except);
            }
            Command::SendTo {
                connection_id,
                event,
            } => {
                manager.send_to(connection_id, event);
            }
            Command::ConnectedUsers { reply } => {
                let _ = reply.send(manager.connected_users());
            }
            Command::CrewOnline { crew_id, reply } => {
                let _ = reply.send(manager.crew_online(&crew_id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(manager.stats());
            }
            Command::Sweep { reply } => {
                let _ = reply.send(manager.sweep());
            }
            Command::Shutdown { reply } => {
                // handled in the run loop
                let _ = reply.send(manager.stats());
            }
        }
    }
}
