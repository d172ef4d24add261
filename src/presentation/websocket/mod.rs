//! WebSocket Gateway
//!
//! Real-time connections: admission, room membership, presence, rate
//! limiting, typing indicators and the broadcast API.

pub mod events;
pub mod gateway;
pub mod handler;
pub mod hub;
pub mod manager;
pub mod messages;
pub mod presence;
pub mod rate_limiter;
pub mod rooms;
pub mod session;
pub mod timers;
pub mod typing;

pub use events::{process_frame, EventContext};
pub use gateway::Gateway;
pub use handler::{serve_socket, ws_handler, SocketContext, SocketTimeouts};
pub use hub::Hub;
pub use manager::{ConnectionManager, GatewayStats, SweepReport};
pub use messages::{ClientEvent, Outbound, ServerEvent};
pub use presence::OnlineUser;
pub use session::{ConnectionHandle, DisconnectReason, SessionState};
