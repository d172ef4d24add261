//! Common Test Utilities
//!
//! A real hub driven through the `Gateway` handle, with in-memory
//! collaborators and channel-backed clients standing in for sockets.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::Message;
use chrono::Utc;
use futures::channel::mpsc as wire;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use realtime_gateway::application::Authenticator;
use realtime_gateway::config::GatewayLimits;
use realtime_gateway::domain::{
    ConnectionId, DeletedMessage, Identity, MessageStore, NewThreadMessage, ReadMarker, Role,
    ThreadMessage, TokenClaims, TokenVerifier, UserDirectory, UserRecord,
};
use realtime_gateway::presentation::websocket::{
    process_frame, serve_socket, ConnectionHandle, EventContext, Gateway, GatewayStats, Hub,
    Outbound, ServerEvent, SessionState, SocketContext, SocketTimeouts,
};
use realtime_gateway::shared::{AppError, GatewayError};

// ============================================================================
// Collaborators
// ============================================================================

/// Accepts tokens of the form `token:<user_id>`.
pub struct FakeVerifier;

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<TokenClaims, AppError> {
        let user_id = token
            .strip_prefix("token:")
            .ok_or_else(|| AppError::Unauthorized("malformed or unsigned token".into()))?;
        Ok(TokenClaims {
            user_id: user_id.to_string(),
            expires_at: Utc::now().timestamp() + 3600,
        })
    }
}

/// In-memory user directory.
#[derive(Default)]
pub struct FakeDirectory {
    users: Mutex<HashMap<String, UserRecord>>,
    pub lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn with_user(self, id: &str, role: Role, crew: Option<&str>, active: bool) -> Self {
        self.users.lock().unwrap().insert(
            id.to_string(),
            UserRecord {
                id: id.to_string(),
                role,
                crew_id: crew.map(String::from),
                is_active: active,
            },
        );
        self
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn find_active_user(&self, user_id: &str) -> Result<Option<UserRecord>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }
}

/// Directory whose lookups never complete.
pub struct StalledDirectory;

#[async_trait]
impl UserDirectory for StalledDirectory {
    async fn find_active_user(&self, _user_id: &str) -> Result<Option<UserRecord>, AppError> {
        std::future::pending().await
    }
}

pub fn authenticator(directory: impl UserDirectory + 'static) -> Arc<Authenticator> {
    Arc::new(Authenticator::new(Arc::new(FakeVerifier), Arc::new(directory)))
}

/// In-memory message store with a switch to make every write fail.
#[derive(Default)]
pub struct FakeStore {
    participants: Mutex<HashSet<(String, String)>>,
    messages: Mutex<HashMap<String, ThreadMessage>>,
    failing: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeStore {
    pub fn with_participant(self, user_id: &str, thread_id: &str) -> Self {
        self.participants
            .lock()
            .unwrap()
            .insert((user_id.to_string(), thread_id.to_string()));
        self
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Unavailable("message store offline".into()));
        }
        Ok(())
    }

    fn is_participant(&self, user_id: &str, thread_id: &str) -> bool {
        self.participants
            .lock()
            .unwrap()
            .contains(&(user_id.to_string(), thread_id.to_string()))
    }

    fn owned_message(&self, user_id: &str, message_id: &str) -> Result<ThreadMessage, AppError> {
        let message = self
            .messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound("message".into()))?;
        if message.sender_id != user_id {
            return Err(AppError::Forbidden("only the author can change a message".into()));
        }
        Ok(message)
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn can_access_thread(&self, user_id: &str, thread_id: &str) -> Result<bool, AppError> {
        Ok(self.is_participant(user_id, thread_id))
    }

    async fn create_message(
        &self,
        user_id: &str,
        message: NewThreadMessage,
    ) -> Result<ThreadMessage, AppError> {
        self.check_writable()?;
        if !self.is_participant(user_id, &message.thread_id) {
            return Err(AppError::Forbidden("not a participant of this thread".into()));
        }
        let id = format!("m-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let created = ThreadMessage {
            id: id.clone(),
            thread_id: message.thread_id,
            sender_id: user_id.to_string(),
            content: message.content,
            reply_to_id: message.reply_to_id,
            created_at: Utc::now(),
            edited_at: None,
        };
        self.messages.lock().unwrap().insert(id, created.clone());
        Ok(created)
    }

    async fn edit_message(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ThreadMessage, AppError> {
        self.check_writable()?;
        let mut message = self.owned_message(user_id, message_id)?;
        message.content = content.to_string();
        message.edited_at = Some(Utc::now());
        self.messages
            .lock()
            .unwrap()
            .insert(message_id.to_string(), message.clone());
        Ok(message)
    }

    async fn delete_message(
        &self,
        user_id: &str,
        message_id: &str,
    ) -> Result<DeletedMessage, AppError> {
        self.check_writable()?;
        let message = self.owned_message(user_id, message_id)?;
        self.messages.lock().unwrap().remove(message_id);
        Ok(DeletedMessage {
            id: message.id,
            thread_id: message.thread_id,
        })
    }

    async fn mark_read(
        &self,
        user_id: &str,
        thread_id: &str,
        message_id: &str,
    ) -> Result<ReadMarker, AppError> {
        self.check_writable()?;
        if !self.is_participant(user_id, thread_id) {
            return Err(AppError::Forbidden("not a participant of this thread".into()));
        }
        Ok(ReadMarker {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            read_at: Utc::now(),
        })
    }
}

// ============================================================================
// Clients
// ============================================================================

/// Receiving end of one fake transport.
pub struct TestClient {
    pub id: ConnectionId,
    pub identity: Identity,
    pub session: SessionState,
    pub cancel: CancellationToken,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl TestClient {
    /// Drain queued events.
    pub fn events(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            if let Some(event) = item.as_event() {
                events.push(event.clone());
            }
        }
        events
    }

    /// Drain queued events, keeping only their wire names.
    pub fn event_names(&mut self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| event.event_name().to_string())
            .collect()
    }

    /// Drain the queue and return the close code, if one was queued.
    pub fn close_code(&mut self) -> Option<u16> {
        let mut code = None;
        while let Ok(item) = self.rx.try_recv() {
            if let Outbound::Close(frame) = item {
                code = Some(frame.code);
            }
        }
        code
    }
}

pub fn channel_client(user: &str, role: Role, crew: Option<&str>, address: &str) -> (ConnectionHandle, TestClient) {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let id = ConnectionId::new();
    let identity = Identity::new(user, role, crew.map(String::from));
    let address: IpAddr = address.parse().unwrap();
    let handle = ConnectionHandle::new(id, identity.clone(), address, tx, cancel.clone());
    let client = TestClient {
        id,
        identity,
        session: SessionState::new(id),
        cancel,
        rx,
    };
    (handle, client)
}

/// A frame as the remote peer sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Event(String, Value),
    Close(u16),
}

/// Peer side of a socket served by `serve_socket` over in-memory channels.
pub struct SocketClient {
    /// Frames the server writes
    pub incoming: wire::UnboundedReceiver<Message>,
    /// Frames the client sends, or transport errors
    pub outgoing: wire::UnboundedSender<Result<Message, std::io::Error>>,
    pub task: JoinHandle<()>,
}

impl SocketClient {
    /// Next non-ping frame, or `None` once the server dropped its sink.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        while let Some(message) = self.incoming.next().await {
            match message {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(text.as_str()).unwrap();
                    let name = value["event"].as_str().unwrap().to_string();
                    return Some(Frame::Event(name, value["data"].clone()));
                }
                Message::Close(frame) => return Some(Frame::Close(frame.map_or(1005, |f| f.code))),
                _ => continue,
            }
        }
        None
    }

    /// Next frame, which must be an event with the given name.
    pub async fn expect_event(&mut self, name: &str) -> Value {
        match self.next_frame().await {
            Some(Frame::Event(event, data)) if event == name => data,
            other => panic!("expected {name}, got {other:?}"),
        }
    }

    /// Read up to the `connected` event and return the assigned id.
    pub async fn connected(&mut self) -> ConnectionId {
        let data = self.expect_event("connected").await;
        let id = data["connectionId"].as_str().unwrap();
        ConnectionId::from(uuid::Uuid::parse_str(id).unwrap())
    }

    pub fn send_text(&self, text: &str) {
        self.outgoing
            .unbounded_send(Ok(Message::Text(text.into())))
            .unwrap();
    }

    pub fn send(&self, message: Message) {
        self.outgoing.unbounded_send(Ok(message)).unwrap();
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_limits() -> GatewayLimits {
    GatewayLimits {
        max_connections_per_user: 2,
        ..GatewayLimits::default()
    }
}

/// A running hub plus the collaborators its event handlers use.
pub struct TestGateway {
    pub gateway: Gateway,
    pub hub: JoinHandle<()>,
    pub store: Arc<FakeStore>,
}

impl TestGateway {
    pub fn start() -> Self {
        Self::with_store(FakeStore::default())
    }

    pub fn with_store(store: FakeStore) -> Self {
        Self::with_limits(test_limits(), store)
    }

    pub fn with_limits(limits: GatewayLimits, store: FakeStore) -> Self {
        let (gateway, hub) = Hub::spawn(limits);
        Self {
            gateway,
            hub,
            store: Arc::new(store),
        }
    }

    /// Admit a client from a default address.
    pub async fn connect(&self, user: &str, role: Role, crew: Option<&str>) -> TestClient {
        self.connect_from(user, role, crew, "10.0.0.1").await.unwrap()
    }

    pub async fn connect_from(
        &self,
        user: &str,
        role: Role,
        crew: Option<&str>,
        address: &str,
    ) -> Result<TestClient, GatewayError> {
        let (handle, mut client) = channel_client(user, role, crew, address);
        self.gateway.admit(handle).await?;
        client.session.authenticate(client.identity.clone());
        Ok(client)
    }

    /// Push one text frame through the inbound pipeline.
    pub async fn send(&self, client: &mut TestClient, frame: &str) -> Result<(), GatewayError> {
        let ctx = EventContext {
            connection_id: client.id,
            gateway: &self.gateway,
            store: self.store.as_ref(),
        };
        process_frame(&ctx, &mut client.session, frame).await
    }

    /// Serve a socket from 10.0.0.9 whose peer is the returned client.
    pub fn open_socket(
        &self,
        authenticator: Arc<Authenticator>,
        token: Option<&str>,
        timeouts: SocketTimeouts,
    ) -> SocketClient {
        let (sink, incoming) = wire::unbounded::<Message>();
        let (outgoing, stream) = wire::unbounded::<Result<Message, std::io::Error>>();
        let ctx = SocketContext {
            gateway: self.gateway.clone(),
            authenticator,
            message_store: self.store.clone(),
            timeouts,
        };
        let token = token.map(String::from);
        let address: IpAddr = "10.0.0.9".parse().unwrap();
        let task = tokio::spawn(serve_socket(sink, stream, ctx, token, address));
        SocketClient {
            incoming,
            outgoing,
            task,
        }
    }

    /// Wait until every command sent so far has been applied by the hub.
    pub async fn settle(&self) -> GatewayStats {
        self.gateway.stats().await.unwrap()
    }
}
