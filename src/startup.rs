//! Application Startup
//!
//! Application building and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::application::{Authenticator, JwtTokenVerifier};
use crate::config::Settings;
use crate::domain::MessageStore;
use crate::infrastructure::database;
use crate::infrastructure::repositories::{PgMessageStore, PgUserDirectory};
use crate::presentation::http::{handlers, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::{Gateway, Hub};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub gateway: Gateway,
    pub authenticator: Arc<Authenticator>,
    pub message_store: Arc<dyn MessageStore>,
    pub settings: Arc<Settings>,
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    gateway: Gateway,
    hub: JoinHandle<()>,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        handlers::health::init_server_start();

        // Create database pool
        let db = database::create_pool(&settings.database).await?;
        tracing::info!("Database connection pool created");

        // Collaborators
        let verifier = Arc::new(JwtTokenVerifier::new(&settings.jwt));
        let directory = Arc::new(PgUserDirectory::new(db.clone()));
        let authenticator = Arc::new(Authenticator::new(verifier, directory));
        let message_store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(db.clone()));

        // Start the connection hub
        let (gateway, hub) = Hub::spawn(settings.gateway.limits());

        let state = AppState {
            db,
            gateway: gateway.clone(),
            authenticator,
            message_store,
            settings: Arc::new(settings.clone()),
        };

        // Build router with middleware
        let router = routes::create_router(state)
            .layer(logging::create_trace_layer())
            .layer(cors::create_cors_layer(&settings.cors));

        // Bind to address
        let listener = TcpListener::bind(settings.server_addr()).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            router,
            gateway,
            hub,
        })
    }

    /// Serve until a shutdown signal, then close every live connection
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        match self.gateway.shutdown().await {
            Ok(stats) => tracing::info!(
                connections = stats.connections,
                rooms = stats.rooms,
                "Gateway shut down"
            ),
            Err(e) => tracing::warn!(error = %e, "Gateway hub already stopped"),
        }

        if let Err(e) = self.hub.await {
            tracing::error!(error = %e, "Gateway hub task failed");
        }
        Ok(())
    }

    /// Get the bound address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
