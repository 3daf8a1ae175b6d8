//! HTTP surface for the recruitment service.
//!
//! Provides endpoints for:
//! - Interaction ingress (POST /interactions)
//! - Live session inspection (GET /sessions)
//! - Liveness (GET /health)

pub mod error;
pub mod routes;

use crate::config::Config;
use crate::session::SessionStore;
use anyhow::{Context, Result};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tracing::info;

pub use routes::interactions::{ApiCommand, InteractionState};
pub use routes::sessions::{SessionSummary, SessionsState};

pub struct ApiServer {
    bind: String,
    interactions: InteractionState,
    sessions: SessionsState,
}

impl ApiServer {
    pub fn new(tx: mpsc::Sender<ApiCommand>, store: SessionStore, config: &Config) -> Self {
        Self {
            bind: config.api.bind.clone(),
            interactions: InteractionState { tx },
            sessions: SessionsState { store },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::interactions::router(self.interactions.clone()))
            .merge(routes::sessions::router(self.sessions.clone()))
            .layer(ServiceBuilder::new())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind)
            .await
            .with_context(|| format!("Failed to bind API server to {}", self.bind))?;

        info!("API server listening on http://{}", self.bind);
        info!("Endpoints:");
        info!("  GET  /              - Service info");
        info!("  GET  /version       - Version info");
        info!("  GET  /health        - Liveness and session count");
        info!("  GET  /sessions      - List live recruitments");
        info!("  GET  /sessions/:id  - Get one recruitment by initiator");
        info!("  POST /interactions  - Deliver an interaction event");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "rallycall",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "rallycall"
    }))
}
