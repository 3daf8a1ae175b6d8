//! Interaction ingress.
//!
//! Events posted here are forwarded to the service loop, which handles each
//! one on its own task and answers through a oneshot channel.

use crate::api::error::{ApiError, ApiResult};
use crate::events::{Dispatched, InteractionEvent};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

#[derive(Debug)]
pub enum ApiCommand {
    /// Handle an interaction and send the outcome back on `respond`.
    Interaction {
        event: InteractionEvent,
        respond: oneshot::Sender<Dispatched>,
    },
}

#[derive(Clone)]
pub struct InteractionState {
    pub tx: mpsc::Sender<ApiCommand>,
}

pub fn router(state: InteractionState) -> Router {
    Router::new()
        .route("/interactions", post(deliver))
        .with_state(state)
}

/// Delivers one interaction event.
///
/// # Response
/// The reply JSON for the acting user, or `204 No Content` for events that
/// need no answer.
async fn deliver(
    State(state): State<InteractionState>,
    Json(event): Json<InteractionEvent>,
) -> ApiResult<Response> {
    debug!(event = event.kind(), "interaction received via API");

    let (respond, outcome) = oneshot::channel();
    state
        .tx
        .send(ApiCommand::Interaction { event, respond })
        .await
        .map_err(|e| {
            error!("Failed to forward interaction: {}", e);
            ApiError::unavailable("service is shutting down")
        })?;

    let dispatched = outcome
        .await
        .map_err(|_| ApiError::unavailable("interaction was dropped before completion"))?;

    Ok(match dispatched.reply {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
