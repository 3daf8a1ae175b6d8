//! Read-only view of live recruitments.

use crate::api::error::{ApiError, ApiResult};
use crate::platform::{ChannelId, UserId};
use crate::session::{GameMode, Session, SessionPhase, SessionStore};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Clone)]
pub struct SessionsState {
    pub store: SessionStore,
}

/// Public shape of a session as returned by `/sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub initiator: UserId,
    pub phase: SessionPhase,
    pub mode: Option<GameMode>,
    pub title: Option<String>,
    pub participants: Vec<UserId>,
    pub total_party_size: Option<usize>,
    pub remaining_slots: usize,
    pub voice_channel: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            initiator: session.initiator,
            phase: session.phase,
            mode: session.mode,
            title: session.title.clone(),
            participants: session.participants.clone(),
            total_party_size: session.total_party_size(),
            remaining_slots: session.remaining_slots(),
            voice_channel: session.voice_channel,
            created_at: session.created_at,
        }
    }
}

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:initiator", get(get_session))
        .with_state(state)
}

async fn health(State(state): State<SessionsState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.store.len().await,
    }))
}

/// Lists live sessions, oldest first.
async fn list_sessions(State(state): State<SessionsState>) -> Json<Vec<SessionSummary>> {
    let sessions = state.store.snapshot().await;
    Json(sessions.iter().map(SessionSummary::from).collect())
}

async fn get_session(
    State(state): State<SessionsState>,
    Path(initiator): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    let initiator: UserId = initiator
        .parse()
        .map_err(|_| ApiError::bad_request(format!("'{initiator}' is not a user id")))?;
    let session = state
        .store
        .get(initiator)
        .await
        .map_err(|_| ApiError::not_found(format!("no live session for {initiator}")))?;
    Ok(Json(SessionSummary::from(&session)))
}
