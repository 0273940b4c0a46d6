//! Internal notify endpoint for collaborator services.
//!
//! A collaborator façade that has already resolved an event's audience posts
//! it here. The gateway serves its local sessions immediately and relays the
//! message onto the broker stream for sessions attached to other instances.
//! Delivery is best-effort by contract, so a broker outage downgrades the
//! notification to local-only rather than failing the request.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use tracing::warn;

use taskio_core::models::UserId;
use taskio_realtime::{Event, PushMessage};

use crate::http::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub users: Vec<UserId>,
    pub event: Event,
}

pub async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotifyRequest>,
) -> AppResult<impl IntoResponse> {
    if request.users.is_empty() {
        return Err(AppError::bad_request("users must not be empty"));
    }
    if request.event.event_type.is_empty() {
        return Err(AppError::bad_request("event type must not be empty"));
    }

    state.notifier.notify_users(&request.users, &request.event);

    let message = PushMessage::new(request.users, request.event);
    if let Err(e) = state.bridge.publish(&message).await {
        warn!(
            error = %e,
            event_type = %message.event.event_type,
            "Failed to relay notification to the stream, local delivery only"
        );
    }

    Ok(StatusCode::ACCEPTED)
}
