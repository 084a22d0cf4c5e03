use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::{
        auth::AuthenticatedUser,
        event::{CreateEventRequest, UpdateEventRequest},
    },
    services::events::{EventError, EventService},
    state::AppState,
};

fn event_error(e: EventError) -> ApiError {
    let message = e.to_string();
    match e {
        EventError::NotFound => error(StatusCode::NOT_FOUND, &message),
        EventError::InvalidTiers(_) => error(StatusCode::BAD_REQUEST, &message),
        EventError::HasTickets(_) => error(StatusCode::CONFLICT, &message),
        EventError::Database(e) => internal(e),
        EventError::Other(e) => internal(e),
    }
}

/// GET /api/events — published events
pub async fn list_public(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let events = EventService::list(&state.db, false).await.map_err(internal)?;
    Ok(Json(json!(events)))
}

/// GET /api/events/{id} — unpublished events are hidden
pub async fn get_public(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let event = EventService::get(&state.db, id).await.map_err(event_error)?;
    if !event.is_published {
        return Err(error(StatusCode::NOT_FOUND, "Event not found"));
    }
    Ok(Json(json!(event)))
}

/// GET /api/events/{id}/availability
pub async fn availability(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tiers = EventService::availability(&state.db, id, state.config.reservation_ttl_minutes)
        .await
        .map_err(event_error)?;
    Ok(Json(json!({ "event_id": id, "tiers": tiers })))
}

/// GET /api/admin/events — all events, any staff member
pub async fn list_admin(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<Json<Value>, ApiError> {
    let events = EventService::list(&state.db, true).await.map_err(internal)?;
    Ok(Json(json!(events)))
}

/// GET /api/admin/events/{id}
pub async fn get_admin(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let event = EventService::get(&state.db, id).await.map_err(event_error)?;
    Ok(Json(json!(event)))
}

/// POST /api/admin/events — admin only
pub async fn create_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Json(body): Json<CreateEventRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if body.title.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Title is required"));
    }
    let event = EventService::create(&state.db, &body).await.map_err(event_error)?;
    tracing::info!(event_id = %event.id, user_id = %user.user_id, "Event created");
    Ok((StatusCode::CREATED, Json(json!(event))))
}

/// PUT /api/admin/events/{id} — admin only
pub async fn update_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateEventRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(error(StatusCode::BAD_REQUEST, "Title cannot be empty"));
    }
    let event = EventService::update(&state.db, id, &body).await.map_err(event_error)?;
    tracing::info!(event_id = %id, user_id = %user.user_id, "Event updated");
    Ok(Json(json!(event)))
}

/// DELETE /api/admin/events/{id} — admin only, refused once tickets exist
pub async fn delete_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    EventService::delete(&state.db, id).await.map_err(event_error)?;
    tracing::info!(event_id = %id, user_id = %user.user_id, "Event deleted");
    Ok(Json(json!({ "success": true })))
}
