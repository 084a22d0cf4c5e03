use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::broadcast::BroadcastRequest,
    services::broadcast::BroadcastService,
    state::AppState,
};

/// POST /api/admin/broadcast — admin only
pub async fn send_broadcast(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<Value>, ApiError> {
    if body.subject.trim().is_empty() || body.body.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "Subject and body are required"));
    }

    let Some(email) = state.email.as_ref() else {
        tracing::warn!("Broadcast requested but email is not configured");
        return Ok(Json(json!({
            "success": false,
            "error": "Email is not configured",
            "recipients": 0,
            "sent": 0,
            "failed": 0,
        })));
    };

    let report = BroadcastService::send(&state.db, email, &body).await.map_err(internal)?;
    tracing::info!(
        user_id = %user.user_id,
        recipients = report.recipients,
        sent = report.sent,
        failed = report.failed,
        "Broadcast sent"
    );
    Ok(Json(json!({
        "success": report.failed == 0,
        "recipients": report.recipients,
        "sent": report.sent,
        "failed": report.failed,
    })))
}
