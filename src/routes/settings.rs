use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::settings::UpdateSettingsRequest,
    services::settings::SettingsService,
    state::AppState,
};

/// GET /api/admin/settings — admin only, secrets masked
pub async fn get_settings(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Value>, ApiError> {
    let settings = SettingsService::get(&state.db).await.map_err(internal)?;
    Ok(Json(json!(settings.masked())))
}

/// PUT /api/admin/settings — admin only
pub async fn update_settings(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Json(body): Json<UpdateSettingsRequest>,
) -> Result<Json<Value>, ApiError> {
    if let Some(email) = body.notification_email.as_deref().map(str::trim) {
        if !email.is_empty() && !email.contains('@') {
            return Err(error(StatusCode::BAD_REQUEST, "Invalid notification email"));
        }
    }
    let settings = SettingsService::update(&state.db, &body).await.map_err(internal)?;
    tracing::info!(user_id = %user.user_id, "Admin settings updated");
    Ok(Json(json!({ "success": true, "settings": settings.masked() })))
}
