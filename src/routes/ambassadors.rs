use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::ambassador::CreateAmbassadorRequest,
    services::ambassadors::{AmbassadorError, AmbassadorService},
    state::AppState,
};

/// GET /api/admin/ambassadors — admin only
pub async fn list_ambassadors(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Value>, ApiError> {
    let rows = AmbassadorService::list(&state.db).await.map_err(internal)?;
    Ok(Json(json!(rows)))
}

/// POST /api/admin/ambassadors — admin only
pub async fn create_ambassador(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<CreateAmbassadorRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let ambassador = AmbassadorService::create(&state.db, &body)
        .await
        .map_err(|e| match e {
            AmbassadorError::Invalid(msg) => error(StatusCode::BAD_REQUEST, &msg),
            taken @ AmbassadorError::CodeTaken(_) => error(StatusCode::CONFLICT, &taken.to_string()),
            AmbassadorError::Database(e) => internal(e),
        })?;
    Ok((StatusCode::CREATED, Json(json!(ambassador))))
}
