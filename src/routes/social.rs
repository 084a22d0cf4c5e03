use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::social::PublishRequest,
    services::social::{MetaPublisher, SocialImageForm, SocialService},
    state::AppState,
};

/// POST /api/social/generate-image — admin only, multipart
pub async fn generate_image(
    State(state): State<AppState>,
    _admin: AdminUser,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = SocialImageForm::from_multipart(multipart)
        .await
        .map_err(|e| error(StatusCode::BAD_REQUEST, &e.to_string()))?;
    let image = SocialService::generate(&state.config, form).await.map_err(internal)?;
    Ok(Json(json!({ "success": true, "image": image })))
}

/// POST /api/social/publish — admin only
pub async fn publish(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(body): Json<PublishRequest>,
) -> Result<Json<Value>, ApiError> {
    if !body.image_url.starts_with("https://") && !body.image_url.starts_with("http://") {
        return Err(error(StatusCode::BAD_REQUEST, "image_url must be an absolute URL"));
    }
    if body.targets.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "No publish targets given"));
    }
    let results = MetaPublisher::new(&state.config)
        .publish(&body.image_url, &body.caption, &body.targets)
        .await;
    let success = results.iter().all(|r| r.error.is_none());
    Ok(Json(json!({ "success": success, "results": results })))
}
