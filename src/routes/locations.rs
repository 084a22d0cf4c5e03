use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{internal, ApiError};
use crate::{services::catalog::CatalogService, state::AppState};

/// GET /api/locations — locations with their active products and slots
pub async fn list_locations(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let catalog = CatalogService::list(&state.db).await.map_err(internal)?;
    Ok(Json(json!(catalog)))
}
