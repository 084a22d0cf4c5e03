pub mod ambassadors;
pub mod broadcast;
pub mod checkout;
pub mod events;
pub mod health;
pub mod locations;
pub mod metrics;
pub mod settings;
pub mod social;
pub mod tickets;
pub mod webhook;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

/// Error half of every JSON handler.
pub type ApiError = (StatusCode, Json<Value>);

pub fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

/// Log the cause and answer a generic 500.
pub fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Request failed: {e}");
    error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}
