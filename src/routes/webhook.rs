use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use serde_json::{json, Value};

use super::{error, ApiError};
use crate::{
    services::{
        metrics,
        stripe::StripeEvent,
        webhook::{outcome_label, WebhookService},
    },
    state::AppState,
};

/// POST /api/webhook/stripe — verified against `STRIPE_WEBHOOK_SECRET`.
///
/// Non-2xx answers make Stripe retry, so only signature problems and
/// processing failures return errors.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            metrics::webhook("unknown", "invalid_signature");
            error(StatusCode::BAD_REQUEST, "Missing Stripe-Signature header")
        })?;

    match state.stripe.verify_webhook_signature(&body, signature) {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            metrics::webhook("unknown", "invalid_signature");
            tracing::warn!("Rejected Stripe webhook with invalid signature");
            return Err(error(StatusCode::BAD_REQUEST, "Invalid signature"));
        }
    }

    let event: StripeEvent = serde_json::from_slice(&body).map_err(|e| {
        metrics::webhook("unknown", "malformed");
        error(StatusCode::BAD_REQUEST, &format!("Malformed event: {e}"))
    })?;
    let event_type = event.event_type.clone();

    match WebhookService::handle(&state, event).await {
        Ok(outcome) => {
            metrics::webhook(&event_type, outcome_label(&outcome));
            Ok(Json(json!({ "received": true })))
        }
        Err(e) => {
            metrics::webhook(&event_type, "error");
            tracing::error!(%event_type, "Webhook processing failed: {e:#}");
            Err(error(StatusCode::INTERNAL_SERVER_ERROR, "Webhook processing failed"))
        }
    }
}
