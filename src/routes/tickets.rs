use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{error, internal, ApiError};
use crate::{
    middleware::auth::AdminUser,
    models::{
        auth::AuthenticatedUser,
        ticket::{ExportQuery, ReconcileRequest, RefundRequest, TicketSearchQuery},
    },
    services::tickets::{TicketError, TicketService},
    state::AppState,
};

const DEFAULT_RECONCILE_HOURS: i64 = 48;

fn ticket_error(e: TicketError) -> ApiError {
    let message = e.to_string();
    match e {
        TicketError::NotFound => error(StatusCode::NOT_FOUND, &message),
        TicketError::NotPaid | TicketError::Voided(_) | TicketError::NotRefundable(_) | TicketError::NoPayment => {
            error(StatusCode::CONFLICT, &message)
        }
        TicketError::AlreadyCheckedIn { at } => (
            StatusCode::CONFLICT,
            Json(json!({ "error": message, "check_in_at": at })),
        ),
        TicketError::Payment(inner) => {
            tracing::error!("Stripe refund failed: {inner:#}");
            error(StatusCode::BAD_GATEWAY, "Payment provider error")
        }
        TicketError::Database(e) => internal(e),
        TicketError::Other(e) => internal(e),
    }
}

/// GET /api/admin/tickets?q=&status=&event_id= — any staff member
pub async fn search_tickets(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(query): Query<TicketSearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let tickets = TicketService::search(&state.db, &query).await.map_err(internal)?;
    Ok(Json(json!(tickets)))
}

/// GET /api/admin/tickets/{id} — scanner preview
pub async fn get_ticket(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let ticket = TicketService::get(&state.db, id).await.map_err(ticket_error)?;
    Ok(Json(json!(ticket)))
}

/// POST /api/admin/tickets/{id}/check-in — any staff member
pub async fn check_in(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let result = TicketService::check_in(&state.db, id).await.map_err(ticket_error)?;
    tracing::info!(ticket_id = %id, user_id = %user.user_id, "Scan accepted");
    Ok(Json(json!({ "success": true, "ticket": result })))
}

/// POST /api/admin/tickets/{id}/refund — admin only
pub async fn refund_ticket(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<Value>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason).filter(|r| !r.trim().is_empty());
    let ticket = TicketService::refund(&state, id, reason.as_deref())
        .await
        .map_err(ticket_error)?;
    tracing::info!(ticket_id = %id, user_id = %user.user_id, "Refund issued");
    Ok(Json(json!({ "success": true, "ticket": ticket })))
}

/// POST /api/admin/reconcile — admin only
pub async fn reconcile(
    State(state): State<AppState>,
    _admin: AdminUser,
    body: Option<Json<ReconcileRequest>>,
) -> Result<Json<Value>, ApiError> {
    let since_hours = body
        .and_then(|Json(b)| b.since_hours)
        .unwrap_or(DEFAULT_RECONCILE_HOURS);
    let report = TicketService::reconcile(&state, since_hours).await.map_err(|e| {
        tracing::error!("Reconciliation failed: {e:#}");
        error(StatusCode::BAD_GATEWAY, "Reconciliation failed")
    })?;
    Ok(Json(json!(report)))
}

/// GET /api/admin/tickets/export.csv — admin only
pub async fn export_csv(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let csv = TicketService::export_csv(&state.db, query.event_id)
        .await
        .map_err(internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"guests.csv\""),
        ],
        csv,
    ))
}
