use futures_util::{stream, StreamExt};
use sqlx::PgPool;

use crate::{
    models::{
        broadcast::{BroadcastReport, BroadcastRequest},
        ticket::TicketStatus,
    },
    services::{email::EmailService, metrics},
};

/// Emails in flight at once.
const SEND_CONCURRENCY: usize = 5;

pub struct BroadcastService;

impl BroadcastService {
    /// Distinct ticket holders, optionally limited to one event.
    pub async fn recipients(
        pool: &PgPool,
        req: &BroadcastRequest,
    ) -> anyhow::Result<Vec<(String, String)>> {
        let statuses: Vec<&str> = req
            .statuses
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| s.iter().map(TicketStatus::as_str).collect())
            .unwrap_or_else(|| vec!["active", "used"]);

        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT ON (LOWER(COALESCE(p.email, t.customer_email)))
                    COALESCE(p.email, t.customer_email) AS email,
                    COALESCE(p.full_name, t.customer_name, '') AS name
             FROM tickets t
             LEFT JOIN profiles p ON p.id = t.profile_id
             WHERE t.status = ANY($1)
               AND ($2::UUID IS NULL OR t.event_id = $2)
               AND COALESCE(p.email, t.customer_email) IS NOT NULL
             ORDER BY LOWER(COALESCE(p.email, t.customer_email))",
        )
        .bind(&statuses)
        .bind(req.event_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn send(
        pool: &PgPool,
        email: &EmailService,
        req: &BroadcastRequest,
    ) -> anyhow::Result<BroadcastReport> {
        let recipients = Self::recipients(pool, req).await?;
        let total = recipients.len();

        let results: Vec<bool> = stream::iter(recipients)
            .map(|(to, name)| async move {
                match email.send_broadcast(&to, &name, &req.subject, &req.body).await {
                    Ok(()) => true,
                    Err(e) => {
                        metrics::email_failed("broadcast");
                        tracing::warn!("Broadcast to {to} failed: {e}");
                        false
                    }
                }
            })
            .buffer_unordered(SEND_CONCURRENCY)
            .collect()
            .await;

        let sent = results.iter().filter(|ok| **ok).count();
        tracing::info!(total, sent, "Broadcast finished");
        Ok(BroadcastReport {
            recipients: total,
            sent,
            failed: total - sent,
        })
    }
}
