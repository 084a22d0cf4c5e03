use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::ticket::{ReconcileReport, Ticket, TicketSearchQuery, TicketStatus, TicketSummary},
    services::{
        metrics,
        notifications::AlertKind,
        profiles::ProfileService,
        webhook::{format_amount, FulfillOutcome, WebhookService},
    },
    state::AppState,
};

const SEARCH_LIMIT: i64 = 50;
const SUMMARY_SELECT: &str = "SELECT t.id, t.status, t.tier_id, t.quantity, t.amount_cents, t.currency,
            t.check_in_at, t.created_at,
            COALESCE(p.full_name, t.customer_name) AS guest_name,
            COALESCE(p.email, t.customer_email) AS guest_email,
            t.event_id, e.title AS event_title, a.code AS ambassador_code
     FROM tickets t
     LEFT JOIN profiles p ON p.id = t.profile_id
     LEFT JOIN app_events e ON e.id = t.event_id
     LEFT JOIN ambassadors a ON a.id = t.ambassador_id";

#[derive(Debug, thiserror::Error)]
pub enum TicketError {
    #[error("Ticket not found")]
    NotFound,
    #[error("Payment not completed for this ticket")]
    NotPaid,
    #[error("Ticket was {0}")]
    Voided(TicketStatus),
    #[error("Already checked in")]
    AlreadyCheckedIn { at: Option<DateTime<Utc>> },
    #[error("Only paid tickets can be refunded (status: {0})")]
    NotRefundable(TicketStatus),
    #[error("Ticket has no Stripe payment to refund")]
    NoPayment,
    #[error("Payment provider error: {0}")]
    Payment(anyhow::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of a successful door scan.
#[derive(Debug, Serialize)]
pub struct CheckInResult {
    pub ticket_id: Uuid,
    pub guest_name: Option<String>,
    pub quantity: i32,
    pub check_in_at: DateTime<Utc>,
}

/// Decide whether a ticket in `status` may be admitted.
pub fn check_in_decision(
    status: TicketStatus,
    check_in_at: Option<DateTime<Utc>>,
) -> Result<(), TicketError> {
    if status.can_transition_to(TicketStatus::Used) {
        return Ok(());
    }
    if status.is_terminal() {
        return Err(TicketError::Voided(status));
    }
    match status {
        TicketStatus::Pending => Err(TicketError::NotPaid),
        _ => Err(TicketError::AlreadyCheckedIn { at: check_in_at }),
    }
}

/// ILIKE pattern with the user's wildcards escaped.
pub fn like_pattern(q: &str) -> String {
    let escaped = q
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub struct TicketService;

impl TicketService {
    pub async fn search(pool: &PgPool, query: &TicketSearchQuery) -> anyhow::Result<Vec<TicketSummary>> {
        let pattern = query
            .q
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .map(like_pattern);
        let rows = sqlx::query_as::<_, TicketSummary>(&format!(
            "{SUMMARY_SELECT}
             WHERE ($1::TEXT IS NULL
                    OR p.full_name ILIKE $1 OR p.email ILIKE $1
                    OR t.customer_name ILIKE $1 OR t.customer_email ILIKE $1)
               AND ($2::TEXT IS NULL OR t.status = $2)
               AND ($3::UUID IS NULL OR t.event_id = $3)
             ORDER BY t.created_at DESC
             LIMIT $4"
        ))
        .bind(pattern)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.event_id)
        .bind(SEARCH_LIMIT)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<TicketSummary, TicketError> {
        sqlx::query_as::<_, TicketSummary>(&format!("{SUMMARY_SELECT} WHERE t.id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(TicketError::NotFound)
    }

    async fn load(pool: &PgPool, id: Uuid) -> Result<Ticket, TicketError> {
        sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(TicketError::NotFound)
    }

    /// Door scan. The update only matches an `active` row, so two scanners
    /// racing on the same QR code admit the guest once.
    pub async fn check_in(pool: &PgPool, id: Uuid) -> Result<CheckInResult, TicketError> {
        let ticket = Self::load(pool, id).await?;
        let status = ticket.status()?;
        if let Err(e) = check_in_decision(status, ticket.check_in_at) {
            metrics::check_in("rejected");
            return Err(e);
        }

        let stamped: Option<DateTime<Utc>> = sqlx::query_scalar(
            "UPDATE tickets SET status = 'used', check_in_at = NOW(), updated_at = NOW()
             WHERE id = $1 AND status = ANY($2)
             RETURNING check_in_at",
        )
        .bind(id)
        .bind(TicketStatus::sources_of(TicketStatus::Used))
        .fetch_optional(pool)
        .await?
        .flatten();

        let Some(check_in_at) = stamped else {
            // Lost the race: report the winner's state.
            let current = Self::load(pool, id).await?;
            metrics::check_in("rejected");
            return Err(match check_in_decision(current.status()?, current.check_in_at) {
                Err(e) => e,
                Ok(()) => TicketError::AlreadyCheckedIn { at: current.check_in_at },
            });
        };

        metrics::check_in("admitted");
        tracing::info!(ticket_id = %id, "Guest checked in");
        let summary = Self::get(pool, id).await?;
        Ok(CheckInResult {
            ticket_id: id,
            guest_name: summary.guest_name,
            quantity: ticket.quantity,
            check_in_at,
        })
    }

    /// Refund through Stripe, then mark the ticket. Guest email and staff
    /// alerts are best effort and only follow a refund this call recorded.
    pub async fn refund(
        state: &AppState,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        let pool = &state.db;
        let ticket = Self::load(pool, id).await?;
        let status = ticket.status()?;
        if !status.can_transition_to(TicketStatus::Refunded) {
            return Err(TicketError::NotRefundable(status));
        }

        let payment_intent = match &ticket.stripe_payment_intent {
            Some(pi) => pi.clone(),
            None => {
                let session_id = ticket.stripe_session_id.as_deref().ok_or(TicketError::NoPayment)?;
                let session = state
                    .stripe
                    .retrieve_checkout_session(session_id)
                    .await
                    .map_err(TicketError::Payment)?;
                session.payment_intent.ok_or(TicketError::NoPayment)?
            }
        };

        let refund = state
            .stripe
            .create_refund(&payment_intent, id)
            .await
            .map_err(TicketError::Payment)?;

        let Some(updated) = Self::mark_refunded(pool, id, &payment_intent).await? else {
            // The charge.refunded webhook or another refund got there first
            // and already settled the loyalty counter.
            let current = Self::load(pool, id).await?;
            tracing::info!(
                ticket_id = %id,
                refund_id = %refund.id,
                status = %current.status,
                "Ticket left its refundable state during the refund"
            );
            return Ok(current);
        };

        metrics::REFUNDS_COUNTER.inc();
        tracing::info!(ticket_id = %id, refund_id = %refund.id, "Ticket refunded");

        let summary = Self::get(pool, id).await?;
        let amount = format_amount(refund.amount, &updated.currency);
        let event_title = summary.event_title.clone().unwrap_or_else(|| "your booking".into());

        if let (Some(email), Some(to)) = (&state.email, summary.guest_email.as_deref()) {
            let name = summary.guest_name.as_deref().unwrap_or("");
            if let Err(e) = email.send_refund_notice(to, name, &event_title, &amount).await {
                metrics::email_failed("refund");
                tracing::warn!(ticket_id = %id, "Refund email failed: {e}");
            }
        }

        let body = format!(
            "{} <{}>\n{}\n{}{}",
            summary.guest_name.as_deref().unwrap_or("Guest"),
            summary.guest_email.as_deref().unwrap_or("-"),
            event_title,
            amount,
            reason.map(|r| format!("\nReason: {r}")).unwrap_or_default()
        );
        state
            .notifications
            .notify_admins(pool, state.email.as_ref(), AlertKind::Refund, "Ticket refunded", &body)
            .await;

        Ok(updated)
    }

    /// Flip a paid ticket to `refunded` and take back its loyalty points.
    /// Returns `None` when the ticket is no longer active or used.
    pub(crate) async fn mark_refunded(
        pool: &PgPool,
        id: Uuid,
        payment_intent: &str,
    ) -> Result<Option<Ticket>, TicketError> {
        let updated = sqlx::query_as::<_, Ticket>(
            "UPDATE tickets SET status = 'refunded', stripe_payment_intent = $2, updated_at = NOW()
             WHERE id = $1 AND status = ANY($3)
             RETURNING *",
        )
        .bind(id)
        .bind(payment_intent)
        .bind(TicketStatus::sources_of(TicketStatus::Refunded))
        .fetch_optional(pool)
        .await?;

        if let Some(ticket) = &updated {
            if let Some(profile_id) = ticket.profile_id {
                if let Err(e) = ProfileService::adjust_sweats(pool, profile_id, -ticket.quantity).await {
                    tracing::warn!(%profile_id, "Loyalty decrement failed: {e}");
                }
            }
        }
        Ok(updated)
    }

    /// Re-run fulfilment for paid sessions whose webhook never arrived.
    pub async fn reconcile(state: &AppState, since_hours: i64) -> anyhow::Result<ReconcileReport> {
        let since_hours = since_hours.clamp(1, 24 * 30);
        let since = (Utc::now() - chrono::Duration::hours(since_hours)).timestamp();
        let sessions = state.stripe.list_completed_sessions(since).await?;

        let paid: Vec<_> = sessions.into_iter().filter(|s| s.is_paid()).collect();
        let ids: Vec<String> = paid.iter().map(|s| s.id.clone()).collect();
        let settled: Vec<String> = sqlx::query_scalar(
            "SELECT stripe_session_id FROM tickets
             WHERE stripe_session_id = ANY($1) AND status <> 'pending'",
        )
        .bind(&ids)
        .fetch_all(&state.db)
        .await?;

        let mut report = ReconcileReport {
            checked: paid.len(),
            fulfilled: 0,
            session_ids: Vec::new(),
        };
        for session in paid.iter().filter(|s| !settled.contains(&s.id)) {
            match WebhookService::fulfill_session(state, session).await {
                Ok(FulfillOutcome::Activated { ticket_id }) => {
                    tracing::info!(session_id = %session.id, %ticket_id, "Reconciled missed checkout");
                    report.fulfilled += 1;
                    report.session_ids.push(session.id.clone());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(session_id = %session.id, "Reconciliation failed: {e}"),
            }
        }
        Ok(report)
    }

    /// Door list as CSV, ordered by guest name.
    pub async fn export_csv(pool: &PgPool, event_id: Option<Uuid>) -> anyhow::Result<Vec<u8>> {
        let rows = sqlx::query_as::<_, TicketSummary>(&format!(
            "{SUMMARY_SELECT}
             WHERE t.status IN ('active', 'used')
               AND ($1::UUID IS NULL OR t.event_id = $1)
             ORDER BY guest_name NULLS LAST, t.created_at"
        ))
        .bind(event_id)
        .fetch_all(pool)
        .await?;
        write_csv(&rows)
    }
}

pub fn write_csv(rows: &[TicketSummary]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "ticket_id", "name", "email", "event", "tier", "quantity", "status", "checked_in_at", "referral",
    ])?;
    for r in rows {
        writer.write_record([
            r.id.to_string(),
            r.guest_name.clone().unwrap_or_default(),
            r.guest_email.clone().unwrap_or_default(),
            r.event_title.clone().unwrap_or_default(),
            r.tier_id.clone().unwrap_or_default(),
            r.quantity.to_string(),
            r.status.clone(),
            r.check_in_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            r.ambassador_code.clone().unwrap_or_default(),
        ])?;
    }
    Ok(writer.into_inner().map_err(|e| anyhow::anyhow!("CSV flush failed: {e}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_profile, seed_ticket, status_of, sweats, TicketSeed};

    #[test]
    fn only_active_tickets_are_admitted() {
        assert!(check_in_decision(TicketStatus::Active, None).is_ok());
        assert!(matches!(
            check_in_decision(TicketStatus::Pending, None),
            Err(TicketError::NotPaid)
        ));
        assert!(matches!(
            check_in_decision(TicketStatus::Refunded, None),
            Err(TicketError::Voided(TicketStatus::Refunded))
        ));
        assert!(matches!(
            check_in_decision(TicketStatus::Cancelled, None),
            Err(TicketError::Voided(TicketStatus::Cancelled))
        ));
    }

    #[test]
    fn second_scan_reports_first_check_in_time() {
        let at = Utc::now();
        match check_in_decision(TicketStatus::Used, Some(at)) {
            Err(TicketError::AlreadyCheckedIn { at: Some(t) }) => assert_eq!(t, at),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" aino "), "%aino%");
        assert_eq!(like_pattern("100%_"), "%100\\%\\_%");
    }

    #[test]
    fn csv_has_header_and_one_line_per_ticket() {
        let row = TicketSummary {
            id: Uuid::nil(),
            status: "used".into(),
            tier_id: Some("evening".into()),
            quantity: 2,
            amount_cents: 7000,
            currency: "eur".into(),
            check_in_at: None,
            created_at: Utc::now(),
            guest_name: Some("Virtanen, Aino".into()),
            guest_email: Some("aino@example.fi".into()),
            event_id: None,
            event_title: Some("Midsummer".into()),
            ambassador_code: None,
        };
        let out = String::from_utf8(write_csv(&[row]).unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ticket_id,name,email"));
        assert!(lines[1].contains("\"Virtanen, Aino\""));
        assert!(lines[1].contains(",2,used,"));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn refund_never_overwrites_a_cancelled_ticket(pool: PgPool) {
        let profile_id = seed_profile(&pool, "aino@example.fi", 5).await;
        let id = seed_ticket(
            &pool,
            TicketSeed {
                profile_id: Some(profile_id),
                status: "cancelled",
                quantity: 2,
                payment_intent: Some("pi_cancelled"),
                ..TicketSeed::default()
            },
        )
        .await;

        let updated = TicketService::mark_refunded(&pool, id, "pi_cancelled").await.unwrap();
        assert!(updated.is_none());
        assert_eq!(status_of(&pool, id).await, "cancelled");
        assert_eq!(sweats(&pool, profile_id).await, 5);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn refund_takes_loyalty_points_back_once(pool: PgPool) {
        let profile_id = seed_profile(&pool, "eero@example.fi", 5).await;
        let id = seed_ticket(
            &pool,
            TicketSeed {
                profile_id: Some(profile_id),
                status: "used",
                quantity: 2,
                ..TicketSeed::default()
            },
        )
        .await;

        let first = TicketService::mark_refunded(&pool, id, "pi_used").await.unwrap();
        let ticket = first.expect("used ticket is refundable");
        assert_eq!(ticket.status().unwrap(), TicketStatus::Refunded);
        assert_eq!(ticket.stripe_payment_intent.as_deref(), Some("pi_used"));
        assert_eq!(sweats(&pool, profile_id).await, 3);

        let again = TicketService::mark_refunded(&pool, id, "pi_used").await.unwrap();
        assert!(again.is_none());
        assert_eq!(sweats(&pool, profile_id).await, 3);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn pending_ticket_is_not_refunded(pool: PgPool) {
        let id = seed_ticket(&pool, TicketSeed::default()).await;
        assert!(TicketService::mark_refunded(&pool, id, "pi_x").await.unwrap().is_none());
        assert_eq!(status_of(&pool, id).await, "pending");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn check_in_admits_once_and_reports_first_scan(pool: PgPool) {
        let id = seed_ticket(
            &pool,
            TicketSeed {
                status: "active",
                ..TicketSeed::default()
            },
        )
        .await;

        let admitted = TicketService::check_in(&pool, id).await.unwrap();
        assert_eq!(admitted.ticket_id, id);
        assert_eq!(status_of(&pool, id).await, "used");

        match TicketService::check_in(&pool, id).await {
            Err(TicketError::AlreadyCheckedIn { at: Some(at) }) => assert_eq!(at, admitted.check_in_at),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn racing_scanners_admit_one_guest(pool: PgPool) {
        let id = seed_ticket(
            &pool,
            TicketSeed {
                status: "active",
                ..TicketSeed::default()
            },
        )
        .await;

        let (a, b) = tokio::join!(
            TicketService::check_in(&pool, id),
            TicketService::check_in(&pool, id)
        );
        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(TicketError::AlreadyCheckedIn { .. })));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn check_in_rejects_unpaid_and_voided_tickets(pool: PgPool) {
        let pending = seed_ticket(&pool, TicketSeed::default()).await;
        let refunded = seed_ticket(
            &pool,
            TicketSeed {
                status: "refunded",
                ..TicketSeed::default()
            },
        )
        .await;

        assert!(matches!(
            TicketService::check_in(&pool, pending).await,
            Err(TicketError::NotPaid)
        ));
        assert!(matches!(
            TicketService::check_in(&pool, refunded).await,
            Err(TicketError::Voided(TicketStatus::Refunded))
        ));
        assert!(matches!(
            TicketService::check_in(&pool, Uuid::new_v4()).await,
            Err(TicketError::NotFound)
        ));
        assert_eq!(status_of(&pool, pending).await, "pending");
    }
}
