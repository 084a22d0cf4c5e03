use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::ticket::TicketStatus,
    services::{
        email::TicketEmail,
        events::EventService,
        metrics,
        notifications::AlertKind,
        profiles::ProfileService,
        stripe::{meta, Charge, CheckoutSession, SessionMetadata, StripeEvent},
    },
    state::AppState,
};

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// What a single webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Fulfilled(FulfillOutcome),
    ReservationReleased { released: bool },
    Cancelled { ticket_id: Option<Uuid> },
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillOutcome {
    /// The ticket became active on this call.
    Activated { ticket_id: Uuid },
    /// An earlier delivery (or reconciliation) already handled the session.
    AlreadyProcessed { ticket_id: Uuid, status: String },
    /// The session is not paid yet (async payment methods).
    Unpaid,
    /// The session carries no ticket metadata, e.g. a Payment Link sale.
    NotTicketSale,
}

pub struct WebhookService;

impl WebhookService {
    pub async fn handle(state: &AppState, event: StripeEvent) -> anyhow::Result<WebhookOutcome> {
        let outcome = match event.event_type.as_str() {
            CHECKOUT_COMPLETED => {
                let session: CheckoutSession = serde_json::from_value(event.data.object)?;
                match Self::fulfill_session(state, &session).await? {
                    FulfillOutcome::NotTicketSale => {
                        WebhookOutcome::Ignored(format!("{CHECKOUT_COMPLETED} without ticket metadata"))
                    }
                    outcome => WebhookOutcome::Fulfilled(outcome),
                }
            }
            CHECKOUT_EXPIRED => {
                let session: CheckoutSession = serde_json::from_value(event.data.object)?;
                let released = Self::release_reservation(&state.db, &session.id).await?;
                WebhookOutcome::ReservationReleased { released }
            }
            CHARGE_REFUNDED => {
                let charge: Charge = serde_json::from_value(event.data.object)?;
                let ticket_id = match Self::session_for_charge(state, &charge).await? {
                    Some(session_id) => Self::cancel_session_ticket(&state.db, &session_id).await?,
                    None => {
                        tracing::warn!(charge_id = %charge.id, "Refunded charge has no matching checkout session");
                        None
                    }
                };
                WebhookOutcome::Cancelled { ticket_id }
            }
            other => WebhookOutcome::Ignored(other.to_string()),
        };
        tracing::info!(event_id = %event.id, event_type = %event.event_type, ?outcome, "Stripe webhook handled");
        Ok(outcome)
    }

    /// Turn a paid Checkout Session into an active ticket.
    ///
    /// Idempotent per session id: the pending row is flipped with a
    /// conditional update, so only one delivery can activate it and only that
    /// delivery sends email and bumps the loyalty counter.
    pub async fn fulfill_session(
        state: &AppState,
        session: &CheckoutSession,
    ) -> anyhow::Result<FulfillOutcome> {
        if let Some(skipped) = skip_reason(session) {
            tracing::info!(session_id = %session.id, ?skipped, "Completed session does not become a ticket");
            return Ok(skipped);
        }

        let details = SessionMetadata::from_session(session)?;
        let outcome = Self::record_sale(&state.db, session, &details).await?;
        if let FulfillOutcome::Activated { ticket_id } = outcome {
            Self::after_activation(state, &details, ticket_id, session.amount_total).await;
        }
        Ok(outcome)
    }

    /// Database half of fulfilment: guest profile, ticket row and loyalty
    /// points. Points move only when this call activated the ticket.
    pub(crate) async fn record_sale(
        pool: &PgPool,
        session: &CheckoutSession,
        details: &SessionMetadata,
    ) -> anyhow::Result<FulfillOutcome> {
        let profile = ProfileService::upsert(pool, &details.guest).await?;
        let ambassador_id = match &details.referral_code {
            Some(code) => Self::resolve_ambassador(pool, code).await?,
            None => None,
        };

        let ticket_id = match Self::activate_pending(pool, session, details, profile.id, ambassador_id).await? {
            Some(id) => id,
            None => match Self::insert_active(pool, session, details, profile.id, ambassador_id).await? {
                Some(id) => id,
                None => {
                    let (id, status): (Uuid, String) = sqlx::query_as(
                        "SELECT id, status FROM tickets WHERE stripe_session_id = $1",
                    )
                    .bind(&session.id)
                    .fetch_one(pool)
                    .await?;
                    tracing::info!(session_id = %session.id, %status, "Session already fulfilled");
                    return Ok(FulfillOutcome::AlreadyProcessed { ticket_id: id, status });
                }
            },
        };

        if let Err(e) = ProfileService::adjust_sweats(pool, profile.id, details.quantity as i32).await {
            tracing::warn!(profile_id = %profile.id, "Loyalty increment failed: {e}");
        }
        Ok(FulfillOutcome::Activated { ticket_id })
    }

    async fn activate_pending(
        pool: &PgPool,
        session: &CheckoutSession,
        details: &SessionMetadata,
        profile_id: Uuid,
        ambassador_id: Option<Uuid>,
    ) -> anyhow::Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE tickets
             SET status = 'active',
                 profile_id = $2,
                 ambassador_id = COALESCE($3, ambassador_id),
                 stripe_payment_intent = COALESCE($4, stripe_payment_intent),
                 amount_cents = COALESCE($5, amount_cents),
                 customer_email = $6,
                 updated_at = NOW()
             WHERE stripe_session_id = $1 AND status = 'pending'
             RETURNING id",
        )
        .bind(&session.id)
        .bind(profile_id)
        .bind(ambassador_id)
        .bind(&session.payment_intent)
        .bind(session.amount_total)
        .bind(details.guest.normalized_email())
        .fetch_optional(pool)
        .await?;
        Ok(id)
    }

    /// Covers sessions whose pending row was never written or already
    /// released by the expiry webhook.
    async fn insert_active(
        pool: &PgPool,
        session: &CheckoutSession,
        details: &SessionMetadata,
        profile_id: Uuid,
        ambassador_id: Option<Uuid>,
    ) -> anyhow::Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO tickets (profile_id, event_id, product_id, tier_id, ambassador_id, status, quantity,
                                  amount_cents, currency, customer_email, customer_name,
                                  stripe_session_id, stripe_payment_intent)
             VALUES ($1, $2, $3, $4, $5, 'active', $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (stripe_session_id) DO NOTHING
             RETURNING id",
        )
        .bind(profile_id)
        .bind(details.event_id)
        .bind(details.product_id)
        .bind(&details.price_id)
        .bind(ambassador_id)
        .bind(details.quantity as i32)
        .bind(session.amount_total.unwrap_or(0))
        .bind(session.currency.as_deref().unwrap_or("eur"))
        .bind(details.guest.normalized_email())
        .bind(details.guest.name.trim())
        .bind(&session.id)
        .bind(&session.payment_intent)
        .fetch_optional(pool)
        .await?;
        Ok(id)
    }

    /// Side effects of a sale. None of them can undo the activation.
    async fn after_activation(
        state: &AppState,
        details: &SessionMetadata,
        ticket_id: Uuid,
        amount_total: Option<i64>,
    ) {
        let pool = &state.db;
        let (event_title, tier_name) = match EventService::find_tier(pool, &details.price_id).await {
            Ok(Some((event, tier))) => (event.title, tier.name),
            _ => ("Saunafest".to_string(), details.price_id.clone()),
        };

        if let Some(email) = &state.email {
            let msg = TicketEmail {
                to_email: &details.guest.email,
                to_name: &details.guest.name,
                ticket_id,
                event_title: &event_title,
                tier_name: &tier_name,
                quantity: details.quantity,
            };
            if let Err(e) = email.send_ticket_confirmation(&msg).await {
                metrics::email_failed("confirmation");
                tracing::warn!(%ticket_id, "Confirmation email failed: {e}");
            }
        }

        let amount = amount_total
            .map(|cents| format_amount(cents, state.config.currency.as_str()))
            .unwrap_or_default();
        let body = format!(
            "{} × {} — {}\n{} <{}>\n{}",
            details.quantity,
            tier_name,
            event_title,
            details.guest.name,
            details.guest.normalized_email(),
            amount
        );
        state
            .notifications
            .notify_admins(pool, state.email.as_ref(), AlertKind::Sale, "New ticket sale", &body)
            .await;
    }

    async fn resolve_ambassador(pool: &PgPool, code: &str) -> anyhow::Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM ambassadors WHERE UPPER(code) = UPPER($1) AND is_active = TRUE",
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;
        if id.is_none() {
            tracing::info!(code, "Referral code did not match an ambassador");
        }
        Ok(id)
    }

    /// Drop the reservation of an abandoned checkout.
    pub async fn release_reservation(pool: &PgPool, session_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "DELETE FROM tickets WHERE stripe_session_id = $1 AND status = 'pending'",
        )
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel the ticket of a refunded checkout and take its loyalty points
    /// back. Tickets already cancelled or refunded are left alone.
    pub(crate) async fn cancel_session_ticket(
        pool: &PgPool,
        session_id: &str,
    ) -> anyhow::Result<Option<Uuid>> {
        let row: Option<(Uuid, Option<Uuid>, i32)> = sqlx::query_as(
            "UPDATE tickets SET status = 'cancelled', updated_at = NOW()
             WHERE stripe_session_id = $1 AND status = ANY($2)
             RETURNING id, profile_id, quantity",
        )
        .bind(session_id)
        .bind(TicketStatus::sources_of(TicketStatus::Cancelled))
        .fetch_optional(pool)
        .await?;

        let Some((ticket_id, profile_id, quantity)) = row else {
            tracing::info!(%session_id, "Ticket already cancelled or refunded");
            return Ok(None);
        };

        if let Some(profile_id) = profile_id {
            if let Err(e) = ProfileService::adjust_sweats(pool, profile_id, -quantity).await {
                tracing::warn!(%profile_id, "Loyalty decrement failed: {e}");
            }
        }
        Ok(Some(ticket_id))
    }

    /// Our own record of the payment intent first, then Stripe.
    async fn session_for_charge(state: &AppState, charge: &Charge) -> anyhow::Result<Option<String>> {
        let Some(payment_intent) = charge.payment_intent.as_deref() else {
            return Ok(None);
        };

        let known: Option<Option<String>> = sqlx::query_scalar(
            "SELECT stripe_session_id FROM tickets WHERE stripe_payment_intent = $1 LIMIT 1",
        )
        .bind(payment_intent)
        .fetch_optional(&state.db)
        .await?;
        if let Some(Some(id)) = known {
            return Ok(Some(id));
        }

        let sessions = state.stripe.sessions_for_payment_intent(payment_intent).await?;
        Ok(sessions.into_iter().next().map(|s| s.id))
    }
}

/// Unpaid sessions wait for a later delivery; sessions without our
/// `price_id` metadata were not created by ticket checkout.
fn skip_reason(session: &CheckoutSession) -> Option<FulfillOutcome> {
    if !session.is_paid() {
        Some(FulfillOutcome::Unpaid)
    } else if !session.metadata.contains_key(meta::PRICE_ID) {
        Some(FulfillOutcome::NotTicketSale)
    } else {
        None
    }
}

/// Upper-cased ISO code after the amount, e.g. "35.00 EUR".
pub fn format_amount(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}{}.{:02} {}", cents / 100, cents % 100, currency.to_uppercase())
}

pub fn outcome_label(outcome: &WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Fulfilled(FulfillOutcome::Activated { .. }) => "activated",
        WebhookOutcome::Fulfilled(FulfillOutcome::AlreadyProcessed { .. }) => "duplicate",
        WebhookOutcome::Fulfilled(FulfillOutcome::Unpaid) => "unpaid",
        WebhookOutcome::Fulfilled(FulfillOutcome::NotTicketSale) => "ignored",
        WebhookOutcome::ReservationReleased { .. } => "released",
        WebhookOutcome::Cancelled { ticket_id: Some(_) } => "cancelled",
        WebhookOutcome::Cancelled { ticket_id: None } => "noop",
        WebhookOutcome::Ignored(_) => "ignored",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_profile, seed_ticket, status_of, sweats, sweats_for, TicketSeed};
    use serde_json::json;

    fn paid_session(id: &str, metadata: serde_json::Value) -> CheckoutSession {
        serde_json::from_value(json!({
            "id": id,
            "payment_status": "paid",
            "payment_intent": format!("pi_{id}"),
            "amount_total": 5000,
            "currency": "eur",
            "metadata": metadata,
        }))
        .unwrap()
    }

    fn ticket_metadata(email: &str) -> serde_json::Value {
        json!({
            "customer_name": "Aino Virtanen",
            "customer_email": email,
            "price_id": "tier_evening",
            "quantity": "2",
            "waiver_accepted": "true",
        })
    }

    #[test]
    fn sessions_without_ticket_metadata_are_skipped() {
        let link_sale = paid_session("cs_link", json!({ "customer_email": "x@example.fi" }));
        assert_eq!(skip_reason(&link_sale), Some(FulfillOutcome::NotTicketSale));
        assert_eq!(
            outcome_label(&WebhookOutcome::Fulfilled(FulfillOutcome::NotTicketSale)),
            "ignored"
        );

        let mut unpaid = paid_session("cs_unpaid", ticket_metadata("x@example.fi"));
        unpaid.payment_status = Some("unpaid".into());
        assert_eq!(skip_reason(&unpaid), Some(FulfillOutcome::Unpaid));

        let sale = paid_session("cs_sale", ticket_metadata("x@example.fi"));
        assert_eq!(skip_reason(&sale), None);
    }

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_amount(3550, "eur"), "35.50 EUR");
        assert_eq!(format_amount(5, "usd"), "0.05 USD");
        assert_eq!(format_amount(-1200, "eur"), "-12.00 EUR");
    }

    #[test]
    fn events_parse_into_typed_objects() {
        let event: StripeEvent = serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": "charge.refunded",
            "data": { "object": {
                "id": "ch_1",
                "payment_intent": "pi_1",
                "amount_refunded": 3500,
                "metadata": {}
            }}
        }))
        .unwrap();
        assert_eq!(event.event_type, CHARGE_REFUNDED);
        let charge: Charge = serde_json::from_value(event.data.object).unwrap();
        assert_eq!(charge.payment_intent.as_deref(), Some("pi_1"));
        assert_eq!(charge.amount_refunded, 3500);
    }

    #[test]
    fn outcome_labels_distinguish_duplicates() {
        let first = WebhookOutcome::Fulfilled(FulfillOutcome::Activated { ticket_id: Uuid::nil() });
        let again = WebhookOutcome::Fulfilled(FulfillOutcome::AlreadyProcessed {
            ticket_id: Uuid::nil(),
            status: "active".into(),
        });
        assert_eq!(outcome_label(&first), "activated");
        assert_eq!(outcome_label(&again), "duplicate");
        assert_eq!(outcome_label(&WebhookOutcome::Ignored("invoice.paid".into())), "ignored");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_delivery_activates_once(pool: PgPool) {
        let session = paid_session("cs_dup", ticket_metadata("aino@example.fi"));
        let details = SessionMetadata::from_session(&session).unwrap();
        let pending = seed_ticket(
            &pool,
            TicketSeed {
                tier_id: Some("tier_evening"),
                quantity: 2,
                session_id: Some("cs_dup"),
                ..TicketSeed::default()
            },
        )
        .await;

        let first = WebhookService::record_sale(&pool, &session, &details).await.unwrap();
        assert_eq!(first, FulfillOutcome::Activated { ticket_id: pending });
        let second = WebhookService::record_sale(&pool, &session, &details).await.unwrap();
        assert_eq!(
            second,
            FulfillOutcome::AlreadyProcessed { ticket_id: pending, status: "active".into() }
        );

        assert_eq!(status_of(&pool, pending).await, "active");
        assert_eq!(sweats_for(&pool, "aino@example.fi").await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn sale_without_reservation_inserts_one_ticket(pool: PgPool) {
        let session = paid_session("cs_late", ticket_metadata("eero@example.fi"));
        let details = SessionMetadata::from_session(&session).unwrap();

        let (a, b) = tokio::join!(
            WebhookService::record_sale(&pool, &session, &details),
            WebhookService::record_sale(&pool, &session, &details)
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        let activated = outcomes
            .iter()
            .filter(|o| matches!(o, FulfillOutcome::Activated { .. }))
            .count();
        assert_eq!(activated, 1);

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE stripe_session_id = 'cs_late'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(sweats_for(&pool, "eero@example.fi").await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn expiry_releases_only_pending_reservations(pool: PgPool) {
        let pending = seed_ticket(
            &pool,
            TicketSeed {
                session_id: Some("cs_abandoned"),
                ..TicketSeed::default()
            },
        )
        .await;
        let paid = seed_ticket(
            &pool,
            TicketSeed {
                status: "active",
                session_id: Some("cs_paid"),
                ..TicketSeed::default()
            },
        )
        .await;

        assert!(WebhookService::release_reservation(&pool, "cs_abandoned").await.unwrap());
        assert!(!WebhookService::release_reservation(&pool, "cs_abandoned").await.unwrap());
        assert!(!WebhookService::release_reservation(&pool, "cs_paid").await.unwrap());

        let left: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM tickets")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(left, vec![paid]);
        assert_ne!(left[0], pending);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn refunded_charge_cancels_once(pool: PgPool) {
        let profile_id = seed_profile(&pool, "mia@example.fi", 4).await;
        let ticket = seed_ticket(
            &pool,
            TicketSeed {
                profile_id: Some(profile_id),
                status: "active",
                quantity: 2,
                session_id: Some("cs_refunded"),
                ..TicketSeed::default()
            },
        )
        .await;

        let first = WebhookService::cancel_session_ticket(&pool, "cs_refunded").await.unwrap();
        assert_eq!(first, Some(ticket));
        assert_eq!(status_of(&pool, ticket).await, "cancelled");
        assert_eq!(sweats(&pool, profile_id).await, 2);

        let again = WebhookService::cancel_session_ticket(&pool, "cs_refunded").await.unwrap();
        assert_eq!(again, None);
        assert_eq!(sweats(&pool, profile_id).await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn refunded_charge_leaves_admin_refund_alone(pool: PgPool) {
        let profile_id = seed_profile(&pool, "leo@example.fi", 3).await;
        let ticket = seed_ticket(
            &pool,
            TicketSeed {
                profile_id: Some(profile_id),
                status: "refunded",
                session_id: Some("cs_admin"),
                ..TicketSeed::default()
            },
        )
        .await;

        assert_eq!(WebhookService::cancel_session_ticket(&pool, "cs_admin").await.unwrap(), None);
        assert_eq!(status_of(&pool, ticket).await, "refunded");
        assert_eq!(sweats(&pool, profile_id).await, 3);
    }
}
