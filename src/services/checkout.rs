use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    config::Config,
    models::{
        ambassador::normalize_code,
        checkout::{CheckoutRequest, CheckoutResponse, MAX_QUANTITY},
    },
    services::{
        events::EventService,
        inventory::InventoryService,
        metrics,
        stripe::{NewCheckoutSession, SessionMetadata, StripeClient},
    },
};

/// Stripe refuses `expires_at` sooner than 30 minutes out.
const SESSION_LIFETIME_MINUTES: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Invalid(String),
    #[error("Unknown ticket tier")]
    UnknownTier,
    #[error("This ticket tier just sold out")]
    SoldOut,
    #[error("Payment provider error: {0}")]
    Payment(anyhow::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct CheckoutService;

impl CheckoutService {
    pub async fn create(
        pool: &PgPool,
        stripe: &StripeClient,
        config: &Config,
        req: CheckoutRequest,
        cookie_referral: Option<String>,
    ) -> Result<CheckoutResponse, CheckoutError> {
        req.customer
            .validate()
            .map_err(|e| CheckoutError::Invalid(e.to_string()))?;
        let quantity = req.quantity.unwrap_or(1);
        if !(1..=MAX_QUANTITY).contains(&quantity) {
            return Err(CheckoutError::Invalid(format!(
                "Quantity must be between 1 and {MAX_QUANTITY}"
            )));
        }

        let availability = InventoryService::check(pool, &req.price_id, config.reservation_ttl_minutes).await?;
        if !availability.has_room_for(quantity) {
            metrics::checkout("sold_out");
            return Err(CheckoutError::SoldOut);
        }

        let (event, tier) = EventService::find_tier(pool, &req.price_id)
            .await?
            .ok_or(CheckoutError::UnknownTier)?;
        let unit_amount = tier
            .price_cents()
            .ok_or_else(|| CheckoutError::Invalid(format!("Tier '{}' has no valid price", tier.id)))?;
        if unit_amount <= 0 {
            return Err(CheckoutError::Invalid("Free tiers cannot be purchased online".into()));
        }

        let product_id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM products WHERE price_id = $1")
                .bind(&req.price_id)
                .fetch_optional(pool)
                .await
                .map_err(anyhow::Error::from)?;

        // An explicit code in the form wins over the cookie.
        let referral_code = req
            .referral_code
            .as_deref()
            .and_then(normalize_code)
            .or_else(|| cookie_referral.as_deref().and_then(normalize_code));

        let metadata = SessionMetadata {
            guest: req.customer.clone(),
            price_id: req.price_id.clone(),
            event_id: Some(event.id),
            product_id,
            referral_code,
            quantity,
        };
        let params = NewCheckoutSession {
            product_name: format!("{} — {}", event.title, tier.name),
            unit_amount,
            currency: config.currency.clone(),
            quantity,
            customer_email: req.customer.normalized_email(),
            success_url: format!(
                "{}/tickets/success?session_id={{CHECKOUT_SESSION_ID}}",
                config.site_url
            ),
            cancel_url: format!("{}/tickets?cancelled=1", config.site_url),
            expires_at: (Utc::now() + chrono::Duration::minutes(SESSION_LIFETIME_MINUTES)).timestamp(),
            metadata,
        };

        let session = stripe
            .create_checkout_session(&params)
            .await
            .map_err(CheckoutError::Payment)?;
        let url = session
            .url
            .clone()
            .ok_or_else(|| CheckoutError::Payment(anyhow::anyhow!("Stripe returned no checkout URL")))?;

        // Best effort: without the row the reservation is simply not held.
        if let Err(e) = Self::reserve(pool, &session.id, &params, event.id, product_id, &tier.id).await {
            tracing::error!(session_id = %session.id, "Failed to insert pending reservation: {e}");
        }

        metrics::checkout("created");
        tracing::info!(session_id = %session.id, price_id = %req.price_id, quantity, "Checkout session created");

        Ok(CheckoutResponse {
            url,
            session_id: session.id,
        })
    }

    async fn reserve(
        pool: &PgPool,
        session_id: &str,
        params: &NewCheckoutSession,
        event_id: Uuid,
        product_id: Option<Uuid>,
        tier_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO tickets (event_id, product_id, tier_id, status, quantity, amount_cents, currency,
                                  customer_email, customer_name, stripe_session_id)
             VALUES ($1, $2, $3, 'pending', $4, $5, $6, $7, $8, $9)
             ON CONFLICT (stripe_session_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(product_id)
        .bind(tier_id)
        .bind(params.quantity as i32)
        .bind(params.unit_amount * params.quantity)
        .bind(&params.currency)
        .bind(&params.customer_email)
        .bind(params.metadata.guest.name.trim())
        .bind(session_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}
