use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ticket::TicketStatus;

/// Stock position of a single tier at the moment of the query.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Availability {
    pub limit: Option<i64>,
    pub sold: i64,
    pub remaining: Option<i64>,
}

impl Availability {
    pub fn new(limit: Option<i64>, sold: i64) -> Self {
        Self {
            limit,
            sold,
            remaining: limit.map(|l| (l - sold).max(0)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.has_room_for(1)
    }

    /// Unlimited tiers always have room.
    pub fn has_room_for(&self, quantity: i64) -> bool {
        match self.limit {
            None => true,
            Some(limit) => limit - self.sold >= quantity.max(1),
        }
    }
}

pub struct InventoryService;

impl InventoryService {
    /// Count the stock held against `price_id`.
    ///
    /// Held means a stock-holding status (`active`, `used`), or `pending` and younger than the
    /// reservation TTL. This is a plain read with no lock: two concurrent
    /// checkouts can both see the last unit.
    pub async fn check(
        pool: &PgPool,
        price_id: &str,
        ttl_minutes: i64,
    ) -> anyhow::Result<Availability> {
        let product: Option<(Uuid, Option<i32>)> = sqlx::query_as(
            "SELECT id, stock_limit FROM products WHERE price_id = $1 AND is_active = TRUE",
        )
        .bind(price_id)
        .fetch_optional(pool)
        .await?;

        if let Some((product_id, stock_limit)) = product {
            let sold: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM tickets
                 WHERE product_id = $1
                   AND (status = ANY($3)
                        OR (status = 'pending' AND created_at > NOW() - make_interval(mins => $2::INT)))",
            )
            .bind(product_id)
            .bind(ttl_minutes as i32)
            .bind(TicketStatus::stock_holding())
            .fetch_one(pool)
            .await?;
            return Ok(Availability::new(stock_limit.map(i64::from), sold));
        }

        // No normalized product row: fall back to the tier's own stock_limit.
        let stock_limit: Option<Option<i32>> = sqlx::query_scalar(
            "SELECT (t->>'stock_limit')::INT
             FROM app_events e, jsonb_array_elements(e.tiers) t
             WHERE t->>'id' = $1
             LIMIT 1",
        )
        .bind(price_id)
        .fetch_optional(pool)
        .await?;

        let sold = Self::count_tier(pool, price_id, ttl_minutes).await?;
        Ok(Availability::new(stock_limit.flatten().map(i64::from), sold))
    }

    async fn count_tier(pool: &PgPool, tier_id: &str, ttl_minutes: i64) -> anyhow::Result<i64> {
        let sold: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM tickets
             WHERE tier_id = $1
               AND (status = ANY($3)
                    OR (status = 'pending' AND created_at > NOW() - make_interval(mins => $2::INT)))",
        )
        .bind(tier_id)
        .bind(ttl_minutes as i32)
        .bind(TicketStatus::stock_holding())
        .fetch_one(pool)
        .await?;
        Ok(sold)
    }
}
