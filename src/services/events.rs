use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    models::event::{AppEvent, CreateEventRequest, Tier, TierAvailability, UpdateEventRequest},
    services::inventory::InventoryService,
};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Event not found")]
    NotFound,
    #[error("{0}")]
    InvalidTiers(String),
    #[error("Event has {0} ticket(s) and cannot be deleted")]
    HasTickets(i64),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub struct EventService;

impl EventService {
    pub async fn list(pool: &PgPool, include_unpublished: bool) -> anyhow::Result<Vec<AppEvent>> {
        let events = sqlx::query_as::<_, AppEvent>(
            "SELECT * FROM app_events
             WHERE is_published OR $1
             ORDER BY starts_at NULLS LAST, created_at DESC",
        )
        .bind(include_unpublished)
        .fetch_all(pool)
        .await?;
        Ok(events)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> Result<AppEvent, EventError> {
        sqlx::query_as::<_, AppEvent>("SELECT * FROM app_events WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or(EventError::NotFound)
    }

    pub async fn create(pool: &PgPool, req: &CreateEventRequest) -> Result<AppEvent, EventError> {
        crate::models::event::validate_tiers(&req.tiers).map_err(EventError::InvalidTiers)?;
        let event = sqlx::query_as::<_, AppEvent>(
            "INSERT INTO app_events (title, description, venue, starts_at, ends_at, image_url, is_published, tiers)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING *",
        )
        .bind(req.title.trim())
        .bind(&req.description)
        .bind(&req.venue)
        .bind(req.starts_at)
        .bind(req.ends_at)
        .bind(&req.image_url)
        .bind(req.is_published)
        .bind(Json(&req.tiers))
        .fetch_one(pool)
        .await?;
        Ok(event)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        req: &UpdateEventRequest,
    ) -> Result<AppEvent, EventError> {
        if let Some(tiers) = &req.tiers {
            crate::models::event::validate_tiers(tiers).map_err(EventError::InvalidTiers)?;
        }
        sqlx::query_as::<_, AppEvent>(
            "UPDATE app_events
             SET title = COALESCE($1, title),
                 description = COALESCE($2, description),
                 venue = COALESCE($3, venue),
                 starts_at = COALESCE($4, starts_at),
                 ends_at = COALESCE($5, ends_at),
                 image_url = COALESCE($6, image_url),
                 is_published = COALESCE($7, is_published),
                 tiers = COALESCE($8, tiers),
                 updated_at = NOW()
             WHERE id = $9
             RETURNING *",
        )
        .bind(req.title.as_deref().map(str::trim))
        .bind(&req.description)
        .bind(&req.venue)
        .bind(req.starts_at)
        .bind(req.ends_at)
        .bind(&req.image_url)
        .bind(req.is_published)
        .bind(req.tiers.as_ref().map(Json))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(EventError::NotFound)
    }

    /// Events with sold or reserved tickets are kept for the books.
    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<(), EventError> {
        let tickets: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets WHERE event_id = $1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if tickets > 0 {
            return Err(EventError::HasTickets(tickets));
        }
        let result = sqlx::query("DELETE FROM app_events WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(EventError::NotFound);
        }
        Ok(())
    }

    /// Find the event and tier a price id belongs to by scanning every
    /// event's tier list.
    pub async fn find_tier(pool: &PgPool, price_id: &str) -> anyhow::Result<Option<(AppEvent, Tier)>> {
        let events = sqlx::query_as::<_, AppEvent>(
            "SELECT * FROM app_events WHERE tiers @> jsonb_build_array(jsonb_build_object('id', $1::TEXT))",
        )
        .bind(price_id)
        .fetch_all(pool)
        .await?;
        Ok(locate_tier(events, price_id))
    }

    pub async fn availability(
        pool: &PgPool,
        id: Uuid,
        ttl_minutes: i64,
    ) -> Result<Vec<TierAvailability>, EventError> {
        let event = Self::get(pool, id).await?;
        let mut out = Vec::with_capacity(event.tiers.0.len());
        for tier in &event.tiers.0 {
            let a = InventoryService::check(pool, &tier.id, ttl_minutes).await?;
            out.push(TierAvailability {
                tier_id: tier.id.clone(),
                name: tier.name.clone(),
                limit: a.limit,
                sold: a.sold,
                remaining: a.remaining,
                available: a.is_available(),
            });
        }
        Ok(out)
    }
}

/// First tier whose id matches, in event order.
pub fn locate_tier(events: Vec<AppEvent>, price_id: &str) -> Option<(AppEvent, Tier)> {
    events.into_iter().find_map(|event| {
        let tier = event.tier(price_id).cloned()?;
        Some((event, tier))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(title: &str, tiers: Vec<Tier>) -> AppEvent {
        AppEvent {
            id: Uuid::new_v4(),
            title: title.into(),
            description: None,
            venue: None,
            starts_at: None,
            ends_at: None,
            image_url: None,
            is_published: true,
            tiers: Json(tiers),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn tier(id: &str, price: &str) -> Tier {
        Tier {
            id: id.into(),
            name: id.to_uppercase(),
            price: price.into(),
            stock_limit: None,
            description: None,
        }
    }

    #[test]
    fn tier_lookup_scans_all_events() {
        let events = vec![
            event("Solstice", vec![tier("solstice-early", "€20")]),
            event("Harvest", vec![tier("harvest-early", "€22"), tier("harvest-late", "€30")]),
        ];
        let (ev, t) = locate_tier(events, "harvest-late").unwrap();
        assert_eq!(ev.title, "Harvest");
        assert_eq!(t.price_cents(), Some(3000));
    }

    #[test]
    fn unknown_tier_is_none() {
        let events = vec![event("Solstice", vec![tier("solstice-early", "€20")])];
        assert!(locate_tier(events, "nope").is_none());
    }
}
