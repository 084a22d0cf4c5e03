//! Row fixtures for the `#[sqlx::test]` database tests.
use sqlx::PgPool;
use uuid::Uuid;

pub struct TicketSeed {
    pub profile_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub tier_id: Option<&'static str>,
    pub status: &'static str,
    pub quantity: i32,
    pub age_minutes: i32,
    pub session_id: Option<&'static str>,
    pub payment_intent: Option<&'static str>,
}

impl Default for TicketSeed {
    fn default() -> Self {
        Self {
            profile_id: None,
            product_id: None,
            tier_id: None,
            status: "pending",
            quantity: 1,
            age_minutes: 0,
            session_id: None,
            payment_intent: None,
        }
    }
}

pub async fn seed_ticket(pool: &PgPool, seed: TicketSeed) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO tickets (profile_id, product_id, tier_id, status, quantity, amount_cents,
                              stripe_session_id, stripe_payment_intent, created_at)
         VALUES ($1, $2, $3, $4, $5, 2500 * $5, $6, $7, NOW() - make_interval(mins => $8::INT))
         RETURNING id",
    )
    .bind(seed.profile_id)
    .bind(seed.product_id)
    .bind(seed.tier_id)
    .bind(seed.status)
    .bind(seed.quantity)
    .bind(seed.session_id)
    .bind(seed.payment_intent)
    .bind(seed.age_minutes)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_profile(pool: &PgPool, email: &str, total_sweats: i32) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO profiles (email, full_name, total_sweats) VALUES ($1, 'Test Guest', $2) RETURNING id",
    )
    .bind(email)
    .bind(total_sweats)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn sweats(pool: &PgPool, profile_id: Uuid) -> i32 {
    sqlx::query_scalar("SELECT total_sweats FROM profiles WHERE id = $1")
        .bind(profile_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn sweats_for(pool: &PgPool, email: &str) -> i32 {
    sqlx::query_scalar("SELECT total_sweats FROM profiles WHERE email = $1")
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn status_of(pool: &PgPool, ticket_id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
