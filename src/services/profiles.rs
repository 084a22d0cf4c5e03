use sqlx::PgPool;
use uuid::Uuid;

use crate::models::profile::{GuestDetails, Profile};

/// Postgres "undefined_function".
const UNDEFINED_FUNCTION: &str = "42883";

pub struct ProfileService;

impl ProfileService {
    /// Insert or refresh the guest profile keyed by email. Fields the guest
    /// left blank keep their stored value.
    pub async fn upsert(pool: &PgPool, guest: &GuestDetails) -> anyhow::Result<Profile> {
        let profile = sqlx::query_as::<_, Profile>(
            "INSERT INTO profiles (email, full_name, phone, age, gender, waiver_accepted, waiver_accepted_at)
             VALUES ($1, NULLIF($2, ''), $3, $4, $5, $6, CASE WHEN $6 THEN NOW() END)
             ON CONFLICT (email) DO UPDATE SET
                 full_name = COALESCE(EXCLUDED.full_name, profiles.full_name),
                 phone = COALESCE(EXCLUDED.phone, profiles.phone),
                 age = COALESCE(EXCLUDED.age, profiles.age),
                 gender = COALESCE(EXCLUDED.gender, profiles.gender),
                 waiver_accepted = profiles.waiver_accepted OR EXCLUDED.waiver_accepted,
                 waiver_accepted_at = COALESCE(profiles.waiver_accepted_at, EXCLUDED.waiver_accepted_at),
                 updated_at = NOW()
             RETURNING *",
        )
        .bind(guest.normalized_email())
        .bind(guest.name.trim())
        .bind(&guest.phone)
        .bind(guest.age)
        .bind(&guest.gender)
        .bind(guest.waiver_accepted)
        .fetch_one(pool)
        .await?;
        Ok(profile)
    }

    /// Add (positive) or remove (negative) visits from the loyalty counter.
    ///
    /// Prefers the `increment_sweats` / `decrement_sweats` SQL functions and
    /// falls back to a direct update when they are not installed.
    pub async fn adjust_sweats(pool: &PgPool, profile_id: Uuid, delta: i32) -> anyhow::Result<()> {
        if delta == 0 {
            return Ok(());
        }
        let function = if delta > 0 { "increment_sweats" } else { "decrement_sweats" };

        let rpc = sqlx::query(&format!("SELECT {function}($1, $2)"))
            .bind(profile_id)
            .bind(delta.abs())
            .execute(pool)
            .await;

        match rpc {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_FUNCTION) => {
                tracing::warn!("{function} is missing, updating total_sweats directly");
                let current: Option<i32> =
                    sqlx::query_scalar("SELECT total_sweats FROM profiles WHERE id = $1")
                        .bind(profile_id)
                        .fetch_optional(pool)
                        .await?;
                let Some(current) = current else {
                    return Ok(());
                };
                sqlx::query("UPDATE profiles SET total_sweats = $1, updated_at = NOW() WHERE id = $2")
                    .bind(next_sweats(current, delta))
                    .bind(profile_id)
                    .execute(pool)
                    .await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// The counter never drops below zero.
pub fn next_sweats(current: i32, delta: i32) -> i32 {
    current.saturating_add(delta).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loyalty_counter_is_clamped_at_zero() {
        assert_eq!(next_sweats(3, 1), 4);
        assert_eq!(next_sweats(1, -2), 0);
        assert_eq!(next_sweats(0, -1), 0);
    }
}
