use rand::Rng;
use sqlx::PgPool;

use crate::models::ambassador::{normalize_code, Ambassador, AmbassadorStats, CreateAmbassadorRequest};

const CODE_LEN: usize = 6;
/// Ambiguous glyphs (0/O, 1/I) are left out so codes survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum AmbassadorError {
    #[error("{0}")]
    Invalid(String),
    #[error("Referral code '{0}' is already taken")]
    CodeTaken(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct AmbassadorService;

impl AmbassadorService {
    /// Ambassadors with the number of paid tickets sold under their code.
    pub async fn list(pool: &PgPool) -> anyhow::Result<Vec<AmbassadorStats>> {
        let rows = sqlx::query_as::<_, AmbassadorStats>(
            "SELECT a.id, a.name, a.email, a.code, a.is_active, a.created_at,
                    COUNT(t.id) AS ticket_count
             FROM ambassadors a
             LEFT JOIN tickets t ON t.ambassador_id = a.id AND t.status IN ('active', 'used')
             GROUP BY a.id
             ORDER BY ticket_count DESC, a.name",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn create(
        pool: &PgPool,
        req: &CreateAmbassadorRequest,
    ) -> Result<Ambassador, AmbassadorError> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(AmbassadorError::Invalid("Name is required".into()));
        }
        let email = req
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        // A requested code must be free; generated ones are retried.
        if let Some(raw) = req.code.as_deref().filter(|c| !c.trim().is_empty()) {
            let code = normalize_code(raw)
                .ok_or_else(|| AmbassadorError::Invalid("Referral code is invalid".into()))?;
            return Self::insert(pool, name, email.as_deref(), &code)
                .await?
                .ok_or(AmbassadorError::CodeTaken(code));
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            if let Some(ambassador) = Self::insert(pool, name, email.as_deref(), &code).await? {
                return Ok(ambassador);
            }
        }
        Err(AmbassadorError::Invalid("Could not allocate a unique referral code".into()))
    }

    async fn insert(
        pool: &PgPool,
        name: &str,
        email: Option<&str>,
        code: &str,
    ) -> Result<Option<Ambassador>, sqlx::Error> {
        sqlx::query_as::<_, Ambassador>(
            "INSERT INTO ambassadors (name, email, code)
             VALUES ($1, $2, $3)
             ON CONFLICT (code) DO NOTHING
             RETURNING *",
        )
        .bind(name)
        .bind(email)
        .bind(code)
        .fetch_optional(pool)
        .await
    }
}

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
