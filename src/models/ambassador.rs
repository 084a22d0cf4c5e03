use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ambassador {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Ambassador row with the number of paid tickets attributed to the code.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AmbassadorStats {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub code: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub ticket_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAmbassadorRequest {
    pub name: String,
    pub email: Option<String>,
    pub code: Option<String>,
}

/// Referral codes are matched case-insensitively and stored upper-case.
pub fn normalize_code(raw: &str) -> Option<String> {
    let code: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect::<String>()
        .to_uppercase();
    if code.is_empty() || code.len() > 32 {
        None
    } else {
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_uppercased_and_stripped() {
        assert_eq!(normalize_code(" sauna-jo ").as_deref(), Some("SAUNA-JO"));
        assert_eq!(normalize_code("hot tub!").as_deref(), Some("HOTTUB"));
        assert_eq!(normalize_code("   "), None);
        assert_eq!(normalize_code(&"x".repeat(40)), None);
    }
}
