use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

/// A purchasable ticket category embedded in `app_events.tiers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    pub id: String,
    pub name: String,
    /// Display price as entered by staff, e.g. "€35" or "35,50 EUR".
    pub price: String,
    #[serde(default)]
    pub stock_limit: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Tier {
    pub fn price_cents(&self) -> Option<i64> {
        parse_price_cents(&self.price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AppEvent {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub venue: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub is_published: bool,
    pub tiers: Json<Vec<Tier>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppEvent {
    pub fn tier(&self, tier_id: &str) -> Option<&Tier> {
        self.tiers.0.iter().find(|t| t.id == tier_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub venue: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub venue: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    pub is_published: Option<bool>,
    pub tiers: Option<Vec<Tier>>,
}

#[derive(Debug, Serialize)]
pub struct TierAvailability {
    pub tier_id: String,
    pub name: String,
    pub limit: Option<i64>,
    pub sold: i64,
    pub remaining: Option<i64>,
    pub available: bool,
}

/// Parse a human-entered price into minor units.
///
/// Currency symbols and codes are ignored; either `.` or `,` may be the
/// decimal separator. Returns `None` for anything without digits or with more
/// than two decimals.
pub fn parse_price_cents(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    // The last separator is the decimal one when followed by 1-2 digits;
    // any other separator is a thousands grouping.
    let (whole, frac) = match cleaned.rfind(['.', ',']) {
        Some(idx) if cleaned.len() - idx - 1 <= 2 => (&cleaned[..idx], &cleaned[idx + 1..]),
        _ => (cleaned.as_str(), ""),
    };

    let whole: String = whole.chars().filter(|c| c.is_ascii_digit()).collect();
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };

    whole.checked_mul(100)?.checked_add(frac)
}

/// Validate a tier list before it is stored on an event.
pub fn validate_tiers(tiers: &[Tier]) -> Result<(), String> {
    let mut seen = HashSet::new();
    for tier in tiers {
        if tier.id.trim().is_empty() {
            return Err("Tier id must not be empty".into());
        }
        if tier.name.trim().is_empty() {
            return Err(format!("Tier '{}' has no name", tier.id));
        }
        if !seen.insert(tier.id.as_str()) {
            return Err(format!("Duplicate tier id '{}'", tier.id));
        }
        if tier.price_cents().is_none() {
            return Err(format!("Tier '{}' has an invalid price '{}'", tier.id, tier.price));
        }
        if matches!(tier.stock_limit, Some(n) if n < 0) {
            return Err(format!("Tier '{}' has a negative stock limit", tier.id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: &str, price: &str) -> Tier {
        Tier {
            id: id.into(),
            name: "Evening sweat".into(),
            price: price.into(),
            stock_limit: Some(20),
            description: None,
        }
    }

    #[test]
    fn parses_common_price_formats() {
        assert_eq!(parse_price_cents("€35"), Some(3500));
        assert_eq!(parse_price_cents("35.00"), Some(3500));
        assert_eq!(parse_price_cents("35,50 EUR"), Some(3550));
        assert_eq!(parse_price_cents("$4.5"), Some(450));
        assert_eq!(parse_price_cents("1,250"), Some(125000));
        assert_eq!(parse_price_cents("1.250,75"), Some(125075));
        assert_eq!(parse_price_cents("0"), Some(0));
    }

    #[test]
    fn rejects_prices_without_digits() {
        assert_eq!(parse_price_cents("free"), None);
        assert_eq!(parse_price_cents(""), None);
    }

    #[test]
    fn tier_validation_catches_duplicates_and_bad_prices() {
        assert!(validate_tiers(&[tier("early", "€20"), tier("late", "€30")]).is_ok());
        assert!(validate_tiers(&[tier("early", "€20"), tier("early", "€30")]).is_err());
        assert!(validate_tiers(&[tier("early", "tbd")]).is_err());
        assert!(validate_tiers(&[tier(" ", "€20")]).is_err());

        let mut negative = tier("vip", "€90");
        negative.stock_limit = Some(-1);
        assert!(validate_tiers(&[negative]).is_err());
    }

    #[test]
    fn tiers_deserialize_without_optional_fields() {
        let tiers: Vec<Tier> =
            serde_json::from_str(r#"[{"id":"early","name":"Early bird","price":"€25"}]"#).unwrap();
        assert_eq!(tiers[0].stock_limit, None);
        assert_eq!(tiers[0].price_cents(), Some(2500));
    }
}
