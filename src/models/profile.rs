use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    pub waiver_accepted: bool,
    pub waiver_accepted_at: Option<DateTime<Utc>>,
    pub total_sweats: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Guest details collected on the ticket form and carried through Stripe
/// session metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GuestDetails {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<String>,
    #[serde(default)]
    pub waiver_accepted: bool,
}

impl GuestDetails {
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }

    /// Minimal shape check; the payment provider validates deliverability.
    pub fn validate(&self) -> Result<(), &'static str> {
        let email = self.email.trim();
        let valid_email = email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
            .unwrap_or(false);
        if !valid_email {
            return Err("A valid email address is required");
        }
        if self.name.trim().is_empty() {
            return Err("Name is required");
        }
        if !self.waiver_accepted {
            return Err("The health waiver must be accepted");
        }
        if matches!(self.age, Some(a) if !(0..=120).contains(&a)) {
            return Err("Age is out of range");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guest() -> GuestDetails {
        GuestDetails {
            name: "Aino Virtanen".into(),
            email: " Aino@Example.FI ".into(),
            waiver_accepted: true,
            ..Default::default()
        }
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(guest().normalized_email(), "aino@example.fi");
    }

    #[test]
    fn waiver_and_email_are_required() {
        assert!(guest().validate().is_ok());

        let mut g = guest();
        g.waiver_accepted = false;
        assert!(g.validate().is_err());

        let mut g = guest();
        g.email = "not-an-email".into();
        assert!(g.validate().is_err());

        let mut g = guest();
        g.name = "  ".into();
        assert!(g.validate().is_err());
    }
}
