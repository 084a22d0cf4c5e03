use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Pending,
    Active,
    Used,
    Refunded,
    Cancelled,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Pending,
        TicketStatus::Active,
        TicketStatus::Used,
        TicketStatus::Refunded,
        TicketStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Active => "active",
            TicketStatus::Used => "used",
            TicketStatus::Refunded => "refunded",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses that count against a tier's stock regardless of age.
    pub fn holds_stock(&self) -> bool {
        matches!(self, TicketStatus::Active | TicketStatus::Used)
    }

    /// Refunded and cancelled tickets never come back.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Refunded | TicketStatus::Cancelled)
    }

    /// Tickets only move forward: pending -> active -> used. Paid tickets
    /// may be refunded, and any non-terminal ticket may be cancelled.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        match (self, next) {
            (Pending, Active) => true,
            (Active, Used) => true,
            (Active | Used, Refunded) => true,
            (Pending | Active | Used, Cancelled) => true,
            _ => false,
        }
    }

    /// Stored values a ticket may leave for `next`, for `status = ANY($n)`.
    pub fn sources_of(next: TicketStatus) -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|s| s.can_transition_to(next))
            .map(|s| s.as_str())
            .collect()
    }

    /// Stored values of [`TicketStatus::holds_stock`] statuses.
    pub fn stock_holding() -> Vec<&'static str> {
        Self::ALL
            .iter()
            .filter(|s| s.holds_stock())
            .map(|s| s.as_str())
            .collect()
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TicketStatus::Pending),
            "active" => Ok(TicketStatus::Active),
            "used" => Ok(TicketStatus::Used),
            "refunded" => Ok(TicketStatus::Refunded),
            "cancelled" => Ok(TicketStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Unknown ticket status: {s}")),
        }
    }
}

/// DB row struct. Status is kept as TEXT and parsed with `Ticket::status()`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub profile_id: Option<Uuid>,
    pub event_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub slot_id: Option<Uuid>,
    pub tier_id: Option<String>,
    pub ambassador_id: Option<Uuid>,
    pub status: String,
    pub quantity: i32,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub check_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn status(&self) -> anyhow::Result<TicketStatus> {
        self.status.parse()
    }
}

/// Admin search row: ticket joined with its guest profile and event title.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TicketSummary {
    pub id: Uuid,
    pub status: String,
    pub tier_id: Option<String>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub currency: String,
    pub check_in_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub event_id: Option<Uuid>,
    pub event_title: Option<String>,
    pub ambassador_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketSearchQuery {
    pub q: Option<String>,
    pub status: Option<TicketStatus>,
    pub event_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    /// How far back to look for paid sessions (default 48h, max 30 days).
    pub since_hours: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub fulfilled: usize,
    pub session_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    pub event_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        use TicketStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Used));
        assert!(!Used.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Refunded.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Refunded));
        assert!(Used.can_transition_to(Refunded));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Refunded.can_transition_to(Cancelled));
    }

    #[test]
    fn transition_sources_match_the_status_rules() {
        use TicketStatus::*;
        assert_eq!(TicketStatus::sources_of(Used), vec!["active"]);
        assert_eq!(TicketStatus::sources_of(Refunded), vec!["active", "used"]);
        assert_eq!(
            TicketStatus::sources_of(Cancelled),
            vec!["pending", "active", "used"]
        );
        assert!(TicketStatus::sources_of(Pending).is_empty());
        assert!(TicketStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .all(|s| TicketStatus::ALL.iter().all(|n| !s.can_transition_to(*n))));
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in ["pending", "active", "used", "refunded", "cancelled"] {
            let status: TicketStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!("void".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn only_paid_tickets_hold_stock_unconditionally() {
        assert!(TicketStatus::Active.holds_stock());
        assert!(TicketStatus::Used.holds_stock());
        assert!(!TicketStatus::Pending.holds_stock());
        assert!(!TicketStatus::Refunded.holds_stock());
        assert_eq!(TicketStatus::stock_holding(), vec!["active", "used"]);
    }
}
