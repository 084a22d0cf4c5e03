use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ticket::TicketStatus;

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub subject: String,
    pub body: String,
    pub event_id: Option<Uuid>,
    /// Ticket statuses whose holders receive the message (default active + used).
    pub statuses: Option<Vec<TicketStatus>>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub sent: usize,
    pub failed: usize,
}
