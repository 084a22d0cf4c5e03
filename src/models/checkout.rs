use serde::{Deserialize, Serialize};

use super::profile::GuestDetails;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub customer: GuestDetails,
    pub quantity: Option<i64>,
    pub referral_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

pub const MAX_QUANTITY: i64 = 10;
