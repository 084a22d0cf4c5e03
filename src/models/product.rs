use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A sellable item; `price_id` ties it to an event tier id.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub location_id: Option<Uuid>,
    pub name: String,
    pub price_id: String,
    pub price_cents: i64,
    pub stock_limit: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Slot {
    pub id: Uuid,
    pub product_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub capacity: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LocationCatalog {
    #[serde(flatten)]
    pub location: Location,
    pub products: Vec<ProductWithSlots>,
}

#[derive(Debug, Serialize)]
pub struct ProductWithSlots {
    #[serde(flatten)]
    pub product: Product,
    pub slots: Vec<Slot>,
}
