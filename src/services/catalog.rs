use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::product::{Location, LocationCatalog, Product, ProductWithSlots, Slot};

pub struct CatalogService;

impl CatalogService {
    /// Locations with their active products and upcoming slots.
    pub async fn list(pool: &PgPool) -> anyhow::Result<Vec<LocationCatalog>> {
        let locations = sqlx::query_as::<_, Location>("SELECT * FROM locations ORDER BY name")
            .fetch_all(pool)
            .await?;
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE is_active = TRUE ORDER BY price_cents, name",
        )
        .fetch_all(pool)
        .await?;
        let slots = sqlx::query_as::<_, Slot>(
            "SELECT * FROM slots WHERE ends_at > NOW() ORDER BY starts_at",
        )
        .fetch_all(pool)
        .await?;

        Ok(assemble(locations, products, slots))
    }
}

/// Group products under their location and slots under their product.
/// Products without a location are dropped.
pub fn assemble(
    locations: Vec<Location>,
    products: Vec<Product>,
    slots: Vec<Slot>,
) -> Vec<LocationCatalog> {
    let mut slots_by_product: HashMap<Uuid, Vec<Slot>> = HashMap::new();
    for slot in slots {
        slots_by_product.entry(slot.product_id).or_default().push(slot);
    }

    let mut products_by_location: HashMap<Uuid, Vec<ProductWithSlots>> = HashMap::new();
    for product in products {
        let Some(location_id) = product.location_id else {
            continue;
        };
        let slots = slots_by_product.remove(&product.id).unwrap_or_default();
        products_by_location
            .entry(location_id)
            .or_default()
            .push(ProductWithSlots { product, slots });
    }

    locations
        .into_iter()
        .map(|location| LocationCatalog {
            products: products_by_location.remove(&location.id).unwrap_or_default(),
            location,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn products_and_slots_nest_under_their_parents() {
        let now = Utc::now();
        let harbour = Location { id: Uuid::new_v4(), name: "Harbour".into(), address: None, created_at: now };
        let park = Location { id: Uuid::new_v4(), name: "Park".into(), address: None, created_at: now };
        let session = Product {
            id: Uuid::new_v4(),
            location_id: Some(harbour.id),
            name: "Sunset session".into(),
            price_id: "sunset".into(),
            price_cents: 2500,
            stock_limit: Some(12),
            is_active: true,
            created_at: now,
        };
        let orphan = Product { id: Uuid::new_v4(), location_id: None, price_id: "x".into(), ..session.clone() };
        let slot = Slot {
            id: Uuid::new_v4(),
            product_id: session.id,
            starts_at: now,
            ends_at: now,
            capacity: Some(12),
            created_at: now,
        };

        let catalog = assemble(vec![harbour, park], vec![session, orphan], vec![slot]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].products.len(), 1);
        assert_eq!(catalog[0].products[0].slots.len(), 1);
        assert!(catalog[1].products.is_empty());
    }
}
