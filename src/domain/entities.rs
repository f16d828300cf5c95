//! Catalog entities as snapshotted from the origin store.
//!
//! The cache only ever holds copies of these records; the authoritative
//! version lives in the origin.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub price_cents: i64,
    pub original_price_cents: Option<i64>,
    pub image_url: Option<String>,
    pub category_id: Option<Uuid>,
    pub brand: Option<String>,
    pub sku: Option<String>,
    pub stock_quantity: i32,
    pub featured: bool,
    pub is_active: bool,
    pub view_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub is_active: bool,
}

/// One page of a product listing together with the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub items: Vec<ProductRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
