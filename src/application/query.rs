//! Typed product listing descriptors.
//!
//! Inbound filters arrive as a [`ProductQuery`] where every field is optional.
//! [`ProductQuery::normalize`] resolves defaults and clamps ranges so that two
//! requests meaning the same thing produce an identical [`NormalizedQuery`].
//! Cache keys are derived from the normalized form only.

use serde::Deserialize;
use uuid::Uuid;

use crate::domain::types::{SortField, SortOrder};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Product listing request as received from callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProductQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Case-insensitive free-text match on name and description.
    pub search: Option<String>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    pub category_id: Option<Uuid>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub featured: Option<bool>,
    pub active: Option<bool>,
}

/// Canonical form of a [`ProductQuery`].
///
/// Every field is resolved; two logically equal listings compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedQuery {
    pub page: u32,
    pub page_size: u32,
    pub search: Option<String>,
    pub min_price_cents: Option<i64>,
    pub max_price_cents: Option<i64>,
    pub category_id: Option<Uuid>,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub featured: Option<bool>,
    pub active: Option<bool>,
}

impl ProductQuery {
    pub fn normalize(&self) -> NormalizedQuery {
        let page = self.page.unwrap_or(DEFAULT_PAGE).max(1);
        let page_size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_lowercase);

        NormalizedQuery {
            page,
            page_size,
            search,
            min_price_cents: self.min_price_cents,
            max_price_cents: self.max_price_cents,
            category_id: self.category_id,
            sort_by: self.sort_by.unwrap_or_default(),
            sort_order: self.sort_order.unwrap_or_default(),
            featured: self.featured,
            active: self.active,
        }
    }
}

impl NormalizedQuery {
    /// Number of rows to skip before the requested page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}
