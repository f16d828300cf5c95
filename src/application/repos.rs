//! Origin store contract consumed by the catalog read path.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::query::NormalizedQuery;
use crate::domain::entities::{CategoryRecord, ProductPage, ProductRecord};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("origin store timeout")]
    Timeout,
}

impl OriginError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Authoritative catalog data source.
///
/// Writes go through the origin directly; whoever performs them must then
/// notify the cache invalidator.
#[async_trait]
pub trait OriginStore: Send + Sync {
    async fn query_products(&self, query: &NormalizedQuery) -> Result<ProductPage, OriginError>;

    async fn fetch_product_by_id(&self, id: Uuid) -> Result<Option<ProductRecord>, OriginError>;

    async fn fetch_product_by_slug(&self, slug: &str)
    -> Result<Option<ProductRecord>, OriginError>;

    async fn list_categories(&self) -> Result<Vec<CategoryRecord>, OriginError>;
}
