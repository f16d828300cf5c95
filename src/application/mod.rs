//! Catalog read path: query descriptors, the origin contract and the cached
//! query service built on top of them.

pub mod catalog;
pub mod error;
pub mod query;
pub mod repos;

pub use catalog::{CatalogHealth, CatalogService};
pub use error::CatalogError;
pub use query::{NormalizedQuery, ProductQuery};
pub use repos::{OriginError, OriginStore};
