//! Multi-tier query cache for the product catalog read path.
//!
//! An in-process L1, a distributed L2 and a coalesced origin load sit behind
//! [`application::CatalogService`]. Writers keep the tiers honest through the
//! service's `invalidate_*` calls.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
