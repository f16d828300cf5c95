use std::time::Duration;

use thiserror::Error;

use crate::application::repos::OriginError;

/// Errors surfaced by the catalog read path.
///
/// Values are cloned to every coalesced waiter, so variants carry owned,
/// display-ready data rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("origin store unavailable: {reason}")]
    OriginUnavailable { reason: String },
    #[error("origin load exceeded its budget of {}ms", budget.as_millis())]
    CoalescingTimeout { budget: Duration },
    #[error("payload codec failure: {0}")]
    Codec(String),
}

impl CatalogError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn origin_unavailable(reason: impl Into<String>) -> Self {
        Self::OriginUnavailable {
            reason: reason.into(),
        }
    }

    /// True for every failure the caller should treat as "origin could not answer".
    ///
    /// A coalescing timeout is the timeout flavour of the same condition.
    pub fn is_origin_unavailable(&self) -> bool {
        matches!(
            self,
            CatalogError::OriginUnavailable { .. } | CatalogError::CoalescingTimeout { .. }
        )
    }
}

impl From<OriginError> for CatalogError {
    fn from(error: OriginError) -> Self {
        CatalogError::origin_unavailable(error.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(error: serde_json::Error) -> Self {
        CatalogError::Codec(error.to_string())
    }
}
