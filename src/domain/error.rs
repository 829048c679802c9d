//! Error taxonomy for the tracking core
//!
//! Infeasible routes and empty catalogs are not errors: they come back as
//! empty results. Only caller mistakes and missing sessions surface here.

use crate::domain::types::SessionId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Sample rejected at ingest, nothing was applied
    #[error("invalid sample: {reason}")]
    InvalidSample { reason: String },

    /// Session was evicted or never created
    #[error("unknown session: {session_id}")]
    UnknownSession { session_id: SessionId },

    /// Session exists but holds no fix to start a route from
    #[error("session {session_id} has no recorded location")]
    NoLocation { session_id: SessionId },

    /// Catalog source could not be read or parsed
    #[error("catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },
}

impl CoreError {
    pub fn invalid_sample(reason: impl Into<String>) -> Self {
        CoreError::InvalidSample { reason: reason.into() }
    }

    pub fn unknown_session(session_id: &SessionId) -> Self {
        CoreError::UnknownSession { session_id: session_id.clone() }
    }

    /// Short machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidSample { .. } => "invalid_sample",
            CoreError::UnknownSession { .. } => "unknown_session",
            CoreError::NoLocation { .. } => "no_location",
            CoreError::CatalogUnavailable { .. } => "catalog_unavailable",
        }
    }
}
