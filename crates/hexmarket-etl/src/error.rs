//! Error types for the ETL pipeline
//!
//! Errors are scoped to the unit of work they abort: a single record
//! ([`crate::processing::DropReason`], counted and never fatal), a county
//! ([`SourceError`]), a data kind ([`AggregationError`]) or a table
//! ([`crate::store::StoreError`]).

use thiserror::Error;

use crate::models::{CountyId, DataKind};
use crate::store::StoreError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Invalid or incomplete configuration, raised at construction time
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },

    #[error("County set is empty; at least one county must be configured")]
    NoCounties,

    #[error("Field mapping for {kind} lacks required field '{field}'")]
    IncompleteMapping { kind: DataKind, field: &'static str },

    #[error("Date arithmetic out of range: {0}")]
    DateOutOfRange(String),
}

impl ConfigError {
    pub fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            message: message.into(),
        }
    }
}

/// Extraction failure for one county
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Transient failures exhausted the retry budget (or the provider refused
    /// the request outright)
    #[error("Provider unavailable for county {county} after {attempts} attempt(s): {message}")]
    Unavailable {
        county: CountyId,
        attempts: u32,
        message: String,
    },

    /// The provider answered with an unexpected shape; never retried
    #[error("Unexpected provider response for county {county}: {message}")]
    Schema { county: CountyId, message: String },
}

impl SourceError {
    pub fn county(&self) -> CountyId {
        match self {
            SourceError::Unavailable { county, .. } | SourceError::Schema { county, .. } => *county,
        }
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, SourceError::Schema { .. })
    }
}

/// Aggregates disagree with the records they were computed from
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error(
        "{kind} hex totals for county {county} do not match input: \
         aggregated {aggregated}, expected {expected}"
    )]
    InvariantViolation {
        kind: DataKind,
        county: CountyId,
        aggregated: u64,
        expected: u64,
    },
}

/// Umbrella error for orchestration
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
