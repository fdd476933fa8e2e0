//! Provider extraction
//!
//! [`SourceClient`] is the only inbound boundary of the pipeline. The shipped
//! implementation is [`ParclClient`]; tests substitute scripted sources.

pub mod parcl;
pub mod rate_limit;
pub mod retry;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{County, DataKind, DateRange, RawRecord};

pub use parcl::ParclClient;
pub use rate_limit::RateGate;
pub use retry::RetryPolicy;

#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Listing history events for properties on the market in `county`
    async fn fetch_listings(
        &self,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Sale transactions recorded in `county` within `range`
    async fn fetch_sales(
        &self,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError>;

    async fn fetch(
        &self,
        kind: DataKind,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        match kind {
            DataKind::Listings => self.fetch_listings(county, range).await,
            DataKind::Sales => self.fetch_sales(county, range).await,
        }
    }
}
