//! Persistence of pipeline outputs
//!
//! Each output table is replaced wholesale per run. [`TableStore`]
//! implementations must make [`TableStore::replace_table`] atomic: a
//! concurrent reader observes the complete previous contents or the complete
//! new contents, never a mix.

pub mod convert;
pub mod loader;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

pub use convert::{RowError, ToRow};
pub use loader::{LoadReport, StoreLoader};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Output tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Listings,
    Sales,
    HexAggregates,
    CountyAggregates,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Listings,
        Table::Sales,
        Table::HexAggregates,
        Table::CountyAggregates,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Listings => "listings",
            Table::Sales => "sales",
            Table::HexAggregates => "hex_aggregates",
            Table::CountyAggregates => "county_aggregates",
        }
    }

    /// Column order shared by [`ToRow`] and the insert statements
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Listings => &[
                "parcl_property_id",
                "original_list_date",
                "original_list_price",
                "current_list_date",
                "current_list_price",
                "list_price_per_sqft",
                "days_on_market",
                "most_recent_sale_date",
                "most_recent_sale_price",
                "listing_to_sale_ratio",
                "address",
                "county_id",
                "county_name",
                "property_type",
                "square_feet",
                "year_built",
                "latitude",
                "longitude",
                "hex_id",
                "owner_entity",
                "as_of_date",
            ],
            Table::Sales => &[
                "record_key",
                "transaction_key",
                "parcl_property_id",
                "address",
                "county_id",
                "county_name",
                "sale_date",
                "sale_price",
                "square_feet",
                "price_per_sqft",
                "year_built",
                "property_type",
                "latitude",
                "longitude",
                "hex_id",
                "buyer_entity",
                "seller_entity",
                "as_of_date",
            ],
            Table::HexAggregates => &[
                "hex_id",
                "county_id",
                "window_label",
                "window_start",
                "window_end",
                "total_sales",
                "inst_acquisitions",
                "inst_dispositions",
                "median_vintage",
                "median_size",
                "median_price_sf",
                "total_listings",
                "inst_listings",
                "median_list_price_sqft",
                "as_of_date",
            ],
            Table::CountyAggregates => &[
                "county_id",
                "county_name",
                "period",
                "total_sales",
                "inst_acquisitions",
                "inst_dispositions",
                "median_vintage",
                "median_size",
                "median_price_sf",
                "as_of_date",
            ],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed, nullable column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Date(Option<NaiveDate>),
}

/// One row, in [`Table::columns`] order
pub type Row = Vec<Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(
        "Rejected {rejected} of {total} rows for {table} (limit {max_rate:.2}); \
         previous contents kept"
    )]
    RejectRateExceeded {
        table: Table,
        rejected: u64,
        total: u64,
        max_rate: f64,
    },

    #[error("Another run holds the pipeline lock")]
    Locked,

    #[error("Write to {table} failed: {message}")]
    Write { table: Table, message: String },
}

#[async_trait]
pub trait TableStore: Send + Sync {
    /// Take the run-scoped lock; `false` when another run holds it
    async fn try_lock_run(&self) -> Result<bool, StoreError>;

    async fn unlock_run(&self) -> Result<(), StoreError>;

    /// Atomically replace the contents of `table`; returns rows written
    async fn replace_table(&self, table: Table, rows: Vec<Row>) -> Result<u64, StoreError>;

    async fn row_count(&self, table: Table) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_metadata() {
        assert_eq!(Table::HexAggregates.to_string(), "hex_aggregates");
        assert_eq!(Table::Listings.columns()[0], "parcl_property_id");
        assert_eq!(Table::Sales.columns()[0], "record_key");
        for table in Table::ALL {
            assert_eq!(table.columns().last(), Some(&"as_of_date"));
        }
    }
}
