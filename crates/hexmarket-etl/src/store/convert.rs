//! Record to row conversion

use chrono::NaiveDate;
use thiserror::Error;

use super::{Row, Table, Value};
use crate::models::{CleanedSaleRecord, CountyAggregate, CurrentListing, HexAggregate};

/// A value that cannot be represented in its column
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("{column}: non-finite number")]
    NonFinite { column: &'static str },

    #[error("{column}: {value} does not fit a BIGINT")]
    OutOfRange { column: &'static str, value: u64 },
}

/// Conversion of an output record into a row of its table
pub trait ToRow {
    const TABLE: Table;

    /// Natural key used in reject logs
    fn key(&self) -> String;

    fn to_row(&self, as_of: NaiveDate) -> Result<Row, RowError>;
}

fn float(column: &'static str, value: f64) -> Result<Value, RowError> {
    opt_float(column, Some(value))
}

fn opt_float(column: &'static str, value: Option<f64>) -> Result<Value, RowError> {
    match value {
        Some(v) if !v.is_finite() => Err(RowError::NonFinite { column }),
        other => Ok(Value::Float(other)),
    }
}

fn int(column: &'static str, value: u64) -> Result<Value, RowError> {
    opt_int(column, Some(value))
}

fn opt_int(column: &'static str, value: Option<u64>) -> Result<Value, RowError> {
    value
        .map(|v| i64::try_from(v).map_err(|_| RowError::OutOfRange { column, value: v }))
        .transpose()
        .map(Value::Int)
}

fn text(value: Option<&str>) -> Value {
    Value::Text(value.map(str::to_string))
}

fn date(value: NaiveDate) -> Value {
    Value::Date(Some(value))
}

impl ToRow for CurrentListing {
    const TABLE: Table = Table::Listings;

    fn key(&self) -> String {
        self.latest.property_id.to_string()
    }

    fn to_row(&self, as_of: NaiveDate) -> Result<Row, RowError> {
        let l = &self.latest;
        Ok(vec![
            int("parcl_property_id", l.property_id)?,
            date(self.original_list_date),
            float("original_list_price", self.original_list_price)?,
            date(self.current_list_date()),
            float("current_list_price", self.current_list_price)?,
            float("list_price_per_sqft", self.list_price_per_sqft)?,
            Value::Int(Some(self.days_on_market)),
            Value::Date(self.most_recent_sale_date),
            opt_float("most_recent_sale_price", self.most_recent_sale_price)?,
            opt_float("listing_to_sale_ratio", self.listing_to_sale_ratio)?,
            text(l.address.as_deref()),
            int("county_id", l.county_id)?,
            text(Some(&l.county_name)),
            text(l.property_type.as_deref()),
            float("square_feet", self.square_feet)?,
            Value::Int(l.year_built.map(i64::from)),
            float("latitude", self.location.latitude)?,
            float("longitude", self.location.longitude)?,
            text(l.hex_id.as_deref()),
            text(l.owner_entity.as_deref()),
            date(as_of),
        ])
    }
}

impl ToRow for CleanedSaleRecord {
    const TABLE: Table = Table::Sales;

    fn key(&self) -> String {
        format!("{}|{}", self.transaction_key, self.property_id)
    }

    fn to_row(&self, as_of: NaiveDate) -> Result<Row, RowError> {
        Ok(vec![
            Value::Text(Some(self.key())),
            text(Some(&self.transaction_key)),
            int("parcl_property_id", self.property_id)?,
            text(self.address.as_deref()),
            int("county_id", self.county_id)?,
            text(Some(&self.county_name)),
            date(self.sale_date),
            float("sale_price", self.sale_price)?,
            float("square_feet", self.square_feet)?,
            float("price_per_sqft", self.price_per_sqft)?,
            Value::Int(self.year_built.map(i64::from)),
            text(self.property_type.as_deref()),
            float("latitude", self.location.latitude)?,
            float("longitude", self.location.longitude)?,
            text(self.hex_id.as_deref()),
            text(self.buyer.as_deref()),
            text(self.seller.as_deref()),
            date(as_of),
        ])
    }
}

impl ToRow for HexAggregate {
    const TABLE: Table = Table::HexAggregates;

    fn key(&self) -> String {
        format!("{}|{}|{}", self.hex_id, self.county_id, self.window.label)
    }

    fn to_row(&self, as_of: NaiveDate) -> Result<Row, RowError> {
        let s = self.sales.as_ref();
        let l = self.listings.as_ref();
        Ok(vec![
            text(Some(&self.hex_id)),
            int("county_id", self.county_id)?,
            text(Some(&self.window.label)),
            date(self.window.range.start),
            date(self.window.range.end),
            opt_int("total_sales", s.map(|m| m.total_sales))?,
            opt_int("inst_acquisitions", s.map(|m| m.inst_acquisitions))?,
            opt_int("inst_dispositions", s.map(|m| m.inst_dispositions))?,
            opt_float("median_vintage", s.and_then(|m| m.median_vintage))?,
            opt_float("median_size", s.and_then(|m| m.median_size))?,
            opt_float("median_price_sf", s.and_then(|m| m.median_price_per_sqft))?,
            opt_int("total_listings", l.map(|m| m.total_listings))?,
            opt_int("inst_listings", l.map(|m| m.inst_listings))?,
            opt_float("median_list_price_sqft", l.and_then(|m| m.median_list_price_per_sqft))?,
            date(as_of),
        ])
    }
}

impl ToRow for CountyAggregate {
    const TABLE: Table = Table::CountyAggregates;

    fn key(&self) -> String {
        format!("{}|{}", self.county_id, self.period)
    }

    fn to_row(&self, as_of: NaiveDate) -> Result<Row, RowError> {
        let m = &self.metrics;
        Ok(vec![
            int("county_id", self.county_id)?,
            text(Some(&self.county_name)),
            text(Some(&self.period)),
            int("total_sales", m.total_sales)?,
            int("inst_acquisitions", m.inst_acquisitions)?,
            int("inst_dispositions", m.inst_dispositions)?,
            opt_float("median_vintage", m.median_vintage)?,
            opt_float("median_size", m.median_size)?,
            opt_float("median_price_sf", m.median_price_per_sqft)?,
            date(as_of),
        ])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{DateRange, MetricWindow, SalesMetrics};

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn county(median: Option<f64>, total: u64) -> CountyAggregate {
        CountyAggregate {
            county_id: 5823604,
            county_name: "Fulton".to_string(),
            period: "2026-06".to_string(),
            metrics: SalesMetrics {
                total_sales: total,
                median_price_per_sqft: median,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_row_width_matches_columns() {
        let row = county(Some(210.0), 4).to_row(as_of()).unwrap();
        assert_eq!(row.len(), Table::CountyAggregates.columns().len());
        assert_eq!(row[3], Value::Int(Some(4)));
        assert_eq!(row.last(), Some(&Value::Date(Some(as_of()))));

        let hex = HexAggregate {
            hex_id: "88446d0c6bfffff".to_string(),
            county_id: 5823604,
            window: MetricWindow {
                label: "trailing_12m".to_string(),
                range: DateRange::new(as_of(), as_of()).unwrap(),
            },
            sales: None,
            listings: None,
        };
        let row = hex.to_row(as_of()).unwrap();
        assert_eq!(row.len(), Table::HexAggregates.columns().len());
        assert_eq!(row[5], Value::Int(None));
    }

    #[test]
    fn test_rejects_unrepresentable_values() {
        assert_eq!(
            county(Some(f64::INFINITY), 1).to_row(as_of()),
            Err(RowError::NonFinite { column: "median_price_sf" })
        );
        assert_eq!(
            county(None, u64::MAX).to_row(as_of()),
            Err(RowError::OutOfRange {
                column: "total_sales",
                value: u64::MAX
            })
        );
    }
}
