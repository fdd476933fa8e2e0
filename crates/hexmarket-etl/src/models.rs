//! Value types flowing through the pipeline
//!
//! Everything here is created fresh for a run and carries no cross-run
//! identity; store primary keys are derived by the loader.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// Provider identifier of a county (parcl id)
pub type CountyId = u64;

/// A county to extract and aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct County {
    pub id: CountyId,
    pub name: String,
    /// Opaque reference to the county geometry used to bound hex queries
    pub geometry_ref: String,
}

impl County {
    pub fn new(id: CountyId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            geometry_ref: format!("parcl:{}", id),
        }
    }
}

/// The two record families the pipeline processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    Listings,
    Sales,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Listings => write!(f, "listings"),
            DataKind::Sales => write!(f, "sales"),
        }
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::invalid(
                "date_range",
                format!("start {} is after end {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// The trailing `months` of this range: `(end - months, end]`, clamped
    /// to the range start
    pub fn trailing_months(&self, months: u32) -> Result<Self, ConfigError> {
        let boundary = sub_months(self.end, months)?;
        let start = boundary
            .succ_opt()
            .ok_or_else(|| ConfigError::DateOutOfRange(boundary.to_string()))?;
        Ok(Self {
            start: start.max(self.start),
            end: self.end,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Subtract calendar months, clamping to the end of shorter months
pub fn sub_months(date: NaiveDate, months: u32) -> Result<NaiveDate, ConfigError> {
    date.checked_sub_months(Months::new(months))
        .ok_or_else(|| ConfigError::DateOutOfRange(format!("{} - {} months", date, months)))
}

/// `YYYY-MM` bucket used for county trend periods
pub fn month_period(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Named aggregation window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricWindow {
    /// Stable label used as part of the store key, e.g. `trailing_12m`
    pub label: String,
    pub range: DateRange,
}

/// WGS84 point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Finite, in range, and not the (0, 0) placeholder some feeds emit
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && !(self.latitude == 0.0 && self.longitude == 0.0)
    }
}

/// Provider-native record, flattened into `parent_child` keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub county_id: CountyId,
    pub fields: BTreeMap<String, Value>,
}

impl RawRecord {
    /// Build from one provider item; `None` when the item is not an object
    pub fn from_json(county_id: CountyId, item: Value) -> Option<Self> {
        match item {
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                flatten_into(&mut fields, None, map);
                Some(Self { county_id, fields })
            },
            _ => None,
        }
    }

    /// Field value, treating JSON `null` as absent
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: Option<&str>, map: Map<String, Value>) {
    for (key, value) in map {
        let name = match prefix {
            Some(p) => format!("{}_{}", p, key),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&name), inner),
            other => {
                out.insert(name, other);
            },
        }
    }
}

/// Listing history event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingEventType {
    Listing,
    Sale,
    Delisting,
    Other,
}

impl ListingEventType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "LISTING" | "LISTED" | "PRICE_CHANGE" | "RELISTED" => Self::Listing,
            "SALE" | "SOLD" => Self::Sale,
            "DELISTING" | "DELISTED" | "WITHDRAWN" | "CANCELLED" | "EXPIRED" => Self::Delisting,
            _ => Self::Other,
        }
    }

    /// Ends the listing it follows
    pub fn closes_listing(self) -> bool {
        matches!(self, Self::Sale | Self::Delisting)
    }
}

/// Typed listing history event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedListingRecord {
    /// Position of the source record in the combined raw input
    pub record_id: u64,
    pub property_id: u64,
    pub event_type: ListingEventType,
    pub event_date: NaiveDate,
    /// Always present on listing events; optional on sales and delistings
    pub price: Option<f64>,
    pub square_feet: Option<f64>,
    pub price_per_sqft: Option<f64>,
    /// Provider sale-cycle counter; events after a sale start a new cycle
    pub sale_cycle: i64,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub year_built: Option<i32>,
    pub location: Option<Coordinates>,
    pub hex_id: Option<String>,
    pub county_id: CountyId,
    pub county_name: String,
    pub owner_entity: Option<String>,
}

/// A property still on the market at the extraction date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentListing {
    /// Most recent listing event of the active cycle
    pub latest: CleanedListingRecord,
    pub current_list_price: f64,
    pub list_price_per_sqft: f64,
    pub square_feet: f64,
    pub location: Coordinates,
    pub original_list_date: NaiveDate,
    pub original_list_price: f64,
    pub days_on_market: i64,
    pub most_recent_sale_date: Option<NaiveDate>,
    pub most_recent_sale_price: Option<f64>,
    pub listing_to_sale_ratio: Option<f64>,
}

impl CurrentListing {
    pub fn current_list_date(&self) -> NaiveDate {
        self.latest.event_date
    }
}

/// Typed sale transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedSaleRecord {
    pub record_id: u64,
    /// Provider transaction id, or `county|date|price` when absent
    pub transaction_key: String,
    pub property_id: u64,
    pub address: Option<String>,
    pub county_id: CountyId,
    pub county_name: String,
    pub sale_date: NaiveDate,
    pub sale_price: f64,
    pub square_feet: f64,
    pub price_per_sqft: f64,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,
    pub location: Coordinates,
    pub hex_id: Option<String>,
    pub buyer: Option<String>,
    pub seller: Option<String>,
}

/// A sale with an institutional party on at least one side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorSaleRecord {
    pub sale: CleanedSaleRecord,
    /// Buyer is institutional
    pub acquisition: bool,
    /// Seller is institutional
    pub disposition: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SalesMetrics {
    pub total_sales: u64,
    pub inst_acquisitions: u64,
    pub inst_dispositions: u64,
    pub median_vintage: Option<f64>,
    pub median_size: Option<f64>,
    pub median_price_per_sqft: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListingMetrics {
    pub total_listings: u64,
    pub inst_listings: u64,
    pub median_list_price_per_sqft: Option<f64>,
}

/// Metrics for one hexagon within one county over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexAggregate {
    pub hex_id: String,
    pub county_id: CountyId,
    pub window: MetricWindow,
    pub sales: Option<SalesMetrics>,
    pub listings: Option<ListingMetrics>,
}

/// Monthly county trend bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyAggregate {
    pub county_id: CountyId,
    pub county_name: String,
    /// `YYYY-MM`
    pub period: String,
    pub metrics: SalesMetrics,
}
