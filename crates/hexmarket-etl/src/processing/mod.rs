//! Cleaning, filtering and aggregation
//!
//! Everything in this module is a pure function of its inputs: no I/O, no
//! clocks. Records that fail validation are dropped and counted by
//! [`DropReason`]; they are never repaired.

pub mod aggregate;
pub mod investor;
pub mod listings;
pub mod sales;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::hex::HexIndexer;
use crate::mapping::{self, FieldMap};
use crate::models::{County, CountyId, Coordinates, RawRecord};

pub use aggregate::{merge_hex_aggregates, verify_hex_totals};
pub use investor::InvestorPolicy;
pub use listings::ListingsProcessor;
pub use sales::{FilterOutcome, SalesProcessor};

/// Why a raw record was dropped during cleaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DropReason {
    /// A required field is absent or null
    Missing(&'static str),
    /// A required field is present but cannot be coerced
    Invalid(&'static str),
    /// A price or area is zero or negative
    NonPositive(&'static str),
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Missing(field) => write!(f, "missing_{}", field),
            DropReason::Invalid(field) => write!(f, "invalid_{}", field),
            DropReason::NonPositive(field) => write!(f, "non_positive_{}", field),
        }
    }
}

/// Per-reason drop counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropCounts(BTreeMap<DropReason, u64>);

impl DropCounts {
    pub fn record(&mut self, reason: DropReason) {
        *self.0.entry(reason).or_default() += 1;
    }

    pub fn get(&self, reason: DropReason) -> u64 {
        self.0.get(&reason).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DropReason, &u64)> {
        self.0.iter()
    }

    /// Counts keyed by the reason's display label
    pub fn labelled(&self) -> BTreeMap<String, u64> {
        self.0.iter().map(|(r, n)| (r.to_string(), *n)).collect()
    }
}

/// Result of cleaning a batch of raw records
#[derive(Debug, Clone, PartialEq)]
pub struct CleanOutcome<T> {
    pub records: Vec<T>,
    pub dropped: DropCounts,
}

/// Inputs shared by both processors when typing a raw record
#[derive(Clone)]
pub(crate) struct CleanContext {
    county_names: BTreeMap<CountyId, String>,
    indexer: Arc<dyn HexIndexer>,
}

impl CleanContext {
    pub fn new(counties: &[County], indexer: Arc<dyn HexIndexer>) -> Self {
        Self {
            county_names: counties.iter().map(|c| (c.id, c.name.clone())).collect(),
            indexer,
        }
    }

    /// Type the fields both record families share
    ///
    /// Price, area and location are required on top of
    /// [`event_fields`](Self::event_fields).
    pub fn property_fields(
        &self,
        fields: &FieldMap,
        raw: &RawRecord,
    ) -> Result<PropertyFields, DropReason> {
        let event = self.event_fields(fields, raw)?;
        let location = event.location.ok_or(DropReason::Missing("location"))?;
        let price = positive_number(fields, raw, mapping::PRICE)?;
        let square_feet = positive_number(fields, raw, mapping::SQUARE_FEET)?;

        Ok(PropertyFields {
            event,
            price,
            square_feet,
            location,
        })
    }

    /// Type an event where only the property id and date are required
    ///
    /// Absent or unusable prices, areas and coordinates become `None`.
    pub fn event_fields(&self, fields: &FieldMap, raw: &RawRecord) -> Result<EventFields, DropReason> {
        let property_id = required(fields, raw, mapping::PROPERTY_ID)?;
        let property_id = mapping::as_integer(property_id)
            .and_then(|id| u64::try_from(id).ok())
            .ok_or(DropReason::Invalid(mapping::PROPERTY_ID))?;

        let event_date = required(fields, raw, mapping::EVENT_DATE)?;
        let event_date =
            mapping::as_date(event_date).ok_or(DropReason::Invalid(mapping::EVENT_DATE))?;

        let location = location(fields, raw);

        let county_name = self
            .county_names
            .get(&raw.county_id)
            .cloned()
            .or_else(|| {
                fields
                    .value(raw, mapping::COUNTY_NAME)
                    .and_then(mapping::as_text)
                    .map(|name| mapping::standardize_county_name(&name))
            })
            .unwrap_or_else(|| raw.county_id.to_string());

        Ok(EventFields {
            property_id,
            event_date,
            price: positive_number(fields, raw, mapping::PRICE).ok(),
            square_feet: positive_number(fields, raw, mapping::SQUARE_FEET).ok(),
            hex_id: location.and_then(|l| self.indexer.index(l)),
            location,
            address: text(fields, raw, mapping::ADDRESS),
            property_type: text(fields, raw, mapping::PROPERTY_TYPE)
                .map(|t| mapping::standardize_property_type(&t)),
            year_built: fields
                .value(raw, mapping::YEAR_BUILT)
                .and_then(mapping::as_integer)
                .filter(|year| *year > 0)
                .and_then(|year| i32::try_from(year).ok()),
            county_id: raw.county_id,
            county_name,
        })
    }
}

/// Fields of any property event, price and position optional
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EventFields {
    pub property_id: u64,
    pub event_date: NaiveDate,
    pub price: Option<f64>,
    pub square_feet: Option<f64>,
    pub location: Option<Coordinates>,
    pub hex_id: Option<String>,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub year_built: Option<i32>,
    pub county_id: CountyId,
    pub county_name: String,
}

/// Event fields with a validated price, area and location
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PropertyFields {
    pub event: EventFields,
    pub price: f64,
    pub square_feet: f64,
    pub location: Coordinates,
}

impl PropertyFields {
    pub fn price_per_sqft(&self) -> f64 {
        self.price / self.square_feet
    }
}

fn required<'a>(
    fields: &FieldMap,
    raw: &'a RawRecord,
    name: &'static str,
) -> Result<&'a serde_json::Value, DropReason> {
    fields.value(raw, name).ok_or(DropReason::Missing(name))
}

fn positive_number(fields: &FieldMap, raw: &RawRecord, name: &'static str) -> Result<f64, DropReason> {
    let value = mapping::as_number(required(fields, raw, name)?).ok_or(DropReason::Invalid(name))?;
    if value <= 0.0 {
        return Err(DropReason::NonPositive(name));
    }
    Ok(value)
}

fn location(fields: &FieldMap, raw: &RawRecord) -> Option<Coordinates> {
    Some(Coordinates {
        latitude: fields.value(raw, mapping::LATITUDE).and_then(mapping::as_number)?,
        longitude: fields.value(raw, mapping::LONGITUDE).and_then(mapping::as_number)?,
    })
}

pub(crate) fn text(fields: &FieldMap, raw: &RawRecord, name: &str) -> Option<String> {
    fields.value(raw, name).and_then(mapping::as_text)
}
