//! Provider field mappings and value coercion
//!
//! A [`FieldMap`] translates internal field names (`price`, `event_date`, ...)
//! into the flattened provider keys found on a [`RawRecord`]. Mappings are
//! validated once at configuration time; the coercion helpers below never
//! panic and return `None` for anything they cannot interpret.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ConfigError;
use crate::models::{DataKind, RawRecord};

// Internal field names shared by both record families
pub const PROPERTY_ID: &str = "property_id";
pub const EVENT_DATE: &str = "event_date";
pub const PRICE: &str = "price";
pub const SQUARE_FEET: &str = "square_feet";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const ADDRESS: &str = "address";
pub const PROPERTY_TYPE: &str = "property_type";
pub const YEAR_BUILT: &str = "year_built";
pub const COUNTY_NAME: &str = "county_name";

// Listings only
pub const EVENT_TYPE: &str = "event_type";
pub const SALE_CYCLE: &str = "sale_cycle";
pub const OWNER_ENTITY: &str = "owner_entity";

// Sales only
pub const TRANSACTION_ID: &str = "transaction_id";
pub const BUYER_ENTITY: &str = "buyer_entity";
pub const SELLER_ENTITY: &str = "seller_entity";

const LISTING_REQUIRED: &[&str] = &[
    PROPERTY_ID,
    EVENT_TYPE,
    EVENT_DATE,
    PRICE,
    SQUARE_FEET,
    LATITUDE,
    LONGITUDE,
];

const SALES_REQUIRED: &[&str] = &[PROPERTY_ID, EVENT_DATE, PRICE, SQUARE_FEET, LATITUDE, LONGITUDE];

/// Internal field name -> flattened provider key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    kind: DataKind,
    fields: BTreeMap<String, String>,
}

impl FieldMap {
    pub fn listings_default() -> Self {
        Self::from_pairs(
            DataKind::Listings,
            &[
                (PROPERTY_ID, "parcl_property_id"),
                (EVENT_TYPE, "event_event_type"),
                (EVENT_DATE, "event_event_date"),
                (PRICE, "event_price"),
                (SALE_CYCLE, "event_true_sale_index"),
                (SQUARE_FEET, "property_metadata_sq_ft"),
                (LATITUDE, "property_metadata_latitude"),
                (LONGITUDE, "property_metadata_longitude"),
                (ADDRESS, "property_metadata_address1"),
                (PROPERTY_TYPE, "property_metadata_property_type"),
                (YEAR_BUILT, "property_metadata_year_built"),
                (COUNTY_NAME, "property_metadata_county_name"),
                (OWNER_ENTITY, "property_metadata_current_entity_owner_name"),
            ],
        )
    }

    pub fn sales_default() -> Self {
        Self::from_pairs(
            DataKind::Sales,
            &[
                (PROPERTY_ID, "parcl_property_id"),
                (TRANSACTION_ID, "event_transaction_id"),
                (EVENT_DATE, "event_event_date"),
                (PRICE, "event_price"),
                (SQUARE_FEET, "property_metadata_sq_ft"),
                (LATITUDE, "property_metadata_latitude"),
                (LONGITUDE, "property_metadata_longitude"),
                (ADDRESS, "property_metadata_address1"),
                (PROPERTY_TYPE, "property_metadata_property_type"),
                (YEAR_BUILT, "property_metadata_year_built"),
                (COUNTY_NAME, "property_metadata_county_name"),
                (BUYER_ENTITY, "event_entity_owner_name"),
                (SELLER_ENTITY, "event_entity_seller_name"),
            ],
        )
    }

    fn from_pairs(kind: DataKind, pairs: &[(&str, &str)]) -> Self {
        Self {
            kind,
            fields: pairs
                .iter()
                .map(|(internal, provider)| (internal.to_string(), provider.to_string()))
                .collect(),
        }
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Override or add one mapping
    pub fn with_field(mut self, internal: &str, provider: impl Into<String>) -> Self {
        self.fields.insert(internal.to_string(), provider.into());
        self
    }

    /// Remove a mapping; the field then reads as absent on every record
    pub fn without_field(mut self, internal: &str) -> Self {
        self.fields.remove(internal);
        self
    }

    pub fn provider_key(&self, internal: &str) -> Option<&str> {
        self.fields.get(internal).map(String::as_str)
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self.kind {
            DataKind::Listings => LISTING_REQUIRED,
            DataKind::Sales => SALES_REQUIRED,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for field in self.required_fields() {
            let mapped = self
                .fields
                .get(*field)
                .map(|key| !key.trim().is_empty())
                .unwrap_or(false);
            if !mapped {
                return Err(ConfigError::IncompleteMapping {
                    kind: self.kind,
                    field,
                });
            }
        }
        Ok(())
    }

    /// Look up an internal field on a raw record; `null` reads as absent
    pub fn value<'a>(&self, raw: &'a RawRecord, internal: &str) -> Option<&'a Value> {
        self.provider_key(internal).and_then(|key| raw.get(key))
    }
}

/// Numbers arrive as JSON numbers or numeric strings
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
        },
        _ => None,
    }
}

/// Non-blank trimmed text; numbers are rendered as text
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `YYYY-MM-DD`, or the date prefix of an RFC 3339 timestamp
pub fn as_date(value: &Value) -> Option<NaiveDate> {
    let s = value.as_str()?.trim();
    let prefix = s.get(..10)?;
    if s.len() > 10 && !matches!(s.as_bytes()[10], b'T' | b't' | b' ') {
        return None;
    }
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Provider property type -> display label
pub fn standardize_property_type(raw: &str) -> String {
    match raw.trim().to_ascii_uppercase().as_str() {
        "SINGLE_FAMILY" => "SFR".to_string(),
        "CONDO" => "Condo".to_string(),
        "TOWNHOUSE" => "Townhouse".to_string(),
        _ => raw.trim().to_string(),
    }
}

/// Strip the trailing " County" the provider appends to county names
pub fn standardize_county_name(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_suffix(" County")
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}
