//! Pipeline configuration
//!
//! Loaded from environment variables (a `.env` file is honoured), validated
//! once, then treated as an immutable value for the whole run. Date ranges
//! are derived from the configured windows and the extraction date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::mapping::FieldMap;
use crate::models::{sub_months, County, CountyId, DateRange, MetricWindow};
use crate::store::Table;

pub const DEFAULT_API_BASE_URL: &str = "https://api.parcllabs.com";
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/hexmarket";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_LOOKBACK_LAG_MONTHS: u32 = 2;
pub const DEFAULT_LOOKBACK_WINDOW_MONTHS: u32 = 36;
pub const DEFAULT_HEX_WINDOW_MONTHS: u32 = 12;
pub const DEFAULT_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_H3_RESOLUTION: u8 = 8;
pub const DEFAULT_MAX_PRICE_PER_SQFT: f64 = 2500.0;
pub const DEFAULT_MIN_PRICE: u64 = 50_000;
pub const DEFAULT_MIN_SQFT: u64 = 500;
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_REJECT_RATE: f64 = 0.05;

/// Bind parameters PostgreSQL accepts in one statement
pub const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Property types requested from the provider
pub const DEFAULT_PROPERTY_TYPES: &[&str] = &["SINGLE_FAMILY", "CONDO", "TOWNHOUSE"];

/// Metro Atlanta counties served by the original deployment
pub const DEFAULT_COUNTIES: &[(CountyId, &str)] = &[
    (5821775, "Barrow"),
    (5823208, "Bartow"),
    (5824489, "Butts"),
    (5821127, "Carroll"),
    (5822987, "Cherokee"),
    (5821000, "Clayton"),
    (5822520, "Cobb"),
    (5820743, "Coweta"),
    (5820885, "Dawson"),
    (5821075, "DeKalb"),
    (5822002, "Douglas"),
    (5822843, "Fayette"),
    (5824605, "Forsyth"),
    (5823604, "Fulton"),
    (5822064, "Gwinnett"),
    (5823136, "Haralson"),
    (5821562, "Heard"),
    (5820830, "Henry"),
    (5820767, "Jasper"),
    (5824502, "Lumpkin"),
    (5822765, "Meriwether"),
    (5822014, "Morgan"),
    (5823086, "Newton"),
    (5822617, "Paulding"),
    (5821076, "Pickens"),
    (5822152, "Pike"),
    (5823393, "Rockdale"),
    (5824484, "Spalding"),
    (5821707, "Walton"),
];

pub fn default_counties() -> Vec<County> {
    DEFAULT_COUNTIES
        .iter()
        .map(|(id, name)| County::new(*id, *name))
        .collect()
}

/// Provider secret; `Debug` never prints it
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Lookback windows, in calendar months
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub lag_months: u32,
    pub window_months: u32,
    pub hex_window_months: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            lag_months: DEFAULT_LOOKBACK_LAG_MONTHS,
            window_months: DEFAULT_LOOKBACK_WINDOW_MONTHS,
            hex_window_months: DEFAULT_HEX_WINDOW_MONTHS,
        }
    }
}

/// Provider access settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: ApiKey,
    pub page_size: u32,
    /// Counties extracted concurrently
    pub max_workers: usize,
    pub requests_per_second: u32,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub min_price: u64,
    pub min_sqft: u64,
    pub property_types: Vec<String>,
}

impl ProviderConfig {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key,
            page_size: DEFAULT_PAGE_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            min_price: DEFAULT_MIN_PRICE,
            min_sqft: DEFAULT_MIN_SQFT,
            property_types: DEFAULT_PROPERTY_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Record quality and classification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub max_price_per_sqft: f64,
    /// Optional regexes narrowing which entity names count as institutional
    pub investor_patterns: Vec<String>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_price_per_sqft: DEFAULT_MAX_PRICE_PER_SQFT,
            investor_patterns: Vec::new(),
        }
    }
}

/// Store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub load_batch_size: usize,
    /// Rejected/total row ratio above which a table load is aborted
    pub max_reject_rate: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            max_reject_rate: DEFAULT_MAX_REJECT_RATE,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlConfig {
    pub windows: WindowConfig,
    pub counties: Vec<County>,
    pub listing_fields: FieldMap,
    pub sales_fields: FieldMap,
    pub provider: ProviderConfig,
    pub quality: QualityConfig,
    pub h3_resolution: u8,
    pub store: StoreConfig,
}

impl EtlConfig {
    /// Defaults for everything but the provider secret
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            windows: WindowConfig::default(),
            counties: default_counties(),
            listing_fields: FieldMap::listings_default(),
            sales_fields: FieldMap::sales_default(),
            provider: ProviderConfig::new(api_key),
            quality: QualityConfig::default(),
            h3_resolution: DEFAULT_H3_RESOLUTION,
            store: StoreConfig::default(),
        }
    }

    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let api_key = std::env::var("PARCL_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("PARCL_API_KEY"))?;

        let mut config = Self::new(ApiKey::new(api_key));

        if let Ok(url) = std::env::var("PARCL_API_BASE_URL") {
            config.provider.base_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store.database_url = url;
        }
        config.store.max_connections =
            env_or("DATABASE_MAX_CONNECTIONS", config.store.max_connections)?;

        config.windows.lag_months = env_or("ETL_LOOKBACK_LAG_MONTHS", config.windows.lag_months)?;
        config.windows.window_months =
            env_or("ETL_LOOKBACK_WINDOW_MONTHS", config.windows.window_months)?;
        config.windows.hex_window_months =
            env_or("ETL_HEX_WINDOW_MONTHS", config.windows.hex_window_months)?;

        if let Ok(ids) = std::env::var("ETL_COUNTIES") {
            let ids = parse_county_ids(&ids)?;
            config.counties = config.select_counties(&ids)?;
        }

        let provider = &mut config.provider;
        provider.page_size = env_or("ETL_PAGE_SIZE", provider.page_size)?;
        provider.max_workers = env_or("ETL_MAX_WORKERS", provider.max_workers)?;
        provider.requests_per_second =
            env_or("ETL_REQUESTS_PER_SECOND", provider.requests_per_second)?;
        provider.retry_max_attempts = env_or("ETL_RETRY_MAX_ATTEMPTS", provider.retry_max_attempts)?;
        provider.retry_base_delay_ms =
            env_or("ETL_RETRY_BASE_DELAY_MS", provider.retry_base_delay_ms)?;
        provider.request_timeout_secs =
            env_or("ETL_REQUEST_TIMEOUT_SECS", provider.request_timeout_secs)?;
        provider.min_price = env_or("ETL_MIN_PRICE", provider.min_price)?;
        provider.min_sqft = env_or("ETL_MIN_SQFT", provider.min_sqft)?;

        config.h3_resolution = env_or("ETL_H3_RESOLUTION", config.h3_resolution)?;
        config.quality.max_price_per_sqft =
            env_or("ETL_MAX_PRICE_PER_SQFT", config.quality.max_price_per_sqft)?;
        if let Ok(patterns) = std::env::var("ETL_INVESTOR_PATTERNS") {
            config.quality.investor_patterns = patterns
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.store.load_batch_size = env_or("ETL_LOAD_BATCH_SIZE", config.store.load_batch_size)?;
        config.store.max_reject_rate = env_or("ETL_MAX_REJECT_RATE", config.store.max_reject_rate)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.windows;
        if w.window_months == 0 {
            return Err(ConfigError::invalid("ETL_LOOKBACK_WINDOW_MONTHS", "must be greater than 0"));
        }
        if w.hex_window_months == 0 {
            return Err(ConfigError::invalid("ETL_HEX_WINDOW_MONTHS", "must be greater than 0"));
        }
        if w.hex_window_months > w.window_months {
            return Err(ConfigError::invalid(
                "ETL_HEX_WINDOW_MONTHS",
                format!(
                    "hex window ({} months) exceeds lookback window ({} months)",
                    w.hex_window_months, w.window_months
                ),
            ));
        }
        if self.counties.is_empty() {
            return Err(ConfigError::NoCounties);
        }

        self.listing_fields.validate()?;
        self.sales_fields.validate()?;

        let p = &self.provider;
        if p.api_key.expose().trim().is_empty() {
            return Err(ConfigError::Missing("PARCL_API_KEY"));
        }
        if p.page_size == 0 {
            return Err(ConfigError::invalid("ETL_PAGE_SIZE", "must be greater than 0"));
        }
        if p.max_workers == 0 {
            return Err(ConfigError::invalid("ETL_MAX_WORKERS", "must be greater than 0"));
        }
        if p.requests_per_second == 0 {
            return Err(ConfigError::invalid("ETL_REQUESTS_PER_SECOND", "must be greater than 0"));
        }
        if p.retry_max_attempts == 0 {
            return Err(ConfigError::invalid("ETL_RETRY_MAX_ATTEMPTS", "must be at least 1"));
        }
        if h3o::Resolution::try_from(self.h3_resolution).is_err() {
            return Err(ConfigError::invalid(
                "ETL_H3_RESOLUTION",
                format!("{} is not a valid resolution (0-15)", self.h3_resolution),
            ));
        }
        if !(self.quality.max_price_per_sqft.is_finite() && self.quality.max_price_per_sqft > 0.0) {
            return Err(ConfigError::invalid("ETL_MAX_PRICE_PER_SQFT", "must be a positive number"));
        }
        for pattern in &self.quality.investor_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::invalid("ETL_INVESTOR_PATTERNS", e.to_string()));
            }
        }
        if self.store.load_batch_size == 0 {
            return Err(ConfigError::invalid("ETL_LOAD_BATCH_SIZE", "must be greater than 0"));
        }
        let widest = Table::ALL.iter().map(|t| t.columns().len()).max().unwrap_or(1);
        if self.store.load_batch_size.saturating_mul(widest) > MAX_BIND_PARAMS {
            return Err(ConfigError::invalid(
                "ETL_LOAD_BATCH_SIZE",
                format!(
                    "{} rows of {} columns exceed {} bind parameters per insert",
                    self.store.load_batch_size, widest, MAX_BIND_PARAMS
                ),
            ));
        }
        if !(0.0..=1.0).contains(&self.store.max_reject_rate) {
            return Err(ConfigError::invalid("ETL_MAX_REJECT_RATE", "must be within 0.0..=1.0"));
        }
        Ok(())
    }

    /// Sales extraction range: `[today - lag - window, today - lag]`
    pub fn extraction_range(&self, today: NaiveDate) -> Result<DateRange, ConfigError> {
        let end = sub_months(today, self.windows.lag_months)?;
        let start = sub_months(end, self.windows.window_months)?;
        DateRange::new(start, end)
    }

    /// Listing extraction range: same start, but ends at the extraction date
    pub fn listing_range(&self, today: NaiveDate) -> Result<DateRange, ConfigError> {
        let start = self.extraction_range(today)?.start;
        DateRange::new(start, today)
    }

    /// Trailing hex aggregation window of `range`
    pub fn hex_window(&self, range: DateRange) -> Result<MetricWindow, ConfigError> {
        Ok(MetricWindow {
            label: format!("trailing_{}m", self.windows.hex_window_months),
            range: range.trailing_months(self.windows.hex_window_months)?,
        })
    }

    /// Whole-range window used for county trends
    pub fn county_window(&self, range: DateRange) -> MetricWindow {
        MetricWindow {
            label: format!("lookback_{}m", self.windows.window_months),
            range,
        }
    }

    /// Restrict the configured counties to `ids`, preserving the requested order
    pub fn select_counties(&self, ids: &[CountyId]) -> Result<Vec<County>, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::NoCounties);
        }
        ids.iter()
            .map(|id| {
                self.counties
                    .iter()
                    .find(|c| c.id == *id)
                    .cloned()
                    .ok_or_else(|| {
                        ConfigError::invalid("counties", format!("unknown county id {}", id))
                    })
            })
            .collect()
    }

    pub fn county(&self, id: CountyId) -> Option<&County> {
        self.counties.iter().find(|c| c.id == id)
    }
}

fn parse_county_ids(raw: &str) -> Result<Vec<CountyId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<CountyId>()
                .map_err(|e| ConfigError::invalid("ETL_COUNTIES", format!("'{}': {}", s, e)))
        })
        .collect()
}

/// Read and parse an environment variable, falling back to `default` when unset
fn env_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(name, format!("'{}': {}", raw, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mapping::SQUARE_FEET;
    use serial_test::serial;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn config() -> EtlConfig {
        EtlConfig::new(ApiKey::new("test-key"))
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.counties.len(), 29);
        assert_eq!(config.windows, WindowConfig::default());
        assert_eq!(config.counties[9].geometry_ref, "parcl:5821075");
    }

    #[test]
    fn test_window_correctness() {
        let config = config();
        let range = config.extraction_range(date("2026-10-18")).unwrap();
        assert_eq!(range.end, date("2026-08-18"));
        assert_eq!(range.start, date("2023-08-18"));

        let hex = config.hex_window(range).unwrap();
        assert_eq!(hex.label, "trailing_12m");
        assert_eq!(hex.range.start, date("2025-08-19"));
        assert_eq!(hex.range.end, date("2026-08-18"));

        let listings = config.listing_range(date("2026-10-18")).unwrap();
        assert_eq!(listings.start, date("2023-08-18"));
        assert_eq!(listings.end, date("2026-10-18"));
    }

    #[test]
    fn test_rejects_invalid_windows() {
        let mut zero = config();
        zero.windows.window_months = 0;
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid { .. })));

        let mut wide = config();
        wide.windows.hex_window_months = 48;
        assert!(matches!(wide.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_empty_counties_and_bad_mappings() {
        let mut empty = config();
        empty.counties.clear();
        assert_eq!(empty.validate(), Err(ConfigError::NoCounties));

        let mut unmapped = config();
        unmapped.sales_fields = unmapped.sales_fields.without_field(SQUARE_FEET);
        assert!(matches!(
            unmapped.validate(),
            Err(ConfigError::IncompleteMapping { field: "square_feet", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_investor_pattern() {
        let mut config = config();
        config.quality.investor_patterns = vec!["(unclosed".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_batch_size_fits_bind_parameter_limit() {
        let widest = Table::ALL.iter().map(|t| t.columns().len()).max().unwrap();
        assert_eq!(widest, 21);

        let mut largest = config();
        largest.store.load_batch_size = MAX_BIND_PARAMS / widest;
        assert!(largest.validate().is_ok());

        let mut too_large = config();
        too_large.store.load_batch_size = MAX_BIND_PARAMS / widest + 1;
        assert!(matches!(
            too_large.validate(),
            Err(ConfigError::Invalid { name: "ETL_LOAD_BATCH_SIZE", .. })
        ));
    }

    #[test]
    fn test_select_counties() {
        let config = config();
        let picked = config.select_counties(&[5823604, 5822520]).unwrap();
        assert_eq!(picked[0].name, "Fulton");
        assert_eq!(picked[1].name, "Cobb");
        assert!(config.select_counties(&[1]).is_err());
        assert_eq!(config.select_counties(&[]), Err(ConfigError::NoCounties));
    }

    #[test]
    fn test_api_key_is_redacted() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("test-key"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("PARCL_API_KEY", "env-key");
        std::env::set_var("ETL_COUNTIES", "5823604, 5822064");
        std::env::set_var("ETL_MAX_WORKERS", "2");
        std::env::set_var("ETL_INVESTOR_PATTERNS", "(?i)llc$, (?i)homes");

        let config = EtlConfig::from_env().unwrap();
        assert_eq!(config.provider.api_key.expose(), "env-key");
        assert_eq!(config.counties.len(), 2);
        assert_eq!(config.counties[1].name, "Gwinnett");
        assert_eq!(config.provider.max_workers, 2);
        assert_eq!(config.quality.investor_patterns.len(), 2);

        std::env::set_var("ETL_MAX_WORKERS", "many");
        assert!(matches!(
            EtlConfig::from_env(),
            Err(ConfigError::Invalid { name: "ETL_MAX_WORKERS", .. })
        ));

        std::env::remove_var("ETL_COUNTIES");
        std::env::remove_var("ETL_MAX_WORKERS");
        std::env::remove_var("ETL_INVESTOR_PATTERNS");
        std::env::remove_var("PARCL_API_KEY");
    }

    #[test]
    #[serial]
    fn test_from_env_requires_api_key() {
        std::env::remove_var("PARCL_API_KEY");
        // A developer .env may define the key; only assert when it is absent
        if dotenvy::var("PARCL_API_KEY").is_err() {
            assert_eq!(EtlConfig::from_env(), Err(ConfigError::Missing("PARCL_API_KEY")));
        }
    }
}
