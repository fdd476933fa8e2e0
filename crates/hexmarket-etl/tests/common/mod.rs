//! Common utilities for hexmarket-etl integration tests
//!
//! - [`ScriptedSource`]: a [`SourceClient`] answering from per-county scripts
//! - raw record builders using the default provider field names
//! - [`TestPostgres`]: a PostgreSQL container with migrations applied

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use hexmarket_etl::config::ApiKey;
use hexmarket_etl::models::{County, CountyId, DataKind, DateRange, RawRecord};
use hexmarket_etl::{EtlConfig, PgStore, SourceClient, SourceError};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

pub const FULTON: CountyId = 5823604;
pub const COBB: CountyId = 5822520;
pub const DEKALB: CountyId = 5821075;

/// Inside Fulton County
pub const ATLANTA: (f64, f64) = (33.7490, -84.3880);
/// Inside Cobb County
pub const MARIETTA: (f64, f64) = (33.9526, -84.5499);

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

/// Config limited to `counties`, with defaults otherwise
pub fn config_for(counties: &[CountyId]) -> EtlConfig {
    let mut config = EtlConfig::new(ApiKey::new("test-key"));
    config.counties = config
        .select_counties(counties)
        .expect("known test counties");
    config
}

// ============================================================================
// Scripted source
// ============================================================================

type Script = Result<Vec<Value>, SourceError>;

/// Source answering from per-(kind, county) scripts; unscripted pairs return
/// no records
#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<(DataKind, CountyId), Script>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(mut self, kind: DataKind, county: CountyId, items: Vec<Value>) -> Self {
        self.scripts.insert((kind, county), Ok(items));
        self
    }

    pub fn with_error(mut self, kind: DataKind, county: CountyId, error: SourceError) -> Self {
        self.scripts.insert((kind, county), Err(error));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self, kind: DataKind, county: &County) -> Result<Vec<RawRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.scripts.get(&(kind, county.id)) {
            Some(Ok(items)) => Ok(items
                .iter()
                .filter_map(|item| RawRecord::from_json(county.id, item.clone()))
                .collect()),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn fetch_listings(
        &self,
        county: &County,
        _range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.answer(DataKind::Listings, county)
    }

    async fn fetch_sales(
        &self,
        county: &County,
        _range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.answer(DataKind::Sales, county)
    }
}

// ============================================================================
// Provider item builders
// ============================================================================

/// A property search item for one sale event
pub fn sale_item(
    property_id: u64,
    transaction_id: Option<&str>,
    sale_date: &str,
    price: f64,
    square_feet: f64,
    at: (f64, f64),
) -> Value {
    let mut item = json!({
        "parcl_property_id": property_id,
        "event": {
            "event_type": "SALE",
            "event_date": sale_date,
            "price": price,
        },
        "property_metadata": {
            "sq_ft": square_feet,
            "latitude": at.0,
            "longitude": at.1,
            "address1": format!("{} Peachtree St", property_id),
            "property_type": "SINGLE_FAMILY",
            "year_built": 1995,
        },
    });
    if let Some(id) = transaction_id {
        item["event"]["transaction_id"] = json!(id);
    }
    item
}

/// Attach buyer/seller entity names to a sale item
pub fn with_entities(mut item: Value, buyer: Option<&str>, seller: Option<&str>) -> Value {
    if let Some(buyer) = buyer {
        item["event"]["entity_owner_name"] = json!(buyer);
    }
    if let Some(seller) = seller {
        item["event"]["entity_seller_name"] = json!(seller);
    }
    item
}

/// A property search item for one listing history event
pub fn listing_item(
    property_id: u64,
    event_type: &str,
    event_date: &str,
    price: f64,
    cycle: i64,
    at: (f64, f64),
) -> Value {
    json!({
        "parcl_property_id": property_id,
        "event": {
            "event_type": event_type,
            "event_date": event_date,
            "price": price,
            "true_sale_index": cycle,
        },
        "property_metadata": {
            "sq_ft": 2000.0,
            "latitude": at.0,
            "longitude": at.1,
            "address1": format!("{} Roswell Rd", property_id),
            "property_type": "SINGLE_FAMILY",
            "year_built": 2004,
        },
    })
}

/// Null out an item's event price, as the provider does for many delistings
pub fn without_price(mut item: Value) -> Value {
    item["event"]["price"] = Value::Null;
    item
}

// ============================================================================
// PostgreSQL test container
// ============================================================================

/// PostgreSQL container with the pipeline migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;
        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        PgStore::from_pool(pool.clone(), 2)
            .migrate()
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A store over the shared pool with a small insert batch
    pub fn store(&self, batch_size: usize) -> PgStore {
        PgStore::from_pool(self.pool.clone(), batch_size)
    }
}
