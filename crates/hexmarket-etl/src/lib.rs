//! Hexmarket ETL
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Extracts listing and sale records for a set of counties from the Parcl
//! Labs property search API, cleans and filters them, aggregates them onto an
//! H3 hexagon grid and into monthly county buckets, and replaces the output
//! tables in PostgreSQL.
//!
//! # Components
//!
//! - [`config`]: environment-driven [`EtlConfig`] and derived date windows
//! - [`source`]: the [`SourceClient`] boundary and the HTTP [`ParclClient`]
//! - [`processing`]: pure cleaning, filtering and aggregation
//! - [`store`]: row conversion, [`StoreLoader`] and the table stores
//! - [`orchestrator`]: stage sequencing and failure containment
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hexmarket_etl::{EtlConfig, Orchestrator, ParclClient, PgStore, RunRequest};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EtlConfig::from_env()?;
//! let source = Arc::new(ParclClient::new(config.provider.clone())?);
//! let store = Arc::new(PgStore::connect(&config.store).await?);
//! store.migrate().await?;
//!
//! let orchestrator = Orchestrator::new(config, source, store)?;
//! let summary = orchestrator
//!     .run(RunRequest::new(chrono::Local::now().date_naive()))
//!     .await;
//! println!("{}", summary.render());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hex;
pub mod mapping;
pub mod models;
pub mod orchestrator;
pub mod processing;
pub mod source;
pub mod stats;
pub mod store;
pub mod summary;

pub use config::{ApiKey, EtlConfig};
pub use error::{AggregationError, ConfigError, EtlError, Result, SourceError};
pub use hex::{H3Indexer, HexIndexer};
pub use models::{County, CountyId, DataKind, DateRange, RawRecord};
pub use orchestrator::{Orchestrator, RunRequest};
pub use source::{ParclClient, SourceClient};
pub use store::{MemoryStore, PgStore, StoreError, StoreLoader, TableStore};
pub use summary::{RunStatus, RunSummary};
