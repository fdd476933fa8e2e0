//! Hexmarket Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Ambient infrastructure shared by the hexmarket binaries.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment
//!   variables, with console, rolling-file or combined output.
//!
//! # Example
//!
//! ```no_run
//! use hexmarket_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
