//! hexmarket-etl - listing and sale aggregation pipeline

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hexmarket_common::logging::{init_logging, LogConfig, LogLevel};
use hexmarket_etl::store::TableStore;
use hexmarket_etl::{
    CountyId, DateRange, EtlConfig, MemoryStore, Orchestrator, ParclClient, PgStore, RunRequest,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hexmarket-etl")]
#[command(author, version, about = "Listing and sale aggregation pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract, aggregate and load
    Run {
        /// Restrict the run to these county ids (repeatable)
        #[arg(long = "county", value_name = "ID")]
        counties: Vec<CountyId>,

        /// First sale date to extract (requires --end)
        #[arg(long, requires = "end")]
        start: Option<NaiveDate>,

        /// Last sale date to extract (requires --start)
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,

        /// Extraction date; defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Run against an in-memory store and leave the database untouched
        #[arg(long)]
        dry_run: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply database migrations
    Migrate,

    /// List configured counties
    Counties,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // LOG_* environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("hexmarket-etl")
        .filter_directives("sqlx=warn,hyper=warn,reqwest=info")
        .build()
        .merge_env()?;
    init_logging(&log_config)?;

    let config = EtlConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            counties,
            start,
            end,
            as_of,
            dry_run,
            json,
        } => {
            let as_of = as_of.unwrap_or_else(|| chrono::Local::now().date_naive());
            let mut request = RunRequest::new(as_of);
            if !counties.is_empty() {
                request = request.with_counties(counties);
            }
            if let (Some(start), Some(end)) = (start, end) {
                request = request.with_range(DateRange::new(start, end)?);
            }

            let source = Arc::new(ParclClient::new(config.provider.clone())?);
            let store: Arc<dyn TableStore> = if dry_run {
                info!("Dry run: loading into an in-memory store");
                Arc::new(MemoryStore::new())
            } else {
                let store = PgStore::connect(&config.store).await?;
                store.migrate().await?;
                Arc::new(store)
            };

            let orchestrator = Orchestrator::new(config, source, store)?;
            let summary = orchestrator.run(request).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("{}", summary.render());
            }
            std::process::exit(summary.status.exit_code());
        },
        Command::Migrate => {
            let store = PgStore::connect(&config.store).await?;
            store.migrate().await?;
            println!("Migrations applied");
        },
        Command::Counties => {
            for county in &config.counties {
                println!("{:>8}  {}", county.id, county.name);
            }
        },
    }

    Ok(())
}
