//! Run sequencing
//!
//! One run takes the store's run lock, extracts every (kind, county) pair
//! with bounded concurrency, then transforms, aggregates and loads each data
//! kind. Failures are contained at the narrowest scope that makes sense:
//!
//! - a county that cannot be extracted is reported and skipped
//! - an aggregation or load failure fails its data kind only
//! - a held run lock fails the whole run before anything is touched
//!
//! [`Orchestrator::run`] never returns an error; everything is recorded in
//! the [`RunSummary`].

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::EtlConfig;
use crate::error::{ConfigError, EtlError, SourceError};
use crate::hex::{H3Indexer, HexIndexer};
use crate::models::{
    County, CountyAggregate, CountyId, CurrentListing, CleanedSaleRecord, DataKind, DateRange,
    HexAggregate, MetricWindow, RawRecord,
};
use crate::processing::{
    merge_hex_aggregates, verify_hex_totals, InvestorPolicy, ListingsProcessor, SalesProcessor,
};
use crate::source::SourceClient;
use crate::store::{StoreError, StoreLoader, TableStore, ToRow};
use crate::summary::{FailedCounty, FailedLoad, RunSummary, SkippedLoad, Stage};

/// Parameters of one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Extraction date; windows are derived from it
    pub as_of: NaiveDate,
    /// Subset of configured counties; all when `None`
    pub counties: Option<Vec<CountyId>>,
    /// Explicit sales range replacing the derived lookback range
    pub range: Option<DateRange>,
}

impl RunRequest {
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            counties: None,
            range: None,
        }
    }

    pub fn with_counties(mut self, counties: Vec<CountyId>) -> Self {
        self.counties = Some(counties);
        self
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }
}

/// Windows resolved for one run
#[derive(Debug, Clone)]
struct RunPlan {
    counties: Vec<County>,
    sales_range: DateRange,
    listing_range: DateRange,
    /// Trailing window of the sales range, shared by both kinds' hex metrics
    hex_window: MetricWindow,
    county_window: MetricWindow,
}

/// Per-county extraction results of one kind
type Extraction = Vec<(County, Result<Vec<RawRecord>, SourceError>)>;

/// Aggregated outputs of the listings kind
struct ListingsOutput {
    current: Vec<CurrentListing>,
    hex: Vec<HexAggregate>,
}

/// Aggregated outputs of the sales kind
struct SalesOutput {
    filtered: Vec<CleanedSaleRecord>,
    hex: Vec<HexAggregate>,
    county: Vec<CountyAggregate>,
}

pub struct Orchestrator {
    config: EtlConfig,
    source: Arc<dyn SourceClient>,
    store: Arc<dyn TableStore>,
    indexer: Arc<dyn HexIndexer>,
    policy: InvestorPolicy,
}

impl Orchestrator {
    pub fn new(
        config: EtlConfig,
        source: Arc<dyn SourceClient>,
        store: Arc<dyn TableStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let indexer = Arc::new(H3Indexer::new(config.h3_resolution)?);
        let policy = InvestorPolicy::new(&config.quality.investor_patterns)?;
        Ok(Self {
            config,
            source,
            store,
            indexer,
            policy,
        })
    }

    /// Replace the hex indexer
    pub fn with_indexer(mut self, indexer: Arc<dyn HexIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub async fn run(&self, request: RunRequest) -> RunSummary {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", run_id = %run_id, as_of = %request.as_of);
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, request: RunRequest) -> RunSummary {
        let mut summary = RunSummary::new(run_id, request.as_of);

        let plan = match self.plan(&request) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Invalid run request");
                summary.run_error = Some(EtlError::from(e).to_string());
                summary.finish();
                return summary;
            },
        };
        summary.extraction_range = Some(plan.sales_range);
        summary.listing_range = Some(plan.listing_range);
        summary.hex_window = Some(plan.hex_window.clone());

        match self.store.try_lock_run().await {
            Ok(true) => {},
            Ok(false) => {
                warn!("Run lock held by another run");
                summary.run_error = Some(EtlError::from(StoreError::Locked).to_string());
                summary.finish();
                return summary;
            },
            Err(e) => {
                error!(error = %e, "Failed to take run lock");
                summary.run_error = Some(EtlError::from(e).to_string());
                summary.finish();
                return summary;
            },
        }

        info!(
            counties = plan.counties.len(),
            sales_range = %plan.sales_range,
            listing_range = %plan.listing_range,
            "Starting run"
        );
        self.execute(&plan, request.as_of, &mut summary).await;

        if let Err(e) = self.store.unlock_run().await {
            warn!(error = %e, "Failed to release run lock");
        }

        let status = summary.finish();
        info!(status = %status, "Run finished");
        summary
    }

    fn plan(&self, request: &RunRequest) -> Result<RunPlan, ConfigError> {
        let counties = match &request.counties {
            Some(ids) => self.config.select_counties(ids)?,
            None => self.config.counties.clone(),
        };
        if counties.is_empty() {
            return Err(ConfigError::NoCounties);
        }

        let sales_range = match request.range {
            Some(range) => range,
            None => self.config.extraction_range(request.as_of)?,
        };
        let listing_range = DateRange::new(sales_range.start, request.as_of.max(sales_range.end))?;

        Ok(RunPlan {
            counties,
            hex_window: self.config.hex_window(sales_range)?,
            county_window: self.config.county_window(sales_range),
            sales_range,
            listing_range,
        })
    }

    async fn execute(&self, plan: &RunPlan, as_of: NaiveDate, summary: &mut RunSummary) {
        for kind in [DataKind::Listings, DataKind::Sales] {
            summary.kind_mut(kind).state.advance(Stage::Extracting);
        }

        let (listings_raw, sales_raw) = self.extract_all(plan).await;
        let listings_raw = record_extraction(DataKind::Listings, plan, listings_raw, summary);
        let sales_raw = record_extraction(DataKind::Sales, plan, sales_raw, summary);

        let listings = match listings_raw {
            Some(raw) => self.process_listings(plan, as_of, &raw, summary),
            None => None,
        };
        let sales = match sales_raw {
            Some(raw) => self.process_sales(plan, &raw, summary),
            None => None,
        };

        let loader = StoreLoader::new(self.store.clone(), self.config.store.max_reject_rate, as_of);

        for kind in [DataKind::Listings, DataKind::Sales] {
            summary.kind_mut(kind).state.advance(Stage::Loading);
        }

        let hex = match (&listings, &sales) {
            (Some(l), Some(s)) => Some(merge_hex_aggregates(s.hex.clone(), l.hex.clone())),
            _ => None,
        };

        if let Some(listings) = &listings {
            self.load(&loader, DataKind::Listings, &listings.current, summary).await;
        }
        if let Some(sales) = &sales {
            self.load(&loader, DataKind::Sales, &sales.filtered, summary).await;
            self.load(&loader, DataKind::Sales, &sales.county, summary).await;
        }
        match hex {
            Some(hex) => self.load_shared(&loader, &hex, summary).await,
            None => {
                let missing: Vec<String> = [
                    (DataKind::Listings, listings.is_none()),
                    (DataKind::Sales, sales.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(kind, _)| kind.to_string())
                .collect();
                let reason = format!("{} did not aggregate", missing.join(" and "));
                warn!(table = %HexAggregate::TABLE, reason = %reason, "Skipping table load");
                summary.skipped_loads.push(SkippedLoad {
                    table: HexAggregate::TABLE.to_string(),
                    reason,
                });
            },
        }

        for kind in [DataKind::Listings, DataKind::Sales] {
            summary.kind_mut(kind).state.advance(Stage::Done);
        }
    }

    /// Fetch every (kind, county) pair through one worker pool
    ///
    /// Results are returned per kind in configured county order, so record
    /// ids assigned downstream do not depend on completion order.
    async fn extract_all(&self, plan: &RunPlan) -> (Extraction, Extraction) {
        let concurrency = self.config.provider.max_workers.max(1);
        let tasks = [DataKind::Listings, DataKind::Sales]
            .into_iter()
            .flat_map(|kind| {
                plan.counties
                    .iter()
                    .cloned()
                    .enumerate()
                    .map(move |(position, county)| (kind, position, county))
            })
            .collect::<Vec<_>>();

        let mut results: Vec<(DataKind, usize, County, Result<Vec<RawRecord>, SourceError>)> =
            stream::iter(tasks)
                .map(|(kind, position, county)| {
                    let source = self.source.clone();
                    let range = match kind {
                        DataKind::Listings => plan.listing_range,
                        DataKind::Sales => plan.sales_range,
                    };
                    async move {
                        let result = source.fetch(kind, &county, range).await;
                        if let Err(e) = &result {
                            warn!(
                                kind = %kind,
                                county = county.id,
                                county_name = %county.name,
                                error = %e,
                                "County extraction failed"
                            );
                        }
                        (kind, position, county, result)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        results.sort_by_key(|(kind, position, _, _)| (*kind, *position));
        let (listings, sales): (Vec<_>, Vec<_>) = results
            .into_iter()
            .partition(|(kind, _, _, _)| *kind == DataKind::Listings);
        let strip = |v: Vec<(DataKind, usize, County, Result<Vec<RawRecord>, SourceError>)>| -> Extraction {
            v.into_iter().map(|(_, _, county, result)| (county, result)).collect()
        };
        (strip(listings), strip(sales))
    }

    fn process_listings(
        &self,
        plan: &RunPlan,
        as_of: NaiveDate,
        raw: &[RawRecord],
        summary: &mut RunSummary,
    ) -> Option<ListingsOutput> {
        let processor = ListingsProcessor::new(
            self.config.listing_fields.clone(),
            &plan.counties,
            self.indexer.clone(),
            self.policy.clone(),
        );
        let kind = summary.kind_mut(DataKind::Listings);

        kind.state.advance(Stage::Transforming);
        let cleaned = processor.clean_and_standardize(raw);
        let current = processor.current_listings(&cleaned.records, as_of);
        kind.counts.cleaned = cleaned.records.len() as u64;
        kind.counts.dropped = cleaned.dropped.labelled();
        kind.counts.filtered = current.len() as u64;
        kind.counts.investor = current
            .iter()
            .filter(|l| self.policy.is_institutional(l.latest.owner_entity.as_deref()))
            .count() as u64;

        kind.state.advance(Stage::Aggregating);
        let hex = processor.aggregate_by_hex(&current, &plan.hex_window);
        let expected = ListingsProcessor::hex_assignable_counts(&current, &plan.hex_window);
        if let Err(e) = verify_hex_totals(DataKind::Listings, &hex, &expected) {
            error!(error = %e, "Listing aggregation failed verification");
            kind.state.fail(EtlError::from(e).to_string());
            return None;
        }
        kind.counts.hex_aggregates = hex.len() as u64;

        info!(
            cleaned = kind.counts.cleaned,
            current = current.len(),
            hex_aggregates = hex.len(),
            "Processed listings"
        );
        Some(ListingsOutput { current, hex })
    }

    fn process_sales(
        &self,
        plan: &RunPlan,
        raw: &[RawRecord],
        summary: &mut RunSummary,
    ) -> Option<SalesOutput> {
        let processor = SalesProcessor::new(
            self.config.sales_fields.clone(),
            &plan.counties,
            self.indexer.clone(),
            self.config.quality.max_price_per_sqft,
        );
        let kind = summary.kind_mut(DataKind::Sales);

        kind.state.advance(Stage::Transforming);
        let cleaned = processor.clean_and_standardize(raw);
        kind.counts.cleaned = cleaned.records.len() as u64;
        kind.counts.dropped = cleaned.dropped.labelled();

        let filtered = processor.apply_quality_filters(cleaned.records);
        kind.counts.filtered = filtered.records.len() as u64;
        kind.counts.above_price_ceiling = filtered.above_price_ceiling;
        kind.counts.duplicates = filtered.duplicates;
        let filtered = filtered.records;

        let investors = processor.classify_investor_sales(&filtered, &self.policy);
        kind.counts.investor = investors.len() as u64;

        kind.state.advance(Stage::Aggregating);
        let hex = processor.aggregate_by_hex(&filtered, &investors, &plan.hex_window);
        let county = processor.aggregate_by_county(&filtered, &investors, &plan.county_window);
        let expected = SalesProcessor::hex_assignable_counts(&filtered, &plan.hex_window);
        if let Err(e) = verify_hex_totals(DataKind::Sales, &hex, &expected) {
            error!(error = %e, "Sales aggregation failed verification");
            kind.state.fail(EtlError::from(e).to_string());
            return None;
        }
        kind.counts.hex_aggregates = hex.len() as u64;
        kind.counts.county_aggregates = county.len() as u64;

        info!(
            cleaned = kind.counts.cleaned,
            kept = filtered.len(),
            investor = investors.len(),
            hex_aggregates = hex.len(),
            county_aggregates = county.len(),
            "Processed sales"
        );
        Some(SalesOutput {
            filtered,
            hex,
            county,
        })
    }

    /// Load a table owned by one kind; a failure fails that kind
    async fn load<T: ToRow>(
        &self,
        loader: &StoreLoader,
        kind: DataKind,
        records: &[T],
        summary: &mut RunSummary,
    ) {
        match loader.load(records).await {
            Ok(report) => summary.loads.push(report),
            Err(e) => {
                error!(table = %T::TABLE, error = %e, "Table load failed");
                let message = EtlError::from(e).to_string();
                summary.failed_loads.push(FailedLoad {
                    table: T::TABLE.name().to_string(),
                    error: message.clone(),
                });
                summary.kind_mut(kind).state.fail(message);
            },
        }
    }

    /// Load the joined hex table; a failure is reported without failing
    /// either kind
    async fn load_shared(&self, loader: &StoreLoader, hex: &[HexAggregate], summary: &mut RunSummary) {
        match loader.load(hex).await {
            Ok(report) => summary.loads.push(report),
            Err(e) => {
                error!(table = %HexAggregate::TABLE, error = %e, "Table load failed");
                summary.failed_loads.push(FailedLoad {
                    table: HexAggregate::TABLE.name().to_string(),
                    error: EtlError::from(e).to_string(),
                });
            },
        }
    }
}

/// Record county failures; `None` when every county failed
fn record_extraction(
    kind: DataKind,
    plan: &RunPlan,
    results: Extraction,
    summary: &mut RunSummary,
) -> Option<Vec<RawRecord>> {
    let mut raw = Vec::new();
    let mut succeeded = 0usize;

    for (county, result) in results {
        match result {
            Ok(records) => {
                succeeded += 1;
                raw.extend(records);
            },
            Err(e) => summary.failed_counties.push(FailedCounty {
                kind,
                county_id: county.id,
                county_name: county.name.clone(),
                error: e.to_string(),
            }),
        }
    }

    let state = summary.kind_mut(kind);
    state.counts.extracted = raw.len() as u64;

    if succeeded == 0 {
        error!(kind = %kind, counties = plan.counties.len(), "Every county failed extraction");
        state
            .state
            .fail(format!("all {} counties failed extraction", plan.counties.len()));
        return None;
    }
    Some(raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::ApiKey;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl SourceClient for EmptySource {
        async fn fetch_listings(
            &self,
            _county: &County,
            _range: DateRange,
        ) -> Result<Vec<RawRecord>, SourceError> {
            Ok(Vec::new())
        }

        async fn fetch_sales(
            &self,
            _county: &County,
            _range: DateRange,
        ) -> Result<Vec<RawRecord>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn orchestrator(store: Arc<MemoryStore>) -> Orchestrator {
        let mut config = EtlConfig::new(ApiKey::new("k"));
        config.counties = config.select_counties(&[5823604, 5822520]).unwrap();
        Orchestrator::new(config, Arc::new(EmptySource), store).unwrap()
    }

    #[test]
    fn test_plan_windows() {
        let o = orchestrator(Arc::new(MemoryStore::new()));
        let plan = o.plan(&RunRequest::new(date("2026-10-18"))).unwrap();
        assert_eq!(plan.sales_range.end, date("2026-08-18"));
        assert_eq!(plan.listing_range.end, date("2026-10-18"));
        assert_eq!(plan.hex_window.range.start, date("2025-08-19"));
        assert_eq!(plan.hex_window.range.end, plan.sales_range.end);
        assert_eq!(plan.hex_window.label, "trailing_12m");
        assert_eq!(plan.county_window.range, plan.sales_range);
    }

    #[test]
    fn test_plan_rejects_unknown_county() {
        let o = orchestrator(Arc::new(MemoryStore::new()));
        let request = RunRequest::new(date("2026-10-18")).with_counties(vec![42]);
        assert!(o.plan(&request).is_err());
    }

    #[tokio::test]
    async fn test_empty_extraction_is_success() {
        let store = Arc::new(MemoryStore::new());
        let summary = orchestrator(store.clone()).run(RunRequest::new(date("2026-10-18"))).await;

        assert_eq!(summary.status, crate::summary::RunStatus::Success);
        assert!(summary.listings.state.is_done());
        assert_eq!(summary.loads.len(), 4);
        assert!(store.try_lock_run().await.unwrap(), "run lock must be released");
    }

    #[tokio::test]
    async fn test_held_lock_fails_run() {
        let store = Arc::new(MemoryStore::new());
        assert!(store.try_lock_run().await.unwrap());

        let summary = orchestrator(store.clone()).run(RunRequest::new(date("2026-10-18"))).await;
        assert_eq!(summary.status, crate::summary::RunStatus::Failure);
        assert!(summary.run_error.unwrap().contains("lock"));
        assert!(summary.loads.is_empty());
    }
}
