//! Run outcome reporting

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::models::{CountyId, DataKind, DateRange, MetricWindow};
use crate::store::LoadReport;

/// Pipeline stages of one data kind, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Idle,
    Extracting,
    Transforming,
    Aggregating,
    Loading,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting",
            Stage::Transforming => "transforming",
            Stage::Aggregating => "aggregating",
            Stage::Loading => "loading",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Stage machine of one data kind; `Failed` is absorbing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KindState {
    Active { stage: Stage },
    Failed { stage: Stage, error: String },
}

impl Default for KindState {
    fn default() -> Self {
        KindState::Active { stage: Stage::Idle }
    }
}

impl KindState {
    /// Move forward to `next`; ignored once failed or when `next` is not ahead
    pub fn advance(&mut self, next: Stage) {
        if let KindState::Active { stage } = self {
            if next > *stage {
                *stage = next;
            }
        }
    }

    /// Fail at the current stage; the first failure wins
    pub fn fail(&mut self, error: impl Into<String>) {
        if let KindState::Active { stage } = *self {
            *self = KindState::Failed {
                stage,
                error: error.into(),
            };
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            KindState::Active { stage } | KindState::Failed { stage, .. } => *stage,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, KindState::Failed { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, KindState::Active { stage: Stage::Done })
    }

    /// Failed after its records were extracted
    pub fn failed_after_extraction(&self) -> bool {
        matches!(self, KindState::Failed { stage, .. } if *stage > Stage::Extracting)
    }
}

/// Record counts for one data kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindCounts {
    pub extracted: u64,
    pub cleaned: u64,
    pub dropped: BTreeMap<String, u64>,
    /// Sales surviving quality filters, or current listings
    pub filtered: u64,
    pub above_price_ceiling: u64,
    pub duplicates: u64,
    pub investor: u64,
    pub hex_aggregates: u64,
    pub county_aggregates: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindSummary {
    pub kind: DataKind,
    #[serde(flatten)]
    pub state: KindState,
    pub counts: KindCounts,
}

impl KindSummary {
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            state: KindState::default(),
            counts: KindCounts::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedCounty {
    pub kind: DataKind,
    pub county_id: CountyId,
    pub county_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedLoad {
    pub table: String,
    pub error: String,
}

/// A table left with its previous contents without a load being attempted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedLoad {
    pub table: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failure,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::PartialSuccess => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial success",
            RunStatus::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Structured outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub extraction_range: Option<DateRange>,
    pub listing_range: Option<DateRange>,
    pub hex_window: Option<MetricWindow>,
    pub listings: KindSummary,
    pub sales: KindSummary,
    pub loads: Vec<LoadReport>,
    pub failed_loads: Vec<FailedLoad>,
    pub skipped_loads: Vec<SkippedLoad>,
    pub failed_counties: Vec<FailedCounty>,
    /// Failure that stopped the run before any kind was processed
    pub run_error: Option<String>,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn new(run_id: Uuid, as_of: NaiveDate) -> Self {
        Self {
            run_id,
            as_of,
            extraction_range: None,
            listing_range: None,
            hex_window: None,
            listings: KindSummary::new(DataKind::Listings),
            sales: KindSummary::new(DataKind::Sales),
            loads: Vec::new(),
            failed_loads: Vec::new(),
            skipped_loads: Vec::new(),
            failed_counties: Vec::new(),
            run_error: None,
            status: RunStatus::Failure,
        }
    }

    pub fn kind_mut(&mut self, kind: DataKind) -> &mut KindSummary {
        match kind {
            DataKind::Listings => &mut self.listings,
            DataKind::Sales => &mut self.sales,
        }
    }

    pub fn kind(&self, kind: DataKind) -> &KindSummary {
        match kind {
            DataKind::Listings => &self.listings,
            DataKind::Sales => &self.sales,
        }
    }

    /// Derive the final status from what has been recorded
    ///
    /// Only extraction outages (failed counties, or a kind whose every
    /// county failed) give a partial success. A failed transform, aggregation
    /// or table load fails the run. Skipped loads do not affect the status;
    /// they follow from a failure that is already counted.
    pub fn finish(&mut self) -> RunStatus {
        let kinds = [&self.listings, &self.sales];
        let failed_kinds = kinds.iter().filter(|k| k.state.is_failed()).count();
        let failed_processing = kinds.iter().any(|k| k.state.failed_after_extraction());

        self.status = if self.run_error.is_some()
            || failed_kinds == 2
            || failed_processing
            || !self.failed_loads.is_empty()
        {
            RunStatus::Failure
        } else if failed_kinds > 0 || !self.failed_counties.is_empty() {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
        self.status
    }

    /// Human-readable multi-line report
    pub fn render(&self) -> String {
        let mut out = format!(
            "Run {} (as of {}): {}\n",
            self.run_id, self.as_of, self.status
        );
        if let Some(range) = &self.extraction_range {
            out.push_str(&format!("- Sales window: {}\n", range));
        }
        if let Some(range) = &self.listing_range {
            out.push_str(&format!("- Listing window: {}\n", range));
        }
        if let Some(window) = &self.hex_window {
            out.push_str(&format!("- Hex window: {} ({})\n", window.range, window.label));
        }
        if let Some(error) = &self.run_error {
            out.push_str(&format!("- Run error: {}\n", error));
        }

        for kind in [&self.listings, &self.sales] {
            let c = &kind.counts;
            let state = match &kind.state {
                KindState::Active { stage } => stage.to_string(),
                KindState::Failed { stage, error } => format!("failed while {}: {}", stage, error),
            };
            out.push_str(&format!(
                "- {}: {} | extracted {}, cleaned {}, dropped {}, kept {}, investor {}, hex {}, county {}\n",
                kind.kind,
                state,
                c.extracted,
                c.cleaned,
                c.dropped.values().sum::<u64>(),
                c.filtered,
                c.investor,
                c.hex_aggregates,
                c.county_aggregates,
            ));
        }

        for load in &self.loads {
            out.push_str(&format!(
                "- Loaded {}: {} rows ({} rejected)\n",
                load.table, load.written, load.rejected
            ));
        }
        for failed in &self.failed_loads {
            out.push_str(&format!("- Load of {} failed: {}\n", failed.table, failed.error));
        }
        for skipped in &self.skipped_loads {
            out.push_str(&format!(
                "- Load of {} skipped, previous contents kept: {}\n",
                skipped.table, skipped.reason
            ));
        }
        for county in &self.failed_counties {
            out.push_str(&format!(
                "- {} extraction failed for {} ({}): {}\n",
                county.kind, county.county_name, county.county_id, county.error
            ));
        }
        out
    }
}
