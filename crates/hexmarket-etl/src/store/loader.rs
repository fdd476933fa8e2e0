//! Validated, all-or-nothing table loads

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::{StoreError, Table, TableStore, ToRow};

/// Outcome of loading one table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub attempted: u64,
    pub rejected: u64,
    pub written: u64,
}

/// Converts records to rows and replaces tables through a [`TableStore`]
#[derive(Clone)]
pub struct StoreLoader {
    store: Arc<dyn TableStore>,
    max_reject_rate: f64,
    as_of: NaiveDate,
}

impl StoreLoader {
    pub fn new(store: Arc<dyn TableStore>, max_reject_rate: f64, as_of: NaiveDate) -> Self {
        Self {
            store,
            max_reject_rate,
            as_of,
        }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Replace `T::TABLE` with `records`
    ///
    /// Records that cannot be converted are skipped and logged. When the
    /// rejected share exceeds the configured rate nothing is written.
    pub async fn load<T: ToRow>(&self, records: &[T]) -> Result<LoadReport, StoreError> {
        let table: Table = T::TABLE;
        let mut rows = Vec::with_capacity(records.len());
        let mut rejected: u64 = 0;

        for record in records {
            match record.to_row(self.as_of) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    rejected += 1;
                    warn!(table = %table, key = %record.key(), error = %e, "Rejected row");
                },
            }
        }

        let total = records.len() as u64;
        if total > 0 && rejected as f64 / total as f64 > self.max_reject_rate {
            return Err(StoreError::RejectRateExceeded {
                table,
                rejected,
                total,
                max_rate: self.max_reject_rate,
            });
        }

        let written = self.store.replace_table(table, rows).await?;
        info!(table = %table, written, rejected, "Replaced table");

        Ok(LoadReport {
            table: table.name().to_string(),
            attempted: total,
            rejected,
            written,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CountyAggregate, SalesMetrics};
    use crate::store::MemoryStore;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn county(period: &str, median: Option<f64>) -> CountyAggregate {
        CountyAggregate {
            county_id: 5822064,
            county_name: "Gwinnett".to_string(),
            period: period.to_string(),
            metrics: SalesMetrics {
                total_sales: 1,
                median_size: median,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_load_replaces_table() {
        let store = Arc::new(MemoryStore::new());
        let loader = StoreLoader::new(store.clone(), 0.05, as_of());

        loader.load(&[county("2026-01", None), county("2026-02", None)]).await.unwrap();
        let report = loader.load(&[county("2026-03", Some(1800.0))]).await.unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.rejected, 0);
        assert_eq!(store.row_count(Table::CountyAggregates).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reject_rate_aborts_and_keeps_previous_rows() {
        let store = Arc::new(MemoryStore::new());
        let loader = StoreLoader::new(store.clone(), 0.25, as_of());
        loader.load(&[county("2026-01", None)]).await.unwrap();

        let err = loader
            .load(&[county("2026-02", Some(f64::NAN)), county("2026-03", None)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::RejectRateExceeded {
                rejected: 1,
                total: 2,
                ..
            }
        ));

        let rows = store.snapshot(Table::CountyAggregates).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][2], crate::store::Value::Text(Some("2026-01".to_string())));
    }

    #[tokio::test]
    async fn test_rejects_below_threshold_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let loader = StoreLoader::new(store.clone(), 0.5, as_of());
        let report = loader
            .load(&[county("2026-02", Some(f64::NAN)), county("2026-03", None)])
            .await
            .unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.written, 1);
    }
}
