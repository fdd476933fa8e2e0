//! Joining and checking hex aggregates

use std::collections::BTreeMap;

use crate::error::AggregationError;
use crate::models::{CountyId, DataKind, HexAggregate};

/// Outer join of sales and listing hex aggregates on
/// (hex id, county id, window label)
///
/// When both sides exist the sales window range is kept.
pub fn merge_hex_aggregates(sales: Vec<HexAggregate>, listings: Vec<HexAggregate>) -> Vec<HexAggregate> {
    let mut merged: BTreeMap<(String, CountyId, String), HexAggregate> = BTreeMap::new();

    for aggregate in sales {
        let key = (aggregate.hex_id.clone(), aggregate.county_id, aggregate.window.label.clone());
        merged.insert(key, aggregate);
    }

    for aggregate in listings {
        let key = (aggregate.hex_id.clone(), aggregate.county_id, aggregate.window.label.clone());
        match merged.get_mut(&key) {
            Some(existing) => existing.listings = aggregate.listings,
            None => {
                merged.insert(key, aggregate);
            },
        }
    }

    merged.into_values().collect()
}

/// Check that per-county hex totals equal the number of records that should
/// have been aggregated
pub fn verify_hex_totals(
    kind: DataKind,
    aggregates: &[HexAggregate],
    expected: &BTreeMap<CountyId, u64>,
) -> Result<(), AggregationError> {
    let mut aggregated: BTreeMap<CountyId, u64> = BTreeMap::new();
    for aggregate in aggregates {
        let count = match kind {
            DataKind::Sales => aggregate.sales.as_ref().map(|m| m.total_sales),
            DataKind::Listings => aggregate.listings.as_ref().map(|m| m.total_listings),
        };
        *aggregated.entry(aggregate.county_id).or_default() += count.unwrap_or(0);
    }

    for county in aggregated.keys().chain(expected.keys()) {
        let got = aggregated.get(county).copied().unwrap_or(0);
        let want = expected.get(county).copied().unwrap_or(0);
        if got != want {
            return Err(AggregationError::InvariantViolation {
                kind,
                county: *county,
                aggregated: got,
                expected: want,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{DateRange, ListingMetrics, MetricWindow, SalesMetrics};
    use chrono::NaiveDate;

    fn window(label: &str) -> MetricWindow {
        MetricWindow {
            label: label.to_string(),
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2025, 8, 19).unwrap(),
                NaiveDate::from_ymd_opt(2026, 8, 18).unwrap(),
            )
            .unwrap(),
        }
    }

    fn sales(hex: &str, county: CountyId, total: u64) -> HexAggregate {
        HexAggregate {
            hex_id: hex.to_string(),
            county_id: county,
            window: window("trailing_12m"),
            sales: Some(SalesMetrics {
                total_sales: total,
                ..Default::default()
            }),
            listings: None,
        }
    }

    fn listings(hex: &str, county: CountyId, total: u64) -> HexAggregate {
        HexAggregate {
            hex_id: hex.to_string(),
            county_id: county,
            window: window("trailing_12m"),
            sales: None,
            listings: Some(ListingMetrics {
                total_listings: total,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_outer_join() {
        let merged = merge_hex_aggregates(
            vec![sales("a", 1, 3), sales("b", 1, 2)],
            vec![listings("b", 1, 5), listings("c", 2, 1)],
        );

        assert_eq!(merged.len(), 3);
        assert!(merged[0].listings.is_none());
        assert_eq!(merged[1].sales.as_ref().unwrap().total_sales, 2);
        assert_eq!(merged[1].listings.as_ref().unwrap().total_listings, 5);
        assert!(merged[2].sales.is_none());
    }

    #[test]
    fn test_same_hex_in_two_counties_stays_separate() {
        let merged = merge_hex_aggregates(vec![sales("a", 1, 1)], vec![listings("a", 2, 1)]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_verify_hex_totals() {
        let aggregates = vec![sales("a", 1, 3), sales("b", 1, 2), sales("c", 2, 1)];
        let expected = BTreeMap::from([(1, 5), (2, 1)]);
        assert!(verify_hex_totals(DataKind::Sales, &aggregates, &expected).is_ok());

        let short = BTreeMap::from([(1, 5), (2, 1), (3, 4)]);
        assert_eq!(
            verify_hex_totals(DataKind::Sales, &aggregates, &short),
            Err(AggregationError::InvariantViolation {
                kind: DataKind::Sales,
                county: 3,
                aggregated: 0,
                expected: 4,
            })
        );
    }
}
