//! Sale cleaning, quality filtering, investor classification and aggregation

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::{text, CleanContext, CleanOutcome, DropCounts, DropReason, InvestorPolicy};
use crate::hex::HexIndexer;
use crate::mapping::{self, FieldMap};
use crate::models::{
    month_period, County, CountyAggregate, CountyId, CleanedSaleRecord, HexAggregate,
    InvestorSaleRecord, MetricWindow, RawRecord,
};
use crate::stats::SalesAccumulator;

/// Sales surviving the quality filters, with per-filter counts
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    /// Ordered by `record_id`
    pub records: Vec<CleanedSaleRecord>,
    pub above_price_ceiling: u64,
    pub duplicates: u64,
}

pub struct SalesProcessor {
    fields: FieldMap,
    context: CleanContext,
    max_price_per_sqft: f64,
}

impl SalesProcessor {
    pub fn new(
        fields: FieldMap,
        counties: &[County],
        indexer: Arc<dyn HexIndexer>,
        max_price_per_sqft: f64,
    ) -> Self {
        Self {
            fields,
            context: CleanContext::new(counties, indexer),
            max_price_per_sqft,
        }
    }

    /// Type and validate raw sales; `record_id` is the position in `raw`
    pub fn clean_and_standardize(&self, raw: &[RawRecord]) -> CleanOutcome<CleanedSaleRecord> {
        let mut records = Vec::with_capacity(raw.len());
        let mut dropped = DropCounts::default();

        for (idx, record) in raw.iter().enumerate() {
            match self.clean_one(idx as u64, record) {
                Ok(cleaned) => records.push(cleaned),
                Err(reason) => dropped.record(reason),
            }
        }

        debug!(
            input = raw.len(),
            cleaned = records.len(),
            dropped = dropped.total(),
            "Cleaned sales"
        );
        CleanOutcome { records, dropped }
    }

    fn clean_one(&self, record_id: u64, raw: &RawRecord) -> Result<CleanedSaleRecord, DropReason> {
        let common = self.context.property_fields(&self.fields, raw)?;
        let price_per_sqft = common.price_per_sqft();
        let event = common.event;
        let transaction_key = text(&self.fields, raw, mapping::TRANSACTION_ID).unwrap_or_else(|| {
            format!("{}|{}|{}", event.county_id, event.event_date, common.price)
        });

        Ok(CleanedSaleRecord {
            record_id,
            transaction_key,
            property_id: event.property_id,
            address: event.address,
            county_id: event.county_id,
            county_name: event.county_name,
            sale_date: event.event_date,
            sale_price: common.price,
            square_feet: common.square_feet,
            price_per_sqft,
            year_built: event.year_built,
            property_type: event.property_type,
            location: common.location,
            hex_id: event.hex_id,
            buyer: text(&self.fields, raw, mapping::BUYER_ENTITY),
            seller: text(&self.fields, raw, mapping::SELLER_ENTITY),
        })
    }

    /// Drop sales above the price-per-sqft ceiling, then keep the lowest
    /// `record_id` of each transaction key
    pub fn apply_quality_filters(&self, mut cleaned: Vec<CleanedSaleRecord>) -> FilterOutcome {
        cleaned.sort_by_key(|s| s.record_id);

        let before = cleaned.len();
        cleaned.retain(|s| s.price_per_sqft <= self.max_price_per_sqft);
        let above_price_ceiling = (before - cleaned.len()) as u64;

        let mut seen = HashSet::with_capacity(cleaned.len());
        let before = cleaned.len();
        cleaned.retain(|s| seen.insert(s.transaction_key.clone()));
        let duplicates = (before - cleaned.len()) as u64;

        debug!(
            kept = cleaned.len(),
            above_price_ceiling,
            duplicates,
            "Applied sale quality filters"
        );
        FilterOutcome {
            records: cleaned,
            above_price_ceiling,
            duplicates,
        }
    }

    /// Sales with an institutional buyer or seller
    pub fn classify_investor_sales(
        &self,
        filtered: &[CleanedSaleRecord],
        policy: &InvestorPolicy,
    ) -> Vec<InvestorSaleRecord> {
        filtered
            .iter()
            .filter_map(|sale| {
                let acquisition = policy.is_institutional(sale.buyer.as_deref());
                let disposition = policy.is_institutional(sale.seller.as_deref());
                (acquisition || disposition).then(|| InvestorSaleRecord {
                    sale: sale.clone(),
                    acquisition,
                    disposition,
                })
            })
            .collect()
    }

    /// Group sales dated within `window` by (hex, county); sales without a
    /// hex id are skipped
    pub fn aggregate_by_hex(
        &self,
        filtered: &[CleanedSaleRecord],
        investors: &[InvestorSaleRecord],
        window: &MetricWindow,
    ) -> Vec<HexAggregate> {
        let flags = investor_flags(investors);
        let mut groups: BTreeMap<(String, CountyId), SalesAccumulator> = BTreeMap::new();

        for sale in filtered.iter().filter(|s| window.range.contains(s.sale_date)) {
            let Some(hex_id) = sale.hex_id.as_ref() else {
                continue;
            };
            push_sale(
                groups.entry((hex_id.clone(), sale.county_id)).or_default(),
                sale,
                &flags,
            );
        }

        groups
            .into_iter()
            .map(|((hex_id, county_id), acc)| HexAggregate {
                hex_id,
                county_id,
                window: window.clone(),
                sales: Some(acc.finish()),
                listings: None,
            })
            .collect()
    }

    /// Monthly buckets per county over `window`
    pub fn aggregate_by_county(
        &self,
        filtered: &[CleanedSaleRecord],
        investors: &[InvestorSaleRecord],
        window: &MetricWindow,
    ) -> Vec<CountyAggregate> {
        let flags = investor_flags(investors);
        let mut groups: BTreeMap<(CountyId, String), (String, SalesAccumulator)> = BTreeMap::new();

        for sale in filtered.iter().filter(|s| window.range.contains(s.sale_date)) {
            let (_, acc) = groups
                .entry((sale.county_id, month_period(sale.sale_date)))
                .or_insert_with(|| (sale.county_name.clone(), SalesAccumulator::default()));
            push_sale(acc, sale, &flags);
        }

        groups
            .into_iter()
            .map(|((county_id, period), (county_name, acc))| CountyAggregate {
                county_id,
                county_name,
                period,
                metrics: acc.finish(),
            })
            .collect()
    }

    /// Per-county number of sales that `aggregate_by_hex` must cover
    pub fn hex_assignable_counts(
        filtered: &[CleanedSaleRecord],
        window: &MetricWindow,
    ) -> BTreeMap<CountyId, u64> {
        let mut counts = BTreeMap::new();
        for sale in filtered
            .iter()
            .filter(|s| s.hex_id.is_some() && window.range.contains(s.sale_date))
        {
            *counts.entry(sale.county_id).or_default() += 1;
        }
        counts
    }
}

fn investor_flags(investors: &[InvestorSaleRecord]) -> HashMap<&str, (bool, bool)> {
    investors
        .iter()
        .map(|i| (i.sale.transaction_key.as_str(), (i.acquisition, i.disposition)))
        .collect()
}

fn push_sale(
    acc: &mut SalesAccumulator,
    sale: &CleanedSaleRecord,
    flags: &HashMap<&str, (bool, bool)>,
) {
    let (acquisition, disposition) = flags
        .get(sale.transaction_key.as_str())
        .copied()
        .unwrap_or((false, false));
    acc.push(
        sale.year_built,
        sale.square_feet,
        sale.price_per_sqft,
        acquisition,
        disposition,
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_PRICE_PER_SQFT;
    use crate::hex::H3Indexer;
    use crate::models::DateRange;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use serde_json::json;

    const FULTON: CountyId = 5823604;
    const COBB: CountyId = 5822520;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn processor() -> SalesProcessor {
        SalesProcessor::new(
            FieldMap::sales_default(),
            &[County::new(FULTON, "Fulton"), County::new(COBB, "Cobb")],
            Arc::new(H3Indexer::new(8).unwrap()),
            DEFAULT_MAX_PRICE_PER_SQFT,
        )
    }

    fn sale(county: CountyId, txn: Option<&str>, on: &str, price: f64, sqft: f64) -> RawRecord {
        let mut item = json!({
            "parcl_property_id": 1000,
            "event": {
                "event_date": on,
                "price": price,
                "entity_owner_name": null,
                "entity_seller_name": null
            },
            "property_metadata": {
                "sq_ft": sqft,
                "latitude": 33.7490,
                "longitude": -84.3880,
                "year_built": 2001,
                "county_name": "Fulton County"
            }
        });
        if let Some(txn) = txn {
            item["event"]["transaction_id"] = json!(txn);
        }
        RawRecord::from_json(county, item).unwrap()
    }

    fn window(start: &str, end: &str) -> MetricWindow {
        MetricWindow {
            label: "w".to_string(),
            range: DateRange::new(date(start), date(end)).unwrap(),
        }
    }

    #[test]
    fn test_dedup_and_ceiling_scenario() {
        let p = processor();
        let raw = [
            sale(FULTON, Some("T1"), "2026-03-01", 400_000.0, 1000.0),
            sale(FULTON, Some("T1"), "2026-03-01", 410_000.0, 1000.0),
            sale(FULTON, Some("T2"), "2026-03-02", 3_000_000.0, 1000.0),
        ];

        let cleaned = p.clean_and_standardize(&raw);
        let outcome = p.apply_quality_filters(cleaned.records);

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].transaction_key, "T1");
        assert_eq!(outcome.records[0].record_id, 0);
        assert_eq!(outcome.records[0].price_per_sqft, 400.0);
        assert_eq!(outcome.above_price_ceiling, 1);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_fallback_transaction_key() {
        let p = processor();
        let cleaned = p.clean_and_standardize(&[
            sale(FULTON, None, "2026-03-01", 350_000.0, 1750.0),
            sale(FULTON, None, "2026-03-01", 350_000.0, 1900.0),
            sale(COBB, None, "2026-03-01", 350_000.0, 1750.0),
        ]);
        assert_eq!(cleaned.records[0].transaction_key, "5823604|2026-03-01|350000");

        let outcome = p.apply_quality_filters(cleaned.records);
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.duplicates, 1);
    }

    #[test]
    fn test_classify_investor_sales() {
        let p = processor();
        let mut bought = sale(FULTON, Some("A"), "2026-03-01", 300_000.0, 1500.0);
        bought.fields.insert("event_entity_owner_name".into(), json!("Invitation Homes"));
        let mut sold = sale(FULTON, Some("B"), "2026-03-01", 300_000.0, 1500.0);
        sold.fields.insert("event_entity_seller_name".into(), json!("Tricon"));
        let plain = sale(FULTON, Some("C"), "2026-03-01", 300_000.0, 1500.0);

        let filtered = p.apply_quality_filters(p.clean_and_standardize(&[bought, sold, plain]).records);
        let investors = p.classify_investor_sales(&filtered.records, &InvestorPolicy::default());

        assert_eq!(investors.len(), 2);
        assert!(investors[0].acquisition && !investors[0].disposition);
        assert!(!investors[1].acquisition && investors[1].disposition);
    }

    #[test]
    fn test_aggregations() {
        let p = processor();
        let mut inst = sale(FULTON, Some("A"), "2026-06-01", 300_000.0, 1500.0);
        inst.fields.insert("event_entity_owner_name".into(), json!("Progress Residential"));
        let raw = [
            inst,
            sale(FULTON, Some("B"), "2026-06-15", 500_000.0, 2000.0),
            sale(FULTON, Some("C"), "2024-02-01", 250_000.0, 1250.0),
            sale(COBB, Some("D"), "2026-07-01", 400_000.0, 2000.0),
        ];
        let filtered = p.apply_quality_filters(p.clean_and_standardize(&raw).records).records;
        let investors = p.classify_investor_sales(&filtered, &InvestorPolicy::default());

        let hex_window = window("2025-08-19", "2026-08-18");
        let hex = p.aggregate_by_hex(&filtered, &investors, &hex_window);
        // same coordinates, two counties
        assert_eq!(hex.len(), 2);
        let fulton = hex.iter().find(|h| h.county_id == FULTON).unwrap();
        let metrics = fulton.sales.as_ref().unwrap();
        assert_eq!(metrics.total_sales, 2);
        assert_eq!(metrics.inst_acquisitions, 1);
        assert_eq!(metrics.median_price_per_sqft, Some(225.0));
        assert_eq!(metrics.median_vintage, Some(2001.0));

        let expected = SalesProcessor::hex_assignable_counts(&filtered, &hex_window);
        assert_eq!(expected.get(&FULTON), Some(&2));
        assert_eq!(expected.get(&COBB), Some(&1));

        let county = p.aggregate_by_county(&filtered, &investors, &window("2023-08-18", "2026-08-18"));
        let periods: Vec<(&str, u64)> = county
            .iter()
            .map(|c| (c.period.as_str(), c.metrics.total_sales))
            .collect();
        // ordered by county id, then period
        assert_eq!(periods, vec![("2026-07", 1), ("2024-02", 1), ("2026-06", 2)]);
        assert_eq!(county[0].county_name, "Cobb");
        assert_eq!(county[2].county_name, "Fulton");
    }

    #[test]
    fn test_empty_input_yields_no_aggregates() {
        let p = processor();
        let outcome = p.apply_quality_filters(Vec::new());
        assert!(outcome.records.is_empty());
        assert!(p.aggregate_by_hex(&[], &[], &window("2026-01-01", "2026-12-31")).is_empty());
        assert!(p.aggregate_by_county(&[], &[], &window("2026-01-01", "2026-12-31")).is_empty());
    }

    proptest! {
        #[test]
        fn surviving_sales_respect_price_ceiling(
            sales in prop::collection::vec((1u32..20, 10_000u32..5_000_000, 300u32..6_000), 0..60)
        ) {
            let p = processor();
            let raw: Vec<RawRecord> = sales
                .iter()
                .map(|(txn, price, sqft)| {
                    sale(FULTON, Some(&format!("T{}", txn)), "2026-03-01", f64::from(*price), f64::from(*sqft))
                })
                .collect();

            let outcome = p.apply_quality_filters(p.clean_and_standardize(&raw).records);

            let mut keys = HashSet::new();
            for s in &outcome.records {
                prop_assert!(s.price_per_sqft <= DEFAULT_MAX_PRICE_PER_SQFT);
                prop_assert!(keys.insert(s.transaction_key.clone()));
            }
            prop_assert_eq!(
                outcome.records.len() as u64 + outcome.above_price_ceiling + outcome.duplicates,
                raw.len() as u64
            );
        }
    }
}
