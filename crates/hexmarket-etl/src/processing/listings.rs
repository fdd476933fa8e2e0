//! Listing event cleaning, current-listing derivation and hex aggregation

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use super::{text, CleanContext, CleanOutcome, DropCounts, DropReason, InvestorPolicy};
use crate::hex::HexIndexer;
use crate::mapping::{self, FieldMap};
use crate::models::{
    County, CountyId, CleanedListingRecord, CurrentListing, HexAggregate, ListingEventType,
    MetricWindow, RawRecord,
};
use crate::stats::ListingAccumulator;

pub struct ListingsProcessor {
    fields: FieldMap,
    context: CleanContext,
    policy: InvestorPolicy,
}

impl ListingsProcessor {
    pub fn new(
        fields: FieldMap,
        counties: &[County],
        indexer: Arc<dyn HexIndexer>,
        policy: InvestorPolicy,
    ) -> Self {
        Self {
            fields,
            context: CleanContext::new(counties, indexer),
            policy,
        }
    }

    /// Type and validate raw listing events
    ///
    /// `record_id` is the record's position in `raw`. Listing events need a
    /// positive price, area and a location; sales and delistings are kept
    /// with whatever of those they carry.
    pub fn clean_and_standardize(&self, raw: &[RawRecord]) -> CleanOutcome<CleanedListingRecord> {
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
            "Cleaned listing events"
        );
        CleanOutcome { records, dropped }
    }

    fn clean_one(&self, record_id: u64, raw: &RawRecord) -> Result<CleanedListingRecord, DropReason> {
        let event_type = text(&self.fields, raw, mapping::EVENT_TYPE)
            .map(|t| ListingEventType::parse(&t))
            .unwrap_or(ListingEventType::Other);
        // closing events only need to identify the property and the date
        let event = if event_type == ListingEventType::Listing {
            self.context.property_fields(&self.fields, raw)?.event
        } else {
            self.context.event_fields(&self.fields, raw)?
        };
        let sale_cycle = self
            .fields
            .value(raw, mapping::SALE_CYCLE)
            .and_then(mapping::as_integer)
            .unwrap_or(0);

        Ok(CleanedListingRecord {
            record_id,
            property_id: event.property_id,
            event_type,
            event_date: event.event_date,
            price: event.price,
            square_feet: event.square_feet,
            price_per_sqft: event.price.zip(event.square_feet).map(|(p, sqft)| p / sqft),
            sale_cycle,
            address: event.address,
            property_type: event.property_type,
            year_built: event.year_built,
            location: event.location,
            hex_id: event.hex_id,
            county_id: event.county_id,
            county_name: event.county_name,
            owner_entity: text(&self.fields, raw, mapping::OWNER_ENTITY),
        })
    }

    /// Properties still on the market at `as_of`, one per property id
    ///
    /// Only the latest sale cycle of each property is considered. A property
    /// is active when its latest listing event is not followed (same day
    /// included) by a sale or delisting dated on or before `as_of`. Events
    /// after `as_of` are ignored.
    pub fn current_listings(
        &self,
        cleaned: &[CleanedListingRecord],
        as_of: NaiveDate,
    ) -> Vec<CurrentListing> {
        let mut by_property: BTreeMap<u64, Vec<&CleanedListingRecord>> = BTreeMap::new();
        for event in cleaned.iter().filter(|e| e.event_date <= as_of) {
            by_property.entry(event.property_id).or_default().push(event);
        }

        by_property
            .into_values()
            .filter_map(|mut events| {
                events.sort_by_key(|e| (e.event_date, e.record_id));
                current_listing(&events, as_of)
            })
            .collect()
    }

    /// Group current listings dated within `window` by (hex, county)
    ///
    /// Listings without a hex id are skipped.
    pub fn aggregate_by_hex(
        &self,
        current: &[CurrentListing],
        window: &MetricWindow,
    ) -> Vec<HexAggregate> {
        let mut groups: BTreeMap<(String, CountyId), ListingAccumulator> = BTreeMap::new();

        for listing in current.iter().filter(|l| window.range.contains(l.current_list_date())) {
            let Some(hex_id) = listing.latest.hex_id.as_ref() else {
                continue;
            };
            groups
                .entry((hex_id.clone(), listing.latest.county_id))
                .or_default()
                .push(
                    listing.list_price_per_sqft,
                    self.policy.is_institutional(listing.latest.owner_entity.as_deref()),
                );
        }

        groups
            .into_iter()
            .map(|((hex_id, county_id), acc)| HexAggregate {
                hex_id,
                county_id,
                window: window.clone(),
                sales: None,
                listings: Some(acc.finish()),
            })
            .collect()
    }

    /// Per-county number of current listings that `aggregate_by_hex` must cover
    pub fn hex_assignable_counts(
        current: &[CurrentListing],
        window: &MetricWindow,
    ) -> BTreeMap<CountyId, u64> {
        let mut counts = BTreeMap::new();
        for listing in current
            .iter()
            .filter(|l| l.latest.hex_id.is_some() && window.range.contains(l.current_list_date()))
        {
            *counts.entry(listing.latest.county_id).or_default() += 1;
        }
        counts
    }
}

/// `events` are one property's events, sorted by (date, record id)
fn current_listing(events: &[&CleanedListingRecord], as_of: NaiveDate) -> Option<CurrentListing> {
    let cycle = events.iter().map(|e| e.sale_cycle).max()?;
    let in_cycle: Vec<&CleanedListingRecord> =
        events.iter().copied().filter(|e| e.sale_cycle == cycle).collect();

    let listings: Vec<&CleanedListingRecord> = in_cycle
        .iter()
        .copied()
        .filter(|e| e.event_type == ListingEventType::Listing)
        .collect();
    let original = *listings.first()?;
    let latest = *listings.last()?;

    let closed = in_cycle
        .iter()
        .any(|e| e.event_type.closes_listing() && e.event_date >= latest.event_date);
    if closed {
        return None;
    }

    // listing events always carry these after cleaning
    let current_list_price = latest.price?;
    let square_feet = latest.square_feet?;
    let location = latest.location?;
    let original_list_price = original.price?;

    let prior_sale = events
        .iter()
        .rev()
        .find(|e| e.event_type == ListingEventType::Sale && e.event_date < original.event_date);
    let most_recent_sale_price = prior_sale.and_then(|s| s.price);

    Some(CurrentListing {
        latest: latest.clone(),
        current_list_price,
        list_price_per_sqft: current_list_price / square_feet,
        square_feet,
        location,
        original_list_date: original.event_date,
        original_list_price,
        days_on_market: (as_of - original.event_date).num_days(),
        most_recent_sale_date: prior_sale.map(|s| s.event_date),
        most_recent_sale_price,
        listing_to_sale_ratio: most_recent_sale_price
            .filter(|p| *p > 0.0)
            .map(|p| current_list_price / p),
    })
}
