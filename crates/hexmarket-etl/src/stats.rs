//! Metric accumulation shared by the hex and county aggregations

use crate::models::{ListingMetrics, SalesMetrics};

/// Median of `values`; the mean of the two middle values for even counts
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[derive(Debug, Default)]
pub(crate) struct SalesAccumulator {
    total: u64,
    acquisitions: u64,
    dispositions: u64,
    vintages: Vec<f64>,
    sizes: Vec<f64>,
    price_per_sqft: Vec<f64>,
}

impl SalesAccumulator {
    pub fn push(
        &mut self,
        year_built: Option<i32>,
        square_feet: f64,
        price_per_sqft: f64,
        acquisition: bool,
        disposition: bool,
    ) {
        self.total += 1;
        self.acquisitions += u64::from(acquisition);
        self.dispositions += u64::from(disposition);
        if let Some(year) = year_built {
            self.vintages.push(f64::from(year));
        }
        self.sizes.push(square_feet);
        self.price_per_sqft.push(price_per_sqft);
    }

    pub fn finish(mut self) -> SalesMetrics {
        SalesMetrics {
            total_sales: self.total,
            inst_acquisitions: self.acquisitions,
            inst_dispositions: self.dispositions,
            median_vintage: median(&mut self.vintages),
            median_size: median(&mut self.sizes),
            median_price_per_sqft: median(&mut self.price_per_sqft),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ListingAccumulator {
    total: u64,
    institutional: u64,
    price_per_sqft: Vec<f64>,
}

impl ListingAccumulator {
    pub fn push(&mut self, price_per_sqft: f64, institutional: bool) {
        self.total += 1;
        self.institutional += u64::from(institutional);
        self.price_per_sqft.push(price_per_sqft);
    }

    pub fn finish(mut self) -> ListingMetrics {
        ListingMetrics {
            total_listings: self.total,
            inst_listings: self.institutional,
            median_list_price_per_sqft: median(&mut self.price_per_sqft),
        }
    }
}
