//! HTTP client for the Parcl Labs property search endpoint

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroU32;
use tracing::{debug, info, warn};

use super::rate_limit::RateGate;
use super::retry::RetryPolicy;
use super::SourceClient;
use crate::config::ProviderConfig;
use crate::error::{ConfigError, SourceError};
use crate::models::{County, CountyId, DataKind, DateRange, RawRecord};

const SEARCH_PATH: &str = "/v2/property_search";

/// Request body for the property search endpoint
#[derive(Debug, Clone, Serialize)]
struct SearchRequest<'a> {
    parcl_ids: [CountyId; 1],
    event_names: [&'static str; 1],
    property_types: &'a [String],
    min_event_date: String,
    max_event_date: String,
    min_price: u64,
    min_sqft: u64,
    current_on_market_flag: bool,
    include_property_details: bool,
    include_full_event_history: bool,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    items: Vec<Value>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    has_more: Option<bool>,
}

/// Outcome of a single HTTP attempt
enum AttemptError {
    /// Worth retrying: timeouts, connection failures, 5xx, 429
    Transient(String),
    /// Retrying cannot help
    Fatal(SourceError),
}

/// Parcl Labs property search client
#[derive(Debug, Clone)]
pub struct ParclClient {
    http: reqwest::Client,
    config: ProviderConfig,
    retry: RetryPolicy,
    gate: RateGate,
}

impl ParclClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ConfigError> {
        let rate = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| ConfigError::invalid("ETL_REQUESTS_PER_SECOND", "must be greater than 0"))?;
        Self::with_gate(config, RateGate::per_second(rate))
    }

    /// Share an existing rate gate with other clients
    pub fn with_gate(config: ProviderConfig, gate: RateGate) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("hexmarket-etl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::invalid("PARCL_API_BASE_URL", e.to_string()))?;
        let retry = RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay());

        Ok(Self {
            http,
            config,
            retry,
            gate,
        })
    }

    fn search_url(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), SEARCH_PATH)
    }

    fn request_body(&self, kind: DataKind, county: &County, range: DateRange) -> SearchRequest<'_> {
        SearchRequest {
            parcl_ids: [county.id],
            event_names: [match kind {
                DataKind::Listings => "ALL_LISTINGS",
                DataKind::Sales => "SOLD",
            }],
            property_types: &self.config.property_types,
            min_event_date: range.start.format("%Y-%m-%d").to_string(),
            max_event_date: range.end.format("%Y-%m-%d").to_string(),
            min_price: self.config.min_price,
            min_sqft: self.config.min_sqft,
            current_on_market_flag: kind == DataKind::Listings,
            include_property_details: true,
            include_full_event_history: kind == DataKind::Listings,
        }
    }

    async fn search(
        &self,
        kind: DataKind,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let body = self.request_body(kind, county, range);
        let page_size = self.config.page_size;
        let mut records = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let page = self.fetch_page(county.id, &body, offset).await?;
            let received = page.items.len();

            for item in page.items {
                let record = RawRecord::from_json(county.id, item).ok_or_else(|| SourceError::Schema {
                    county: county.id,
                    message: "search result item is not an object".to_string(),
                })?;
                records.push(record);
            }

            debug!(
                county = county.id,
                kind = %kind,
                offset,
                received,
                "Fetched search page"
            );

            // an explicit has_more wins; pages may be capped below page_size
            let has_more = page
                .pagination
                .and_then(|p| p.has_more)
                .unwrap_or(received as u64 >= u64::from(page_size));
            if !has_more || received == 0 {
                break;
            }
            offset += received as u64;
        }

        info!(
            county = county.id,
            county_name = %county.name,
            kind = %kind,
            window = %range,
            records = records.len(),
            "Extracted county"
        );
        Ok(records)
    }

    async fn fetch_page(
        &self,
        county: CountyId,
        body: &SearchRequest<'_>,
        offset: u64,
    ) -> Result<SearchPage, SourceError> {
        let mut attempt = 1;
        loop {
            match self.send_once(county, body, offset).await {
                Ok(page) => return Ok(page),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Transient(message)) => {
                    if !self.retry.should_retry(attempt) {
                        warn!(county, attempt, error = %message, "Retry budget exhausted");
                        return Err(SourceError::Unavailable {
                            county,
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        county,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Provider request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
            }
        }
    }

    async fn send_once(
        &self,
        county: CountyId,
        body: &SearchRequest<'_>,
        offset: u64,
    ) -> Result<SearchPage, AttemptError> {
        self.gate.acquire().await;

        let response = self
            .http
            .post(self.search_url())
            .query(&[("limit", u64::from(self.config.page_size)), ("offset", offset)])
            .header(reqwest::header::AUTHORIZATION, self.config.api_key.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport_error(county, e))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AttemptError::Transient(format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AttemptError::Fatal(SourceError::Unavailable {
                county,
                attempts: 1,
                message: format!("HTTP {}: {}", status, truncate(&detail, 200)),
            }));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("failed to read body: {}", e)))?;

        serde_json::from_str::<SearchPage>(&text).map_err(|e| {
            AttemptError::Fatal(SourceError::Schema {
                county,
                message: format!("malformed search response: {}", e),
            })
        })
    }
}

fn classify_transport_error(county: CountyId, error: reqwest::Error) -> AttemptError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        AttemptError::Transient(error.to_string())
    } else {
        AttemptError::Fatal(SourceError::Unavailable {
            county,
            attempts: 1,
            message: error.to_string(),
        })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[async_trait]
impl SourceClient for ParclClient {
    async fn fetch_listings(
        &self,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.search(DataKind::Listings, county, range).await
    }

    async fn fetch_sales(
        &self,
        county: &County,
        range: DateRange,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.search(DataKind::Sales, county, range).await
    }
}
