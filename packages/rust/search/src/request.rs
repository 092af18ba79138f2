//! Wire shapes for the spending-by-award search endpoint.

use serde::{Deserialize, Serialize};

use awardsync_shared::{DateWindow, RawRecord, RunConfig};
use url::Url;

/// Page size the endpoint is always asked for.
pub const PAGE_LIMIT: u32 = 100;

/// The fixed filter/projection contract shared by every page of a run.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Search endpoint URL.
    pub endpoint: Url,
    /// Closed reporting window.
    pub window: DateWindow,
    /// Award type codes.
    pub award_type_codes: Vec<String>,
    /// Field projection.
    pub fields: Vec<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl From<&RunConfig> for SearchQuery {
    fn from(config: &RunConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            window: config.window,
            award_type_codes: config.award_type_codes.clone(),
            fields: config.fields.clone(),
            timeout_secs: config.timeout_secs,
        }
    }
}

impl SearchQuery {
    /// Request body for `page`.
    pub fn body(&self, page: u32) -> SearchRequest<'_> {
        SearchRequest {
            subawards: false,
            page,
            limit: PAGE_LIMIT,
            filters: SearchFilters {
                award_type_codes: &self.award_type_codes,
                time_period: [TimePeriod {
                    start_date: self.window.start.format("%Y-%m-%d").to_string(),
                    end_date: self.window.end.format("%Y-%m-%d").to_string(),
                }],
            },
            fields: &self.fields,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub subawards: bool,
    pub page: u32,
    pub limit: u32,
    pub filters: SearchFilters<'a>,
    pub fields: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct SearchFilters<'a> {
    pub award_type_codes: &'a [String],
    pub time_period: [TimePeriod; 1],
}

#[derive(Debug, Serialize)]
pub struct TimePeriod {
    pub start_date: String,
    pub end_date: String,
}

/// Response body. Missing keys decode to "no records, no next page".
#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<RawRecord>,
    #[serde(default)]
    pub page_metadata: PageMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default, rename = "hasNext")]
    pub has_next: bool,
}
