//! Page fetcher for the federal spending-by-award search API.
//!
//! Each call performs exactly one POST round trip for one page. There is no
//! retry and no pagination state here; the pipeline driver owns the cursor.

mod request;

use std::time::Duration;

use async_trait::async_trait;
use awardsync_shared::{AwardSyncError, RawRecord, Result};
use reqwest::Client;
use tracing::{debug, instrument};

pub use request::{
    PAGE_LIMIT, PageMetadata, SearchFilters, SearchQuery, SearchRequest, SearchResponse,
    TimePeriod,
};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("awardsync/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// One page of raw records plus the API's continuation signal.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records in arrival order.
    pub records: Vec<RawRecord>,
    /// `page_metadata.hasNext` as reported by the API.
    pub has_next: bool,
}

/// Anything that can hand the pipeline one page at a time.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch page `page` (1-based).
    async fn fetch_page(&self, page: u32) -> Result<Page>;
}

// ---------------------------------------------------------------------------
// SearchClient
// ---------------------------------------------------------------------------

/// HTTP page fetcher bound to one fixed query.
pub struct SearchClient {
    query: SearchQuery,
    client: Client,
}

impl SearchClient {
    /// Create a client for `query`.
    pub fn new(query: SearchQuery) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(query.timeout_secs))
            .build()
            .map_err(|e| AwardSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { query, client })
    }

    /// The query every page is fetched with.
    pub fn query(&self) -> &SearchQuery {
        &self.query
    }
}

#[async_trait]
impl PageSource for SearchClient {
    #[instrument(skip_all, fields(page = page))]
    async fn fetch_page(&self, page: u32) -> Result<Page> {
        if page == 0 {
            return Err(AwardSyncError::validation("page numbers start at 1"));
        }

        let url = self.query.endpoint.as_str();
        debug!(%url, page, "requesting search page");

        let response = self
            .client
            .post(url)
            .json(&self.query.body(page))
            .send()
            .await
            .map_err(|e| AwardSyncError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AwardSyncError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| AwardSyncError::Network(format!("{url}: failed to read body: {e}")))?;

        let parsed: SearchResponse = serde_json::from_str(&body)
            .map_err(|e| AwardSyncError::parse(format!("{url}: page {page}: {e}")))?;

        debug!(
            page,
            records = parsed.results.len(),
            has_next = parsed.page_metadata.has_next,
            "search page received"
        );

        Ok(Page {
            records: parsed.results,
            has_next: parsed.page_metadata.has_next,
        })
    }
}
