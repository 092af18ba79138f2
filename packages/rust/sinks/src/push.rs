//! Remote bulk-insert sink (push dataset rows endpoint).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use awardsync_shared::{AwardSyncError, MAX_PUSH_ROWS, Result, Row};

use crate::Sink;
use crate::token::TokenProvider;

/// A dataset on the push API plus a bearer token acquired once.
#[derive(Clone)]
pub struct PushTarget {
    api_base: String,
    dataset_id: String,
    token: String,
    client: Client,
}

impl PushTarget {
    /// Acquire a token from `provider` and bind it to the dataset.
    ///
    /// Called before any search request so auth failures abort early.
    pub async fn connect(
        api_base: &str,
        dataset_id: &str,
        provider: &dyn TokenProvider,
    ) -> Result<Self> {
        let token = provider.token().await?;
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AwardSyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            dataset_id: dataset_id.to_string(),
            token,
            client,
        })
    }

    /// Sink that inserts into `table` of this dataset.
    pub fn sink(&self, table: &str) -> Result<PushSink> {
        let raw = format!(
            "{}/datasets/{}/tables/{}/rows",
            self.api_base, self.dataset_id, table
        );
        let url = Url::parse(&raw)
            .map_err(|e| AwardSyncError::config(format!("invalid push URL '{raw}': {e}")))?;

        Ok(PushSink {
            name: table.to_string(),
            url,
            token: self.token.clone(),
            client: self.client.clone(),
        })
    }
}

/// Posts `{"rows": [...]}` to one table's rows endpoint.
pub struct PushSink {
    name: String,
    url: Url,
    token: String,
    client: Client,
}

impl PushSink {
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Serialize)]
struct RowsPayload<'a> {
    rows: &'a [Row],
}

#[async_trait]
impl Sink for PushSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(table = %self.name, rows = rows.len()))]
    async fn write(&mut self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        if rows.len() > MAX_PUSH_ROWS {
            return Err(AwardSyncError::sink(
                &self.name,
                format!(
                    "{} rows exceeds the {MAX_PUSH_ROWS}-row limit per request",
                    rows.len()
                ),
            ));
        }

        let response = self
            .client
            .post(self.url.as_str())
            .bearer_auth(&self.token)
            .json(&RowsPayload { rows })
            .send()
            .await
            .map_err(|e| AwardSyncError::sink(&self.name, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AwardSyncError::sink(
                &self.name,
                format!("HTTP {status}: {body}"),
            ));
        }

        debug!("push batch accepted");
        Ok(())
    }
}
