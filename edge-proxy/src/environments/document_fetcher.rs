use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::IF_MODIFIED_SINCE;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::instrument;

use crate::config::EnvironmentKeyPair;
use crate::environments::environment_models::EnvironmentDocument;

pub const ENVIRONMENT_KEY_HEADER: &str = "X-Environment-Key";
const ENVIRONMENT_DOCUMENT_PATH: &str = "environment-document/";

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream responded with status {0}")]
    UnexpectedStatus(u16),
    #[error("failed to decode environment document: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned 304 Not Modified but no document is cached")]
    NotModifiedWithoutDocument,
    #[error("invalid upstream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::UnexpectedStatus(_) => "status",
            FetchError::Decode(_) => "decode",
            FetchError::Timeout(_) => "timeout",
            FetchError::NotModifiedWithoutDocument => "integrity",
            FetchError::InvalidUrl { .. } => "config",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Modified(EnvironmentDocument),
    NotModified,
}

/// Source of authoritative environment documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(
        &self,
        key_pair: &EnvironmentKeyPair,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Formats a timestamp as an IMF-fixdate, the form HTTP expects in `If-Modified-Since`.
pub fn http_date(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub struct HttpDocumentFetcher {
    client: reqwest::Client,
    document_url: String,
}

impl HttpDocumentFetcher {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        reqwest::Url::parse(api_url).map_err(|e| FetchError::InvalidUrl {
            url: api_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    pub fn with_client(client: reqwest::Client, api_url: &str) -> Self {
        let document_url = format!(
            "{}/{}",
            api_url.trim_end_matches('/'),
            ENVIRONMENT_DOCUMENT_PATH
        );
        Self {
            client,
            document_url,
        }
    }

    pub fn document_url(&self) -> &str {
        &self.document_url
    }
}

#[async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    #[instrument(skip_all, fields(client_side_key = %key_pair.client_side_key))]
    async fn fetch(
        &self,
        key_pair: &EnvironmentKeyPair,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, FetchError> {
        let mut request = self
            .client
            .get(&self.document_url)
            .header(ENVIRONMENT_KEY_HEADER, &key_pair.server_side_key);
        if let Some(timestamp) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, http_date(timestamp));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            tracing::debug!("environment document not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(FetchError::UnexpectedStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        let document = EnvironmentDocument::from_slice(&body)?;
        Ok(FetchOutcome::Modified(document))
    }
}
