// Warpcast HTTP client and the two feeds the indexer walks.
//
// `ApiClient` is a thin reqwest wrapper: one GET helper that applies the
// shared rate limiter, the per-request timeout and error classification.
// `CastFeed` and `UserFeed` turn it into `PageSource`s for the walker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use super::types::{PageEnvelope, RawCast, RawUser};
use crate::indexer::pagination::{Cursor, FetchError, Page, PageSource};

/// Default Warpcast API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.warpcast.com";

/// Largest page the API will hand out.
pub const MAX_PAGE_SIZE: usize = 1000;

/// HTTP client for the Warpcast v2 API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    page_size: usize,
    rate_limiter: Arc<RateLimiter>,
}

impl ApiClient {
    /// Create a client pointing at `base_url`.
    ///
    /// `timeout` bounds every individual request. The rate limiter is shared
    /// so that several jobs using clones of the same `Arc` stay under one quota.
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("fc-indexer/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            page_size: MAX_PAGE_SIZE,
            rate_limiter,
        })
    }

    /// Override the number of items requested per page (1..=1000).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Build the request URL for `path` with a page size and optional cursor.
    ///
    /// `extra` parameters come first, in order, followed by `limit` and
    /// `cursor` (e.g. `recent-users?filter=off&limit=1000&cursor=...`).
    pub fn endpoint(
        &self,
        path: &str,
        extra: &[(&str, &str)],
        cursor: Option<&Cursor>,
    ) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/{}", self.base_url, path))
            .with_context(|| format!("Invalid API URL for {path}"))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in extra {
                query.append_pair(key, value);
            }
            query.append_pair("limit", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor.as_str());
            }
        }
        Ok(url)
    }

    /// GET `path` and decode the page envelope, classifying failures.
    pub async fn get_page(
        &self,
        path: &str,
        extra: &[(&str, &str)],
        cursor: Option<&Cursor>,
    ) -> Result<PageEnvelope, FetchError> {
        let url = self
            .endpoint(path, extra, cursor)
            .map_err(FetchError::Rejected)?;

        self.rate_limiter.acquire().await;
        debug!(path = path, cursor = cursor.map(Cursor::as_str), "API GET request");

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            FetchError::Transient(anyhow!(e).context(format!("Request to {path} failed")))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = anyhow!("{path} returned {status}: {body}");
            return Err(if is_retryable_status(status) {
                FetchError::Transient(err)
            } else {
                FetchError::Rejected(err)
            });
        }

        response.json::<PageEnvelope>().await.map_err(|e| {
            // A body cut off mid-stream is a network problem; malformed JSON is not.
            if e.is_decode() {
                FetchError::Rejected(anyhow!(e).context(format!("Failed to decode {path} response")))
            } else {
                FetchError::Transient(anyhow!(e).context(format!("Failed to read {path} response")))
            }
        })
    }

    /// The `recent-casts` feed.
    pub fn casts(&self) -> CastFeed<'_> {
        CastFeed { client: self }
    }

    /// The `recent-users` feed, unfiltered.
    pub fn users(&self) -> UserFeed<'_> {
        UserFeed { client: self }
    }
}

/// 429 and 5xx are worth retrying; any other non-success status is not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Decode page items one at a time, dropping (and logging) records that
/// don't match the expected shape instead of failing the whole page.
pub fn decode_items<T: DeserializeOwned>(values: Vec<Value>, kind: &str) -> Vec<T> {
    let total = values.len();
    let decoded: Vec<T> = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(kind = kind, index = index, error = %e, "Dropping malformed record");
                None
            }
        })
        .collect();

    if decoded.len() < total {
        warn!(
            kind = kind,
            dropped = total - decoded.len(),
            total = total,
            "Some records on this page could not be decoded"
        );
    }
    decoded
}

/// Walker adapter for `GET /v2/recent-casts`.
pub struct CastFeed<'a> {
    client: &'a ApiClient,
}

#[async_trait]
impl PageSource for CastFeed<'_> {
    type Item = RawCast;

    fn label(&self) -> &'static str {
        "casts"
    }

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page<RawCast>, FetchError> {
        let envelope = self.client.get_page("v2/recent-casts", &[], cursor).await?;
        let next_cursor = envelope.next_cursor();
        let values = envelope
            .result
            .casts
            .ok_or(FetchError::MissingField("result.casts"))?;
        Ok(Page {
            items: decode_items(values, "cast"),
            next_cursor,
        })
    }
}

/// Walker adapter for `GET /v2/recent-users?filter=off`.
pub struct UserFeed<'a> {
    client: &'a ApiClient,
}

#[async_trait]
impl PageSource for UserFeed<'_> {
    type Item = RawUser;

    fn label(&self) -> &'static str {
        "users"
    }

    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page<RawUser>, FetchError> {
        let envelope = self
            .client
            .get_page("v2/recent-users", &[("filter", "off")], cursor)
            .await?;
        let next_cursor = envelope.next_cursor();
        let values = envelope
            .result
            .users
            .ok_or(FetchError::MissingField("result.users"))?;
        Ok(Page {
            items: decode_items(values, "user"),
            next_cursor,
        })
    }
}
