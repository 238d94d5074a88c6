// Cursor-following page walker.
//
// Pulls pages from a `PageSource` strictly in order: the cursor returned with
// page N is the only thing ever used to request page N+1. The walk stops when
// the accumulated item count reaches the limit or the source stops returning
// a cursor. The last cursor seen is handed back so the caller can persist it
// and resume from exactly that point on the next run.
//
// Transient failures are retried against the same cursor with exponential
// backoff. What happens once retries run out is the caller's choice (see
// `OnFailure`).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Opaque pagination token issued by the remote source.
///
/// Never parsed or built from parts. It only travels from a response to the
/// next request, or through storage and back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Rehydrate a token that was previously returned by the source.
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of results plus the cursor for the following page, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Cursor>,
}

/// Why a page could not be fetched.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout, 429 or 5xx. Worth retrying.
    #[error("transient fetch failure: {0:#}")]
    Transient(#[source] anyhow::Error),
    /// The source answered, but not with something usable.
    #[error("request rejected: {0:#}")]
    Rejected(#[source] anyhow::Error),
    /// The response decoded but a required key was absent.
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// A cursor-paginated remote collection.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    /// Short label for log lines (e.g. "casts").
    fn label(&self) -> &'static str;

    /// Fetch the page at `cursor`, or the first page when `cursor` is None.
    async fn fetch_page(&self, cursor: Option<&Cursor>) -> Result<Page<Self::Item>, FetchError>;
}

/// Backoff schedule for transient fetch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Fail on the first error.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^attempt,
    /// capped, then scaled by a 0.75..1.25 jitter factor.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
            .min(self.max_backoff);

        // The nanosecond component of the wall clock is enough jitter to keep
        // concurrent jobs from retrying in lockstep.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0;
        Duration::from_secs_f64(exp.as_secs_f64() * jitter_factor)
    }
}

/// What the walker does once a page fetch has finally failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnFailure {
    /// Stop, keep what was gathered, and report the failed cursor as the
    /// resume point.
    Halt,
    /// Abort the walk with the error.
    Propagate,
}

#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Stop once at least this many items have been gathered. `None` or
    /// `Some(0)` walks to the end.
    pub limit: Option<usize>,
    /// Resume from a previously returned cursor.
    pub start: Option<Cursor>,
    pub retry: RetryPolicy,
    pub on_failure: OnFailure,
}

impl WalkOptions {
    pub fn new(on_failure: OnFailure) -> Self {
        Self {
            limit: None,
            start: None,
            retry: RetryPolicy::default(),
            on_failure,
        }
    }
}

/// Everything the walk produced.
#[derive(Debug, Clone)]
pub struct WalkOutcome<T> {
    pub items: Vec<T>,
    /// Where the next run should start. None once the source is exhausted.
    pub next_cursor: Option<Cursor>,
    /// Pages successfully fetched.
    pub pages: usize,
    /// Set when the walk was cut short by a fetch failure under
    /// `OnFailure::Halt`.
    pub interrupted: Option<String>,
}

impl<T> WalkOutcome<T> {
    /// True when the source reported no further pages.
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_none() && self.interrupted.is_none()
    }
}

/// Walk `source` page by page according to `options`.
pub async fn walk<S>(source: &S, options: WalkOptions) -> anyhow::Result<WalkOutcome<S::Item>>
where
    S: PageSource + ?Sized,
{
    let limit = options.limit.filter(|&l| l > 0);
    let mut cursor = options.start;
    let mut items: Vec<S::Item> = Vec::new();
    let mut pages = 0usize;

    info!(
        source = source.label(),
        limit = ?limit,
        cursor = cursor.as_ref().map(Cursor::as_str),
        "Starting walk"
    );

    loop {
        let page = match fetch_with_retry(source, cursor.as_ref(), &options.retry).await {
            Ok(page) => page,
            Err(err) => match options.on_failure {
                OnFailure::Propagate => {
                    return Err(anyhow::Error::new(err).context(format!(
                        "Failed to fetch {} page {}",
                        source.label(),
                        pages
                    )));
                }
                OnFailure::Halt => {
                    warn!(
                        source = source.label(),
                        page = pages,
                        collected = items.len(),
                        error = %err,
                        "Halting walk; the failed cursor is kept as the resume point"
                    );
                    return Ok(WalkOutcome {
                        items,
                        next_cursor: cursor,
                        pages,
                        interrupted: Some(err.to_string()),
                    });
                }
            },
        };

        pages += 1;
        let page_len = page.items.len();
        items.extend(page.items);
        cursor = page.next_cursor;

        debug!(
            source = source.label(),
            page = pages,
            page_len = page_len,
            total = items.len(),
            "Fetched page"
        );

        if limit.is_some_and(|l| items.len() >= l) {
            break;
        }
        if cursor.is_none() {
            break;
        }
    }

    info!(
        source = source.label(),
        pages = pages,
        total = items.len(),
        exhausted = cursor.is_none(),
        "Walk finished"
    );

    Ok(WalkOutcome {
        items,
        next_cursor: cursor,
        pages,
        interrupted: None,
    })
}

/// Fetch one page, retrying transient failures against the same cursor.
async fn fetch_with_retry<S>(
    source: &S,
    cursor: Option<&Cursor>,
    policy: &RetryPolicy,
) -> Result<Page<S::Item>, FetchError>
where
    S: PageSource + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        match source.fetch_page(cursor).await {
            Ok(page) => return Ok(page),
            Err(err) => {
                if !err.is_transient() || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay = policy.backoff(attempt);
                warn!(
                    source = source.label(),
                    attempt = attempt,
                    max_retries = policy.max_retries,
                    backoff_secs = delay.as_secs_f64(),
                    error = %err,
                    "Page fetch failed, retrying same cursor in {:.1}s",
                    delay.as_secs_f64(),
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_display_is_the_raw_token() {
        let cursor = Cursor::from_token("eyJsaW1pdCI6MTAwMH0");
        assert_eq!(cursor.to_string(), "eyJsaW1pdCI6MTAwMH0");
        assert_eq!(
            serde_json::to_string(&cursor).unwrap(),
            "\"eyJsaW1pdCI6MTAwMH0\""
        );
    }

    #[test]
    fn backoff_is_capped_and_jittered() {
        let policy = RetryPolicy::default();
        for attempt in 1..=10 {
            let delay = policy.backoff(attempt);
            assert!(delay <= Duration::from_secs_f64(60.0 * 1.25));
        }
        let first = policy.backoff(1);
        assert!(first >= Duration::from_secs(3) && first <= Duration::from_secs(5));
    }

    #[test]
    fn backoff_survives_huge_attempt_numbers() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(200) <= Duration::from_secs(75));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(FetchError::Transient(anyhow::anyhow!("timeout")).is_transient());
        assert!(!FetchError::Rejected(anyhow::anyhow!("400")).is_transient());
        assert!(!FetchError::MissingField("result.users").is_transient());
    }
}
