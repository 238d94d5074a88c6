// Cast indexing: walk recent casts, clean, score, upsert.
//
// A run returns the cursor it stopped at so the next run can pick up where
// this one left off. Backfill chains runs together until the feed is
// exhausted, persisting the cursor between batches.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::batch::{self, BatchReport, CAST_CHUNK_SIZE};
use super::cleaner;
use super::pagination::{self, Cursor, OnFailure, PageSource, RetryPolicy, WalkOptions};
use crate::db::models::FlattenedCast;
use crate::db::Database;
use crate::scoring::cast::flatten_cast;
use crate::warpcast::types::RawCast;

/// scan_state key holding the resume cursor for cast backfills.
pub const CAST_CURSOR_KEY: &str = "casts_backfill_cursor";

/// Inputs supplied by whoever triggers a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limit: Option<usize>,
    pub cursor: Option<Cursor>,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct CastRunSummary {
    /// Resume point for the next run. None once the feed is exhausted.
    pub next_cursor: Option<Cursor>,
    /// Set when a page fetch failed for good and the walk stopped early.
    pub interrupted: Option<String>,
    pub fetched: usize,
    pub indexed: usize,
    pub batch: BatchReport,
    pub duration: Duration,
}

impl CastRunSummary {
    pub fn is_exhausted(&self) -> bool {
        self.next_cursor.is_none() && self.interrupted.is_none()
    }
}

/// Index recent casts into the `casts` table.
pub async fn index_all_casts<S>(
    source: &S,
    db: &dyn Database,
    options: RunOptions,
) -> Result<CastRunSummary>
where
    S: PageSource<Item = RawCast> + ?Sized,
{
    let started = Instant::now();
    info!(limit = ?options.limit, "Starting cast indexing");

    let walk = pagination::walk(
        source,
        WalkOptions {
            limit: options.limit,
            start: options.cursor,
            retry: options.retry,
            on_failure: OnFailure::Halt,
        },
    )
    .await?;

    let fetched = walk.items.len();
    let casts: Vec<FlattenedCast> = cleaner::clean_casts(walk.items)
        .into_iter()
        .map(flatten_cast)
        .collect();
    let rows: &[FlattenedCast] = &casts;

    let report = batch::upsert_in_chunks("casts", rows.len(), CAST_CHUNK_SIZE, move |range| {
        db.upsert_casts(&rows[range])
    })
    .await?;

    let duration = started.elapsed();
    info!(
        fetched = fetched,
        indexed = report.upserted,
        skipped = report.skipped_rows,
        duration_secs = duration.as_secs_f64(),
        next_cursor = walk.next_cursor.as_ref().map(Cursor::as_str),
        "Finished cast indexing"
    );

    Ok(CastRunSummary {
        next_cursor: walk.next_cursor,
        interrupted: walk.interrupted,
        fetched,
        indexed: report.upserted,
        batch: report,
        duration,
    })
}

/// The stored backfill cursor, if one was saved.
pub async fn load_resume_cursor(db: &dyn Database) -> Result<Option<Cursor>> {
    Ok(db
        .get_scan_state(CAST_CURSOR_KEY)
        .await?
        .filter(|token| !token.is_empty())
        .map(Cursor::from_token))
}

/// Persist (or clear, with None) the backfill cursor.
pub async fn save_resume_cursor(db: &dyn Database, cursor: Option<&Cursor>) -> Result<()> {
    db.set_scan_state(CAST_CURSOR_KEY, cursor.map(Cursor::as_str).unwrap_or(""))
        .await
        .context("Failed to save cast resume cursor")
}

#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    pub batches: usize,
    pub indexed: usize,
    pub next_cursor: Option<Cursor>,
    pub interrupted: Option<String>,
}

/// Index the whole cast history in runs of `batch_limit`, threading each
/// run's cursor into the next and saving it after every run.
pub async fn backfill_casts<S>(
    source: &S,
    db: &dyn Database,
    batch_limit: usize,
    start: Option<Cursor>,
    retry: RetryPolicy,
) -> Result<BackfillSummary>
where
    S: PageSource<Item = RawCast> + ?Sized,
{
    let mut summary = BackfillSummary {
        next_cursor: start,
        ..BackfillSummary::default()
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(200));

    loop {
        spinner.set_message(format!(
            "Backfill batch {}, {} casts indexed",
            summary.batches + 1,
            summary.indexed
        ));

        let run = index_all_casts(
            source,
            db,
            RunOptions {
                limit: Some(batch_limit),
                cursor: summary.next_cursor.clone(),
                retry,
            },
        )
        .await?;

        summary.batches += 1;
        summary.indexed += run.indexed;
        save_resume_cursor(db, run.next_cursor.as_ref()).await?;
        summary.next_cursor = run.next_cursor;

        if let Some(reason) = run.interrupted {
            warn!(error = %reason, "Backfill interrupted; resume cursor saved");
            summary.interrupted = Some(reason);
            break;
        }
        if summary.next_cursor.is_none() {
            info!("No more casts to index");
            break;
        }
    }

    spinner.finish_and_clear();
    Ok(summary)
}
