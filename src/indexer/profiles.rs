// Profile refresh: walk the whole user feed, fill fid gaps, upsert.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use super::batch::{self, BatchReport, PROFILE_CHUNK_SIZE};
use super::casts::RunOptions;
use super::gap_fill;
use super::pagination::{self, OnFailure, PageSource, WalkOptions};
use crate::db::models::FlattenedProfile;
use crate::db::Database;
use crate::scoring::profile::flatten_profile;
use crate::warpcast::types::RawUser;

#[derive(Debug, Clone)]
pub struct ProfileRunSummary {
    pub fetched: usize,
    pub batch: BatchReport,
    /// Placeholder rows written for fids the feed skipped.
    pub placeholders: usize,
    pub duration: Duration,
}

/// Refresh every profile the user feed returns.
///
/// Unlike cast indexing, a failed page aborts the run: a partial user list
/// would make the gap filler invent placeholders for users that exist.
pub async fn update_all_profiles<S>(
    source: &S,
    db: &dyn Database,
    options: RunOptions,
) -> Result<ProfileRunSummary>
where
    S: PageSource<Item = RawUser> + ?Sized,
{
    let started = Instant::now();
    info!(limit = ?options.limit, "Starting profile update");

    let walk = pagination::walk(
        source,
        WalkOptions {
            limit: options.limit,
            start: options.cursor,
            retry: options.retry,
            on_failure: OnFailure::Propagate,
        },
    )
    .await
    .context("Failed to fetch profiles")?;

    if walk.items.is_empty() {
        anyhow::bail!("No profiles found");
    }

    let users = walk.items;
    let gaps = gap_fill::fill_gaps(&users);
    info!(
        fetched = users.len(),
        max_fid = users[0].fid,
        missing = gaps.len(),
        "Filled fid gaps"
    );

    let now = Utc::now();
    let profiles: Vec<FlattenedProfile> = users.iter().map(|u| flatten_profile(u, now)).collect();
    let rows: &[FlattenedProfile] = &profiles;

    let report = batch::upsert_in_chunks("profile", rows.len(), PROFILE_CHUNK_SIZE, move |range| {
        db.upsert_profiles(&rows[range])
    })
    .await?;

    // Placeholders go in after the real rows and never overwrite one.
    let placeholders: Vec<FlattenedProfile> =
        gaps.iter().map(|u| flatten_profile(u, now)).collect();
    let filler: &[FlattenedProfile] = &placeholders;
    batch::upsert_in_chunks(
        "profile placeholders",
        filler.len(),
        PROFILE_CHUNK_SIZE,
        move |range| db.insert_profiles_if_absent(&filler[range]),
    )
    .await?;

    let duration = started.elapsed();
    info!(
        fetched = users.len(),
        upserted = report.upserted,
        skipped = report.skipped_rows,
        placeholders = placeholders.len(),
        duration_secs = duration.as_secs_f64(),
        "Finished profile update"
    );

    Ok(ProfileRunSummary {
        fetched: users.len(),
        batch: report,
        placeholders: placeholders.len(),
        duration,
    })
}
