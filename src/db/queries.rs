// SQLite queries behind `SqliteDatabase`.
//
// Chunk writes run in one transaction each and map constraint failures to
// `UpsertError`. Timestamps are stored as RFC 3339 text and nested payloads
// (mentions, embeds, tags) as JSON text.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::models::{FlattenedCast, FlattenedProfile, ProfileRow, Registration};
use super::traits::UpsertError;

// --- Scan state ---

/// Get a scan state value by key (e.g., "casts_backfill_cursor").
pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

/// Insert or overwrite a scan state value.
pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

/// All scan state entries, ordered by key.
pub fn get_all_scan_state(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM scan_state ORDER BY key")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Error classification ---

/// Map a rusqlite error to the batch engine's error type.
fn classify(err: rusqlite::Error) -> UpsertError {
    if let rusqlite::Error::SqliteFailure(e, msg) = &err {
        if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY {
            return UpsertError::ForeignKeyViolation(
                msg.clone()
                    .unwrap_or_else(|| "FOREIGN KEY constraint failed".to_string()),
            );
        }
    }
    UpsertError::Other(err.into())
}

// --- Casts ---

const CAST_COLUMNS: &str = "hash, thread_hash, parent_hash, author_fid, author_username,
    author_display_name, author_pfp_url, author_pfp_verified, text, published_at,
    mentions, replies_count, reactions_count, recasts_count, watches_count, quote_count,
    parent_author_fid, parent_author_username, embeds, tags, deleted, engagement,
    author_active, follower_count, engagement_band, engagement_int";

/// Upsert a chunk of casts keyed on hash. The whole chunk commits or none
/// of it does.
pub fn upsert_casts(conn: &Connection, casts: &[FlattenedCast]) -> Result<(), UpsertError> {
    let tx = conn.unchecked_transaction().map_err(classify)?;
    {
        let mut stmt = tx
            .prepare_cached(&format!(
                "INSERT INTO casts ({CAST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                         ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)
                 ON CONFLICT(hash) DO UPDATE SET
                    thread_hash = excluded.thread_hash,
                    parent_hash = excluded.parent_hash,
                    author_fid = excluded.author_fid,
                    author_username = excluded.author_username,
                    author_display_name = excluded.author_display_name,
                    author_pfp_url = excluded.author_pfp_url,
                    author_pfp_verified = excluded.author_pfp_verified,
                    text = excluded.text,
                    published_at = excluded.published_at,
                    mentions = excluded.mentions,
                    replies_count = excluded.replies_count,
                    reactions_count = excluded.reactions_count,
                    recasts_count = excluded.recasts_count,
                    watches_count = excluded.watches_count,
                    quote_count = excluded.quote_count,
                    parent_author_fid = excluded.parent_author_fid,
                    parent_author_username = excluded.parent_author_username,
                    embeds = excluded.embeds,
                    tags = excluded.tags,
                    deleted = excluded.deleted,
                    engagement = excluded.engagement,
                    author_active = excluded.author_active,
                    follower_count = excluded.follower_count,
                    engagement_band = excluded.engagement_band,
                    engagement_int = excluded.engagement_int"
            ))
            .map_err(classify)?;

        for cast in casts {
            let mentions = to_json(cast.mentions.as_ref())?;
            let embeds = to_json(cast.embeds.as_ref())?;
            let tags = to_json(cast.tags.as_ref())?;
            stmt.execute(params![
                cast.hash,
                cast.thread_hash,
                cast.parent_hash,
                cast.author_fid,
                cast.author_username,
                cast.author_display_name,
                cast.author_pfp_url,
                cast.author_pfp_verified,
                cast.text,
                format_ts(&cast.published_at),
                mentions,
                cast.replies_count,
                cast.reactions_count,
                cast.recasts_count,
                cast.watches_count,
                cast.quote_count,
                cast.parent_author_fid,
                cast.parent_author_username,
                embeds,
                tags,
                cast.deleted,
                cast.engagement,
                cast.author_active,
                cast.follower_count,
                cast.engagement_band,
                cast.engagement_int,
            ])
            .map_err(classify)?;
        }
    }
    tx.commit().map_err(classify)
}

/// Look up a single cast by hash.
pub fn get_cast(conn: &Connection, hash: &str) -> Result<Option<FlattenedCast>> {
    let mut stmt = conn.prepare(&format!("SELECT {CAST_COLUMNS} FROM casts WHERE hash = ?1"))?;
    let result = stmt.query_row(params![hash], row_to_cast).optional()?;
    Ok(result)
}

pub fn count_casts(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM casts", [], |row| row.get(0))?;
    Ok(count)
}

fn row_to_cast(row: &Row<'_>) -> rusqlite::Result<FlattenedCast> {
    Ok(FlattenedCast {
        hash: row.get(0)?,
        thread_hash: row.get(1)?,
        parent_hash: row.get(2)?,
        author_fid: row.get(3)?,
        author_username: row.get(4)?,
        author_display_name: row.get(5)?,
        author_pfp_url: row.get(6)?,
        author_pfp_verified: row.get(7)?,
        text: row.get(8)?,
        published_at: parse_ts(row, 9)?,
        mentions: from_json(row, 10)?,
        replies_count: row.get(11)?,
        reactions_count: row.get(12)?,
        recasts_count: row.get(13)?,
        watches_count: row.get(14)?,
        quote_count: row.get(15)?,
        parent_author_fid: row.get(16)?,
        parent_author_username: row.get(17)?,
        embeds: from_json(row, 18)?,
        tags: from_json(row, 19)?,
        deleted: row.get(20)?,
        engagement: row.get(21)?,
        author_active: row.get(22)?,
        follower_count: row.get(23)?,
        engagement_band: row.get(24)?,
        engagement_int: row.get(25)?,
    })
}

// --- Profiles ---

const PROFILE_INSERT: &str = "INSERT INTO profile (id, username, display_name, avatar_url,
    avatar_verified, followers, following, bio, referrer, updated_at, active_on_fc,
    link_in_bio_status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

/// Upsert a chunk of profiles keyed on id. `owner` and `registered_at`
/// belong to registration sync and are never written here.
pub fn upsert_profiles(
    conn: &Connection,
    profiles: &[FlattenedProfile],
) -> Result<(), UpsertError> {
    write_profiles(
        conn,
        profiles,
        &format!(
            "{PROFILE_INSERT}
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                avatar_verified = excluded.avatar_verified,
                followers = excluded.followers,
                following = excluded.following,
                bio = excluded.bio,
                referrer = excluded.referrer,
                updated_at = excluded.updated_at,
                active_on_fc = excluded.active_on_fc,
                link_in_bio_status = excluded.link_in_bio_status"
        ),
    )
}

/// Insert profiles whose id is not present yet. Existing rows are left as is.
pub fn insert_profiles_if_absent(
    conn: &Connection,
    profiles: &[FlattenedProfile],
) -> Result<(), UpsertError> {
    write_profiles(
        conn,
        profiles,
        &format!("{PROFILE_INSERT} ON CONFLICT(id) DO NOTHING"),
    )
}

fn write_profiles(
    conn: &Connection,
    profiles: &[FlattenedProfile],
    sql: &str,
) -> Result<(), UpsertError> {
    let tx = conn.unchecked_transaction().map_err(classify)?;
    {
        let mut stmt = tx.prepare_cached(sql).map_err(classify)?;
        for p in profiles {
            stmt.execute(params![
                p.id,
                p.username,
                p.display_name,
                p.avatar_url,
                p.avatar_verified,
                p.followers,
                p.following,
                p.bio,
                p.referrer,
                format_ts(&p.updated_at),
                p.active_on_fc,
                p.link_in_bio_status,
            ])
            .map_err(classify)?;
        }
    }
    tx.commit().map_err(classify)
}

/// Look up a single profile by fid, including registration columns.
pub fn get_profile(conn: &Connection, id: i64) -> Result<Option<ProfileRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, display_name, avatar_url, avatar_verified, followers,
                following, bio, referrer, updated_at, active_on_fc, link_in_bio_status,
                owner, registered_at
         FROM profile WHERE id = ?1",
    )?;
    let result = stmt
        .query_row(params![id], |row| {
            Ok(ProfileRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar_url: row.get(3)?,
                avatar_verified: row.get(4)?,
                followers: row.get(5)?,
                following: row.get(6)?,
                bio: row.get(7)?,
                referrer: row.get(8)?,
                updated_at: parse_opt_ts(row, 9)?,
                active_on_fc: row.get(10)?,
                link_in_bio_status: row.get(11)?,
                owner: row.get(12)?,
                registered_at: parse_opt_ts(row, 13)?,
            })
        })
        .optional()?;
    Ok(result)
}

pub fn count_profiles(conn: &Connection) -> Result<i64> {
    let count = conn.query_row("SELECT COUNT(*) FROM profile", [], |row| row.get(0))?;
    Ok(count)
}

// --- Registrations ---

/// Create or update the profile row for a registered fid. The owner follows
/// the latest event; the first registration time is kept.
pub fn upsert_registration(conn: &Connection, registration: &Registration) -> Result<()> {
    conn.execute(
        "INSERT INTO profile (id, owner, registered_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            owner = excluded.owner,
            registered_at = COALESCE(profile.registered_at, excluded.registered_at)",
        params![
            registration.id,
            registration.owner,
            format_ts(&registration.registered_at),
        ],
    )
    .with_context(|| format!("Failed to record registration of fid {}", registration.id))?;
    Ok(())
}

// --- Conversions ---

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, UpsertError> {
    value
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| UpsertError::Other(e.into()))
}

fn from_json<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
