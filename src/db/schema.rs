// SQLite schema. Version 1 is the base DDL below; later versions are
// applied once each and recorded in `schema_version`.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create the base tables and apply pending migrations.
///
/// Idempotent, safe to call on every startup.
pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- One row per fid. Indexer columns come from recent-users; owner and
        -- registered_at come from on-chain registrations.
        CREATE TABLE IF NOT EXISTS profile (
            id INTEGER PRIMARY KEY,
            username TEXT,
            display_name TEXT,
            avatar_url TEXT,
            avatar_verified INTEGER NOT NULL DEFAULT 0,
            followers INTEGER,
            following INTEGER,
            bio TEXT,
            referrer TEXT,
            updated_at TEXT,                   -- RFC 3339, NULL for registration-only rows
            active_on_fc INTEGER,
            link_in_bio_status INTEGER,        -- 1 (best) to 7
            owner TEXT,                        -- custody address
            registered_at TEXT
        );

        CREATE TABLE IF NOT EXISTS casts (
            hash TEXT PRIMARY KEY,
            thread_hash TEXT NOT NULL,
            parent_hash TEXT,
            author_fid INTEGER NOT NULL REFERENCES profile(id),
            author_username TEXT,
            author_display_name TEXT,
            author_pfp_url TEXT,
            author_pfp_verified INTEGER NOT NULL DEFAULT 0,
            text TEXT NOT NULL,
            published_at TEXT NOT NULL,
            mentions TEXT,                     -- JSON array
            replies_count INTEGER NOT NULL DEFAULT 0,
            reactions_count INTEGER NOT NULL DEFAULT 0,
            recasts_count INTEGER NOT NULL DEFAULT 0,
            watches_count INTEGER NOT NULL DEFAULT 0,
            quote_count INTEGER NOT NULL DEFAULT 0,
            parent_author_fid INTEGER,
            parent_author_username TEXT,
            embeds TEXT,                       -- JSON object
            tags TEXT,                         -- JSON array
            deleted INTEGER NOT NULL DEFAULT 0,
            engagement REAL,                   -- NULL when unscored
            author_active TEXT,
            follower_count INTEGER,
            engagement_band INTEGER,
            engagement_int INTEGER
        );

        -- Resumable cursors and last-scanned block numbers
        CREATE TABLE IF NOT EXISTS scan_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_casts_author
            ON casts(author_fid);

        CREATE INDEX IF NOT EXISTS idx_casts_published
            ON casts(published_at);
        ",
    )
    .context("Failed to create database tables")?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [1],
    )?;

    // Migration v2: band lookups for the engagement feed.
    run_migration(conn, 2, |c| {
        c.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_casts_band ON casts(engagement_band, published_at);",
        )
    })?;

    Ok(())
}

/// Apply migration `version` unless `schema_version` already lists it.
fn run_migration<F>(conn: &Connection, version: i64, migrate: F) -> Result<()>
where
    F: FnOnce(&Connection) -> rusqlite::Result<()>,
{
    let already_applied: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM schema_version WHERE version = ?1",
        [version],
        |row| row.get(0),
    )?;

    if !already_applied {
        migrate(conn).with_context(|| format!("Migration v{version} failed"))?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
    }

    Ok(())
}

/// User tables present, reported by `fc-indexer init`.
pub fn table_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
