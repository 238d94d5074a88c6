// Postgres storage for casts, profiles and scan state.
//
// Queries are bound at runtime through sqlx-core, so building never needs a
// live DATABASE_URL. Timestamps are TIMESTAMPTZ and the nested cast payloads
// (mentions, embeds, tags) are JSONB; the SQLite backend stores both as TEXT.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::{PgRow, Postgres};

use super::models::{FlattenedCast, FlattenedProfile, ProfileRow, Registration};
use super::traits::{Database, UpsertError};

pub type PgPool = Pool<Postgres>;

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Open a pool and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Apply any migration whose version isn't recorded yet.
    ///
    /// Holds a session-level advisory lock for the whole sequence so two
    /// processes starting together don't apply the same migration twice.
    /// The lock lives on one dedicated connection; lock and unlock must run
    /// on the same backend session. The unlock runs even when a migration
    /// fails, and the migration error is the one surfaced.
    async fn run_migrations(&self) -> Result<()> {
        // ASCII "FCINDEXR" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x4643494E44455852_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let migrations = [(
                1,
                include_str!("../../migrations/postgres/0001_initial.sql"),
            )];

            for (version, sql) in migrations {
                let applied: bool = sqlx_core::query::query(
                    "SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1",
                )
                .bind(version)
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;

                if !applied {
                    // Each file records its own schema_version row, so the
                    // DDL and the bookkeeping commit together.
                    let mut tx = self.pool.begin().await?;
                    sqlx_core::raw_sql::raw_sql(sql).execute(&mut *tx).await?;
                    tx.commit()
                        .await
                        .with_context(|| format!("Migration v{version} failed"))?;
                }
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        migration_result?;
        unlock_result?;

        Ok(())
    }

    async fn write_profiles(
        &self,
        profiles: &[FlattenedProfile],
        on_conflict: &str,
    ) -> Result<(), UpsertError> {
        let sql = format!(
            "INSERT INTO profile (id, username, display_name, avatar_url, avatar_verified,
                followers, following, bio, referrer, updated_at, active_on_fc,
                link_in_bio_status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             {on_conflict}"
        );

        let mut tx = self.pool.begin().await.map_err(classify)?;
        for p in profiles {
            sqlx_core::query::query(&sql)
                .bind(p.id)
                .bind(&p.username)
                .bind(&p.display_name)
                .bind(&p.avatar_url)
                .bind(p.avatar_verified)
                .bind(p.followers)
                .bind(p.following)
                .bind(&p.bio)
                .bind(&p.referrer)
                .bind(p.updated_at)
                .bind(p.active_on_fc)
                .bind(p.link_in_bio_status)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }
}

/// Map a sqlx error to the batch engine's error type.
fn classify(err: sqlx_core::error::Error) -> UpsertError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_foreign_key_violation() {
            return UpsertError::ForeignKeyViolation(db_err.message().to_string());
        }
    }
    UpsertError::Other(err.into())
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<Value>, UpsertError> {
    value
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| UpsertError::Other(e.into()))
}

fn from_json<T: DeserializeOwned>(row: &PgRow, idx: usize) -> Result<Option<T>> {
    let value: Option<Value> = row.try_get(idx)?;
    value
        .map(serde_json::from_value)
        .transpose()
        .with_context(|| format!("Malformed JSON in column {idx}"))
}

const CAST_COLUMNS: &str = "hash, thread_hash, parent_hash, author_fid, author_username,
    author_display_name, author_pfp_url, author_pfp_verified, text, published_at,
    mentions, replies_count, reactions_count, recasts_count, watches_count, quote_count,
    parent_author_fid, parent_author_username, embeds, tags, deleted, engagement,
    author_active, follower_count, engagement_band, engagement_int";

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*)::bigint FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx_core::query::query("SELECT value FROM scan_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>(0)).transpose()?)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO scan_state (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT(key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx_core::query::query("SELECT key, value FROM scan_state ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| -> Result<(String, String)> { Ok((r.try_get(0)?, r.try_get(1)?)) })
            .collect()
    }

    async fn upsert_casts(&self, casts: &[FlattenedCast]) -> Result<(), UpsertError> {
        let sql = format!(
            "INSERT INTO casts ({CAST_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                     $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
             ON CONFLICT(hash) DO UPDATE SET
                thread_hash = EXCLUDED.thread_hash,
                parent_hash = EXCLUDED.parent_hash,
                author_fid = EXCLUDED.author_fid,
                author_username = EXCLUDED.author_username,
                author_display_name = EXCLUDED.author_display_name,
                author_pfp_url = EXCLUDED.author_pfp_url,
                author_pfp_verified = EXCLUDED.author_pfp_verified,
                text = EXCLUDED.text,
                published_at = EXCLUDED.published_at,
                mentions = EXCLUDED.mentions,
                replies_count = EXCLUDED.replies_count,
                reactions_count = EXCLUDED.reactions_count,
                recasts_count = EXCLUDED.recasts_count,
                watches_count = EXCLUDED.watches_count,
                quote_count = EXCLUDED.quote_count,
                parent_author_fid = EXCLUDED.parent_author_fid,
                parent_author_username = EXCLUDED.parent_author_username,
                embeds = EXCLUDED.embeds,
                tags = EXCLUDED.tags,
                deleted = EXCLUDED.deleted,
                engagement = EXCLUDED.engagement,
                author_active = EXCLUDED.author_active,
                follower_count = EXCLUDED.follower_count,
                engagement_band = EXCLUDED.engagement_band,
                engagement_int = EXCLUDED.engagement_int"
        );

        let mut tx = self.pool.begin().await.map_err(classify)?;
        for cast in casts {
            sqlx_core::query::query(&sql)
                .bind(&cast.hash)
                .bind(&cast.thread_hash)
                .bind(&cast.parent_hash)
                .bind(cast.author_fid)
                .bind(&cast.author_username)
                .bind(&cast.author_display_name)
                .bind(&cast.author_pfp_url)
                .bind(cast.author_pfp_verified)
                .bind(&cast.text)
                .bind(cast.published_at)
                .bind(to_json(cast.mentions.as_ref())?)
                .bind(cast.replies_count)
                .bind(cast.reactions_count)
                .bind(cast.recasts_count)
                .bind(cast.watches_count)
                .bind(cast.quote_count)
                .bind(cast.parent_author_fid)
                .bind(&cast.parent_author_username)
                .bind(to_json(cast.embeds.as_ref())?)
                .bind(to_json(cast.tags.as_ref())?)
                .bind(cast.deleted)
                .bind(cast.engagement)
                .bind(&cast.author_active)
                .bind(cast.follower_count)
                .bind(cast.engagement_band)
                .bind(cast.engagement_int)
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
        }
        tx.commit().await.map_err(classify)
    }

    async fn get_cast(&self, hash: &str) -> Result<Option<FlattenedCast>> {
        let row = sqlx_core::query::query(&format!(
            "SELECT {CAST_COLUMNS} FROM casts WHERE hash = $1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(FlattenedCast {
            hash: row.try_get(0)?,
            thread_hash: row.try_get(1)?,
            parent_hash: row.try_get(2)?,
            author_fid: row.try_get(3)?,
            author_username: row.try_get(4)?,
            author_display_name: row.try_get(5)?,
            author_pfp_url: row.try_get(6)?,
            author_pfp_verified: row.try_get(7)?,
            text: row.try_get(8)?,
            published_at: row.try_get(9)?,
            mentions: from_json(&row, 10)?,
            replies_count: row.try_get(11)?,
            reactions_count: row.try_get(12)?,
            recasts_count: row.try_get(13)?,
            watches_count: row.try_get(14)?,
            quote_count: row.try_get(15)?,
            parent_author_fid: row.try_get(16)?,
            parent_author_username: row.try_get(17)?,
            embeds: from_json(&row, 18)?,
            tags: from_json(&row, 19)?,
            deleted: row.try_get(20)?,
            engagement: row.try_get(21)?,
            author_active: row.try_get(22)?,
            follower_count: row.try_get(23)?,
            engagement_band: row.try_get(24)?,
            engagement_int: row.try_get(25)?,
        }))
    }

    async fn count_casts(&self) -> Result<i64> {
        let row = sqlx_core::query::query("SELECT COUNT(*)::bigint FROM casts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn upsert_profiles(&self, profiles: &[FlattenedProfile]) -> Result<(), UpsertError> {
        self.write_profiles(
            profiles,
            "ON CONFLICT(id) DO UPDATE SET
                username = EXCLUDED.username,
                display_name = EXCLUDED.display_name,
                avatar_url = EXCLUDED.avatar_url,
                avatar_verified = EXCLUDED.avatar_verified,
                followers = EXCLUDED.followers,
                following = EXCLUDED.following,
                bio = EXCLUDED.bio,
                referrer = EXCLUDED.referrer,
                updated_at = EXCLUDED.updated_at,
                active_on_fc = EXCLUDED.active_on_fc,
                link_in_bio_status = EXCLUDED.link_in_bio_status",
        )
        .await
    }

    async fn insert_profiles_if_absent(
        &self,
        profiles: &[FlattenedProfile],
    ) -> Result<(), UpsertError> {
        self.write_profiles(profiles, "ON CONFLICT(id) DO NOTHING")
            .await
    }

    async fn get_profile(&self, id: i64) -> Result<Option<ProfileRow>> {
        let row = sqlx_core::query::query(
            "SELECT id, username, display_name, avatar_url, avatar_verified, followers,
                    following, bio, referrer, updated_at, active_on_fc, link_in_bio_status,
                    owner, registered_at
             FROM profile WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(ProfileRow {
            id: row.try_get(0)?,
            username: row.try_get(1)?,
            display_name: row.try_get(2)?,
            avatar_url: row.try_get(3)?,
            avatar_verified: row.try_get(4)?,
            followers: row.try_get(5)?,
            following: row.try_get(6)?,
            bio: row.try_get(7)?,
            referrer: row.try_get(8)?,
            updated_at: row.try_get(9)?,
            active_on_fc: row.try_get(10)?,
            link_in_bio_status: row.try_get(11)?,
            owner: row.try_get(12)?,
            registered_at: row.try_get(13)?,
        }))
    }

    async fn count_profiles(&self) -> Result<i64> {
        let row = sqlx_core::query::query("SELECT COUNT(*)::bigint FROM profile")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn upsert_registration(&self, registration: &Registration) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO profile (id, owner, registered_at)
             VALUES ($1, $2, $3)
             ON CONFLICT(id) DO UPDATE SET
                owner = EXCLUDED.owner,
                registered_at = COALESCE(profile.registered_at, EXCLUDED.registered_at)",
        )
        .bind(registration.id)
        .bind(&registration.owner)
        .bind(registration.registered_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record registration of fid {}", registration.id))?;
        Ok(())
    }
}
