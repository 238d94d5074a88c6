// Storage interface shared by the SQLite and Postgres backends.
//
// Async throughout: SqliteDatabase does blocking work under a mutex,
// PgDatabase awaits sqlx directly. Callers hold an `Arc<dyn Database>`.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{FlattenedCast, FlattenedProfile, ProfileRow, Registration};

/// Failure of one chunked write.
///
/// The batch engine needs to tell referential failures apart from
/// everything else, so backends classify their native errors into this.
#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    /// A row referenced a parent that doesn't exist (e.g. a cast whose
    /// author profile hasn't been indexed yet).
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    /// Tables created by migrations.
    async fn table_count(&self) -> Result<i64>;

    // --- Scan state ---

    /// Get a scan state value by key (e.g., "casts_backfill_cursor").
    async fn get_scan_state(&self, key: &str) -> Result<Option<String>>;

    /// Insert or overwrite a scan state value.
    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()>;

    /// Every scan state entry as (key, value), ordered by key.
    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>>;

    // --- Casts ---

    /// Upsert one chunk of casts by hash, in a single transaction.
    async fn upsert_casts(&self, casts: &[FlattenedCast]) -> Result<(), UpsertError>;

    async fn get_cast(&self, hash: &str) -> Result<Option<FlattenedCast>>;

    async fn count_casts(&self) -> Result<i64>;

    // --- Profiles ---

    /// Upsert one chunk of profiles by id, in a single transaction.
    /// Registration columns are left untouched.
    async fn upsert_profiles(&self, profiles: &[FlattenedProfile]) -> Result<(), UpsertError>;

    /// Insert profiles whose id isn't present yet; existing rows win.
    async fn insert_profiles_if_absent(
        &self,
        profiles: &[FlattenedProfile],
    ) -> Result<(), UpsertError>;

    async fn get_profile(&self, id: i64) -> Result<Option<ProfileRow>>;

    async fn count_profiles(&self) -> Result<i64>;

    // --- Registrations ---

    /// Record an on-chain registration. Idempotent: replaying the same event
    /// updates the owner and keeps the first registration time.
    async fn upsert_registration(&self, registration: &Registration) -> Result<()>;
}
