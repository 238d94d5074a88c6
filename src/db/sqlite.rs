// SQLite storage behind the Database trait.
//
// rusqlite's Connection is not Sync, so it sits in a tokio Mutex. Every
// method locks, runs the synchronous query from `queries`, and releases
// before returning; nothing awaits while holding the lock.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{FlattenedCast, FlattenedProfile, ProfileRow, Registration};
use super::queries;
use super::traits::{Database, UpsertError};

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Take ownership of a configured, migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        queries::get_scan_state(&conn, key)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::set_scan_state(&conn, key, value)
    }

    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        queries::get_all_scan_state(&conn)
    }

    async fn upsert_casts(&self, casts: &[FlattenedCast]) -> Result<(), UpsertError> {
        let conn = self.conn.lock().await;
        queries::upsert_casts(&conn, casts)
    }

    async fn get_cast(&self, hash: &str) -> Result<Option<FlattenedCast>> {
        let conn = self.conn.lock().await;
        queries::get_cast(&conn, hash)
    }

    async fn count_casts(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::count_casts(&conn)
    }

    async fn upsert_profiles(&self, profiles: &[FlattenedProfile]) -> Result<(), UpsertError> {
        let conn = self.conn.lock().await;
        queries::upsert_profiles(&conn, profiles)
    }

    async fn insert_profiles_if_absent(
        &self,
        profiles: &[FlattenedProfile],
    ) -> Result<(), UpsertError> {
        let conn = self.conn.lock().await;
        queries::insert_profiles_if_absent(&conn, profiles)
    }

    async fn get_profile(&self, id: i64) -> Result<Option<ProfileRow>> {
        let conn = self.conn.lock().await;
        queries::get_profile(&conn, id)
    }

    async fn count_profiles(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        queries::count_profiles(&conn)
    }

    async fn upsert_registration(&self, registration: &Registration) -> Result<()> {
        let conn = self.conn.lock().await;
        queries::upsert_registration(&conn, registration)
    }
}
