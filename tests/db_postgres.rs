//! PgDatabase against a live server. Built only with the `postgres`
//! feature; every test returns early unless DATABASE_URL is a postgres URL.
//!
//!   DATABASE_URL=postgres://fc:fc@localhost/fc_indexer_test \
//!     cargo test --features postgres --test db_postgres

#![cfg(feature = "postgres")]

use chrono::{TimeZone, Utc};

use fc_indexer::db::models::{FlattenedCast, FlattenedProfile, Registration};
use fc_indexer::db::UpsertError;

/// Fids and hashes used here sit far above anything real.
const TEST_FID: i64 = 900_000_001;
const MISSING_FID: i64 = 900_000_999;

/// The test database URL, or None to skip.
fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL")
        .ok()
        .filter(|u| u.starts_with("postgres://") || u.starts_with("postgresql://"))
}

/// Remove rows these tests write. Runs first in each writing test so an
/// aborted earlier run can't leave state behind.
async fn cleanup_test_data(url: &str) {
    use sqlx_core::pool::Pool;
    use sqlx_postgres::Postgres;

    let pool = Pool::<Postgres>::connect(url).await.unwrap();

    sqlx_core::query::query("DELETE FROM scan_state WHERE key = 'test_cursor'")
        .execute(&pool)
        .await
        .unwrap();

    sqlx_core::query::query("DELETE FROM casts WHERE hash LIKE '0xpgtest%'")
        .execute(&pool)
        .await
        .unwrap();

    sqlx_core::query::query("DELETE FROM profile WHERE id >= 900000000")
        .execute(&pool)
        .await
        .unwrap();
}

fn profile(id: i64, username: Option<&str>) -> FlattenedProfile {
    FlattenedProfile {
        id,
        username: username.map(str::to_string),
        display_name: None,
        avatar_url: None,
        avatar_verified: false,
        followers: username.map(|_| 12),
        following: None,
        bio: None,
        referrer: None,
        updated_at: Utc::now(),
        active_on_fc: None,
        link_in_bio_status: None,
    }
}

fn cast(hash: &str, author_fid: i64) -> FlattenedCast {
    FlattenedCast {
        hash: hash.to_string(),
        thread_hash: hash.to_string(),
        parent_hash: None,
        author_fid,
        author_username: Some("pgtest".into()),
        author_display_name: None,
        author_pfp_url: None,
        author_pfp_verified: false,
        text: "gm".into(),
        published_at: Utc.timestamp_millis_opt(1709895503000).unwrap(),
        mentions: None,
        replies_count: 1,
        reactions_count: 2,
        recasts_count: 0,
        watches_count: 0,
        quote_count: 0,
        parent_author_fid: None,
        parent_author_username: None,
        embeds: None,
        tags: None,
        deleted: false,
        engagement: None,
        author_active: None,
        follower_count: None,
        engagement_band: None,
        engagement_int: None,
    }
}

#[tokio::test]
async fn test_pg_scan_state_roundtrip() {
    let Some(url) = database_url() else {
        return;
    };
    cleanup_test_data(&url).await;
    let db = fc_indexer::db::connect_postgres(&url).await.unwrap();

    db.set_scan_state("test_cursor", "abc123").await.unwrap();
    let val = db.get_scan_state("test_cursor").await.unwrap();
    assert_eq!(val, Some("abc123".to_string()));

    // Upsert overwrites
    db.set_scan_state("test_cursor", "def456").await.unwrap();
    let val = db.get_scan_state("test_cursor").await.unwrap();
    assert_eq!(val, Some("def456".to_string()));
}

#[tokio::test]
async fn test_pg_migrations_are_rerunnable() {
    let Some(url) = database_url() else {
        return;
    };
    let first = fc_indexer::db::connect_postgres(&url).await.unwrap();
    let second = fc_indexer::db::connect_postgres(&url).await.unwrap();
    assert!(first.table_count().await.unwrap() >= 4);
    assert_eq!(
        first.table_count().await.unwrap(),
        second.table_count().await.unwrap()
    );
}

#[tokio::test]
async fn test_pg_cast_upsert_and_fk_violation() {
    let Some(url) = database_url() else {
        return;
    };
    cleanup_test_data(&url).await;
    let db = fc_indexer::db::connect_postgres(&url).await.unwrap();

    db.upsert_profiles(&[profile(TEST_FID, Some("pgtest"))])
        .await
        .unwrap();

    let row = cast("0xpgtest01", TEST_FID);
    db.upsert_casts(&[row.clone()]).await.unwrap();
    db.upsert_casts(&[row.clone()]).await.unwrap();
    let stored = db.get_cast("0xpgtest01").await.unwrap().unwrap();
    assert_eq!(stored.author_fid, TEST_FID);
    assert_eq!(stored.published_at, row.published_at);
    assert_eq!(stored.engagement, None);

    // One bad row fails the whole chunk and is classified as referential.
    let err = db
        .upsert_casts(&[cast("0xpgtest02", TEST_FID), cast("0xpgtest03", MISSING_FID)])
        .await
        .unwrap_err();
    assert!(matches!(err, UpsertError::ForeignKeyViolation(_)));
    assert!(db.get_cast("0xpgtest02").await.unwrap().is_none());
}

#[tokio::test]
async fn test_pg_placeholders_and_registrations() {
    let Some(url) = database_url() else {
        return;
    };
    cleanup_test_data(&url).await;
    let db = fc_indexer::db::connect_postgres(&url).await.unwrap();

    let registered_at = Utc.timestamp_millis_opt(1700000000000).unwrap();
    db.upsert_registration(&Registration {
        id: TEST_FID,
        owner: "0xowner".into(),
        registered_at,
    })
    .await
    .unwrap();

    db.upsert_profiles(&[profile(TEST_FID, Some("pgtest"))])
        .await
        .unwrap();
    // A placeholder for an existing id is ignored.
    db.insert_profiles_if_absent(&[profile(TEST_FID, None)])
        .await
        .unwrap();

    let row = db.get_profile(TEST_FID).await.unwrap().unwrap();
    assert_eq!(row.username.as_deref(), Some("pgtest"));
    assert_eq!(row.followers, Some(12));
    assert_eq!(row.owner.as_deref(), Some("0xowner"));
    assert_eq!(row.registered_at, Some(registered_at));

    // Replaying the registration keeps the first timestamp.
    db.upsert_registration(&Registration {
        id: TEST_FID,
        owner: "0xnewowner".into(),
        registered_at: Utc::now(),
    })
    .await
    .unwrap();
    let row = db.get_profile(TEST_FID).await.unwrap().unwrap();
    assert_eq!(row.owner.as_deref(), Some("0xnewowner"));
    assert_eq!(row.registered_at, Some(registered_at));
}
