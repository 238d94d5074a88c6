// Row models for the tables the indexer writes.
//
// These are the flattened projections the indexer writes. They're separate
// from the storage backends so the scoring code can build them without
// depending on rusqlite or sqlx.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::warpcast::types::{Embeds, RawMention};

/// A cast as stored in the `casts` table. Keyed on `hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenedCast {
    pub hash: String,
    pub thread_hash: String,
    pub parent_hash: Option<String>,
    pub author_fid: i64,
    pub author_username: Option<String>,
    pub author_display_name: Option<String>,
    pub author_pfp_url: Option<String>,
    pub author_pfp_verified: bool,
    pub text: String,
    pub published_at: DateTime<Utc>,
    pub mentions: Option<Vec<RawMention>>,
    pub replies_count: i64,
    pub reactions_count: i64,
    pub recasts_count: i64,
    pub watches_count: i64,
    pub quote_count: i64,
    pub parent_author_fid: Option<i64>,
    pub parent_author_username: Option<String>,
    pub embeds: Option<Embeds>,
    pub tags: Option<Vec<Value>>,
    /// Always false at insert time.
    pub deleted: bool,
    /// None when the author's follower count is unknown ("unscored").
    pub engagement: Option<f64>,
    /// `"active"` or None.
    pub author_active: Option<String>,
    pub follower_count: Option<i64>,
    pub engagement_band: Option<i32>,
    pub engagement_int: Option<i64>,
}

/// A profile as written by the indexer. Keyed on `id` (the fid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenedProfile {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_verified: bool,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub bio: Option<String>,
    pub referrer: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub active_on_fc: Option<bool>,
    /// 1-7 link quality rank of the bio, see `scoring::profile::link_in_bio_rank`.
    pub link_in_bio_status: Option<i32>,
}

/// An id registration observed on chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: i64,
    pub owner: String,
    pub registered_at: DateTime<Utc>,
}

/// A full `profile` row as read back: indexer columns plus the columns
/// owned by registration sync. Rows created only by a registration have
/// no `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub avatar_verified: bool,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub bio: Option<String>,
    pub referrer: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub active_on_fc: Option<bool>,
    pub link_in_bio_status: Option<i32>,
    pub owner: Option<String>,
    pub registered_at: Option<DateTime<Utc>>,
}
