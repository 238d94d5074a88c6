// Unit tests for cast and profile scoring.
//
// Tests isolated pure functions: engagement score monotonicity, band
// boundaries, the author activity gate, link-in-bio rank priority, and the
// flattening of raw records into stored rows.

use chrono::{TimeZone, Utc};
use serde_json::json;

use fc_indexer::scoring::cast::{
    author_activity, engagement_band, engagement_score, flatten_cast, Interactions, ACTIVE_MARKER,
};
use fc_indexer::scoring::profile::{flatten_profile, link_in_bio_rank};
use fc_indexer::warpcast::types::{RawCast, RawUser};

fn raw_cast(value: serde_json::Value) -> RawCast {
    serde_json::from_value(value).unwrap()
}

fn base_cast() -> serde_json::Value {
    json!({
        "hash": "0xabc",
        "threadHash": "0xabc",
        "author": {
            "fid": 3,
            "username": "dwr",
            "followerCount": 1000,
            "activeOnFcNetwork": true
        },
        "text": "gm",
        "timestamp": 1709895503000_i64,
        "replies": {"count": 2},
        "reactions": {"count": 10},
        "recasts": {"count": 1},
        "watches": {"count": 0},
        "quoteCount": 1
    })
}

// ============================================================
// engagement_score: properties
// ============================================================

#[test]
fn engagement_is_non_increasing_in_followers() {
    let counts = Interactions {
        replies: 3,
        quotes: 1,
        recasts: 2,
        reactions: 9,
    };
    let mut previous = f64::INFINITY;
    for followers in [0, 1, 100, 9_000, 20_000, 60_000, 1_000_000] {
        let score = engagement_score(counts, Some(followers)).unwrap();
        assert!(score <= previous, "followers={followers}");
        previous = score;
    }
}

#[test]
fn engagement_is_non_decreasing_in_each_interaction() {
    let base = Interactions {
        replies: 1,
        quotes: 1,
        recasts: 1,
        reactions: 1,
    };
    let score = |c: Interactions| engagement_score(c, Some(5_000)).unwrap();

    assert!(score(Interactions { replies: 2, ..base }) >= score(base));
    assert!(score(Interactions { quotes: 2, ..base }) >= score(base));
    assert!(score(Interactions { recasts: 2, ..base }) >= score(base));
    assert!(score(Interactions { reactions: 2, ..base }) >= score(base));
}

#[test]
fn engagement_weights() {
    let counts = Interactions {
        replies: 1,
        quotes: 1,
        recasts: 1,
        reactions: 1,
    };
    // 4 + 2 + 2 + 1, no follower penalty
    assert_eq!(engagement_score(counts, Some(0)), Some(9.0));
}

#[test]
fn engagement_without_followers_is_unscored() {
    assert_eq!(engagement_score(Interactions::default(), None), None);
}

// ============================================================
// engagement_band: boundaries
// ============================================================

#[test]
fn band_examples() {
    assert_eq!(engagement_band(0.0), Some(0));
    assert_eq!(engagement_band(10.0), Some(2));
    assert_eq!(engagement_band(200.0), Some(4));
}

#[test]
fn band_is_minus_one_only_for_negative_scores() {
    assert_eq!(engagement_band(-0.001), Some(-1));
    assert_eq!(engagement_band(-500.0), Some(-1));
    assert_eq!(engagement_band(0.5), Some(0));
}

#[test]
fn band_exact_powers_of_five_move_up() {
    assert_eq!(engagement_band(1.0), Some(1));
    assert_eq!(engagement_band(4.999), Some(1));
    assert_eq!(engagement_band(5.0), Some(2));
    assert_eq!(engagement_band(125.0), Some(4));
}

// ============================================================
// author_activity
// ============================================================

#[test]
fn active_author_top_level_cast_is_active() {
    let cast = raw_cast(base_cast());
    assert_eq!(author_activity(&cast).as_deref(), Some(ACTIVE_MARKER));
}

#[test]
fn reply_to_known_parent_author_is_not_active() {
    let mut value = base_cast();
    value["parentAuthor"] = json!({"fid": 2, "username": "v"});
    assert_eq!(author_activity(&raw_cast(value)), None);
}

#[test]
fn reply_with_unknown_parent_fid_stays_active() {
    let mut value = base_cast();
    value["parentAuthor"] = json!({"username": "ghost"});
    assert_eq!(author_activity(&raw_cast(value)).as_deref(), Some(ACTIVE_MARKER));
}

#[test]
fn frame_embed_clears_activity() {
    let mut value = base_cast();
    value["embeds"] = json!({"urls": [{"openGraph": {"frame": {"version": "vNext"}}}]});
    assert_eq!(author_activity(&raw_cast(value)), None);
}

#[test]
fn missing_follower_count_clears_activity() {
    let mut value = base_cast();
    value["author"]
        .as_object_mut()
        .unwrap()
        .remove("followerCount");
    assert_eq!(author_activity(&raw_cast(value)), None);
}

// ============================================================
// flatten_cast
// ============================================================

#[test]
fn flatten_cast_scores_and_copies_fields() {
    let row = flatten_cast(raw_cast(base_cast()));
    // 2*4 + (1+1)*2 + 10 = 22 minus the 1000-follower penalty
    let expected = 22.0 - (1000.0 / 60000.0) * 3.0 - (1000.0 / 20000.0) * 2.0 - 1000.0 / 9000.0;

    assert_eq!(row.hash, "0xabc");
    assert_eq!(row.author_fid, 3);
    assert_eq!(row.replies_count, 2);
    assert_eq!(row.quote_count, 1);
    assert!(!row.deleted);
    assert_eq!(
        row.published_at,
        Utc.timestamp_millis_opt(1709895503000).unwrap()
    );
    assert!((row.engagement.unwrap() - expected).abs() < 1e-9);
    assert_eq!(row.engagement_band, Some(2));
    assert_eq!(row.engagement_int, Some(217));
    assert_eq!(row.author_active.as_deref(), Some(ACTIVE_MARKER));
}

#[test]
fn flatten_cast_without_followers_is_unscored_not_nan() {
    let mut value = base_cast();
    value["author"]
        .as_object_mut()
        .unwrap()
        .remove("followerCount");
    let row = flatten_cast(raw_cast(value));
    assert_eq!(row.engagement, None);
    assert_eq!(row.engagement_band, None);
    assert_eq!(row.engagement_int, None);
    assert_eq!(row.follower_count, None);
}

#[test]
fn flatten_cast_zero_followers_is_kept_as_zero() {
    let mut value = base_cast();
    value["author"]["followerCount"] = json!(0);
    let row = flatten_cast(raw_cast(value));
    assert_eq!(row.follower_count, Some(0));
    assert!(row.engagement.is_some());
}

// ============================================================
// link_in_bio_rank: priority order
// ============================================================

#[test]
fn rank_aggregator_beats_https_prefix() {
    assert_eq!(
        link_in_bio_rank(Some("check out linktr.ee/me and https://example.com")),
        Some(2)
    );
}

#[test]
fn rank_examples() {
    assert_eq!(link_in_bio_rank(Some("watch me on seemore.tv/alice")), Some(1));
    assert_eq!(link_in_bio_rank(Some("https://foo.com")), Some(3));
    assert_eq!(link_in_bio_rank(Some("http://foo.com")), Some(4));
    assert_eq!(link_in_bio_rank(Some("www.foo.com")), Some(5));
    assert_eq!(link_in_bio_rank(Some("building foo.com/app")), Some(6));
    assert_eq!(link_in_bio_rank(Some("building foo.com")), Some(7));
}

#[test]
fn rank_of_empty_or_missing_bio() {
    assert_eq!(link_in_bio_rank(Some("")), None);
    assert_eq!(link_in_bio_rank(None), None);
    assert_eq!(link_in_bio_rank(Some("just vibes")), None);
}

#[test]
fn rank_https_only_counts_at_start() {
    // Not a prefix and no www., so it falls through to the domain-with-path rule.
    assert_eq!(link_in_bio_rank(Some("site: https://foo.com/x")), Some(6));
}

// ============================================================
// flatten_profile
// ============================================================

#[test]
fn flatten_profile_maps_fields() {
    let user: RawUser = serde_json::from_value(json!({
        "fid": 42,
        "username": "alice",
        "displayName": "",
        "pfp": {"url": "https://i.imgur.com/a.png", "verified": true},
        "followerCount": 0,
        "followingCount": 7,
        "activeOnFcNetwork": false,
        "referrerUsername": "bob",
        "profile": {"bio": {"text": "https://alice.dev"}}
    }))
    .unwrap();
    let now = Utc::now();
    let row = flatten_profile(&user, now);

    assert_eq!(row.id, 42);
    assert_eq!(row.username.as_deref(), Some("alice"));
    assert_eq!(row.display_name, None);
    assert_eq!(row.avatar_url.as_deref(), Some("https://i.imgur.com/a.png"));
    assert!(row.avatar_verified);
    assert_eq!(row.followers, Some(0));
    assert_eq!(row.following, Some(7));
    assert_eq!(row.referrer.as_deref(), Some("bob"));
    assert_eq!(row.active_on_fc, Some(false));
    assert_eq!(row.link_in_bio_status, Some(3));
    assert_eq!(row.updated_at, now);
}

#[test]
fn flatten_placeholder_profile() {
    let row = flatten_profile(&RawUser::placeholder(9), Utc::now());
    assert_eq!(row.id, 9);
    assert_eq!(row.username, None);
    assert_eq!(row.followers, None);
    assert_eq!(row.bio, None);
    assert_eq!(row.link_in_bio_status, None);
    assert!(!row.avatar_verified);
}
