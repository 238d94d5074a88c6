// Cast scoring: engagement score, engagement band and author activity.
//
// The engagement score rewards interactions and subtracts a penalty that
// grows with the author's follower count, so a cast from a small account
// with a few replies can outrank a big account's routine post:
//
//   engagement = replies*4 + (quotes + recasts)*2 + reactions
//              - (followers/60000)*3 - (followers/20000)*2 - followers/9000
//
// Without a follower count there is no meaningful penalty, so the cast is
// left unscored (engagement, int and band all None).

use crate::db::models::FlattenedCast;
use crate::warpcast::types::RawCast;

/// Marker stored in `author_active` for casts that pass the activity gate.
pub const ACTIVE_MARKER: &str = "active";

/// Interaction counts that feed the engagement score.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Interactions {
    pub replies: i64,
    pub quotes: i64,
    pub recasts: i64,
    pub reactions: i64,
}

impl Interactions {
    pub fn of(cast: &RawCast) -> Self {
        Self {
            replies: cast.replies.count,
            quotes: cast.quote_count,
            recasts: cast.recasts.count,
            reactions: cast.reactions.count,
        }
    }
}

/// Engagement score, or None if the follower count is unknown.
pub fn engagement_score(interactions: Interactions, follower_count: Option<i64>) -> Option<f64> {
    let followers = follower_count? as f64;
    let earned = interactions.replies as f64 * 4.0
        + (interactions.quotes + interactions.recasts) as f64 * 2.0
        + interactions.reactions as f64;
    Some(earned - (followers / 60000.0) * 3.0 - (followers / 20000.0) * 2.0 - followers / 9000.0)
}

/// Score scaled by 10 and rounded to the nearest integer, halves toward
/// positive infinity. Stored for indexed range queries.
pub fn engagement_int(score: f64) -> i64 {
    (score * 10.0 + 0.5).floor() as i64
}

/// Base-5 bucket of a score.
///
/// -1 for negative scores, otherwise the smallest `b >= 0` with
/// `score < 5^b`. NaN and infinite scores have no band.
pub fn engagement_band(score: f64) -> Option<i32> {
    if !score.is_finite() {
        return None;
    }
    if score < 0.0 {
        return Some(-1);
    }

    let mut band = 0;
    let mut threshold = 1.0_f64;
    while score >= threshold {
        band += 1;
        threshold *= 5.0;
    }
    Some(band)
}

/// Whether the cast counts toward the author's activity.
///
/// Applied as sequential overrides: an active author posting a top-level
/// cast (or a reply whose parent author is unknown) starts out active, then
/// a frame embed or a missing follower count knocks it back to None.
pub fn author_activity(cast: &RawCast) -> Option<String> {
    let mut active = None;

    let has_parent_author = cast
        .parent_author
        .as_ref()
        .is_some_and(|p| p.fid.is_some());
    if cast.author.active_on_fc_network == Some(true) && !has_parent_author {
        active = Some(ACTIVE_MARKER.to_string());
    }

    if cast.embeds.as_ref().is_some_and(|e| e.first_url_is_frame()) {
        active = None;
    }

    if cast.author.follower_count.is_none() {
        active = None;
    }

    active
}

/// Flatten a cleaned cast into its stored row.
pub fn flatten_cast(cast: RawCast) -> FlattenedCast {
    let engagement = engagement_score(Interactions::of(&cast), cast.author.follower_count);
    let author_active = author_activity(&cast);

    let (parent_author_fid, parent_author_username) = match cast.parent_author {
        Some(parent) => (parent.fid, non_empty(parent.username)),
        None => (None, None),
    };
    let (author_pfp_url, author_pfp_verified) = match cast.author.pfp {
        Some(pfp) => (non_empty(pfp.url), pfp.verified),
        None => (None, false),
    };

    FlattenedCast {
        hash: cast.hash,
        thread_hash: cast.thread_hash,
        parent_hash: non_empty(cast.parent_hash),
        author_fid: cast.author.fid,
        author_username: non_empty(cast.author.username),
        author_display_name: cast.author.display_name,
        author_pfp_url,
        author_pfp_verified,
        text: cast.text,
        published_at: cast.timestamp,
        mentions: cast.mentions,
        replies_count: cast.replies.count,
        reactions_count: cast.reactions.count,
        recasts_count: cast.recasts.count,
        watches_count: cast.watches.count,
        quote_count: cast.quote_count,
        parent_author_fid,
        parent_author_username,
        embeds: cast.embeds,
        tags: cast.tags,
        deleted: false,
        engagement,
        author_active,
        follower_count: cast.author.follower_count,
        engagement_band: engagement.and_then(engagement_band),
        engagement_int: engagement.map(engagement_int),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engagement_int_rounds_half_up() {
        assert_eq!(engagement_int(1.25), 13);
        assert_eq!(engagement_int(-0.25), -2);
        assert_eq!(engagement_int(0.0), 0);
    }

    #[test]
    fn band_of_non_finite_scores() {
        assert_eq!(engagement_band(f64::NAN), None);
        assert_eq!(engagement_band(f64::INFINITY), None);
        assert_eq!(engagement_band(f64::NEG_INFINITY), None);
    }

    #[test]
    fn band_boundaries() {
        assert_eq!(engagement_band(0.999), Some(0));
        assert_eq!(engagement_band(1.0), Some(1));
        assert_eq!(engagement_band(4.999), Some(1));
        assert_eq!(engagement_band(5.0), Some(2));
        assert_eq!(engagement_band(25.0), Some(3));
    }
}
