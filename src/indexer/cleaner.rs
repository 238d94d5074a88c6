// Record cleaner: runs between the walker and the cast transform.
//
// Drops the synthetic recast records the feed interleaves with real posts
// and narrows mention objects down to the four fields we store.

use tracing::debug;

use crate::warpcast::types::RawCast;

/// Text prefix of synthetic recast markers.
pub const RECAST_PREFIX: &str = "recast:farcaster://";

/// True for recast markers. Only a prefix at position 0 counts.
pub fn is_synthetic_recast(cast: &RawCast) -> bool {
    cast.text.starts_with(RECAST_PREFIX)
}

/// Reduce every mention to fid, username, display name and pfp.
pub fn narrow_mentions(cast: &mut RawCast) {
    if let Some(mentions) = cast.mentions.as_mut() {
        for mention in mentions {
            mention.extra.clear();
        }
    }
}

/// Filter and normalize a page of raw casts.
pub fn clean_casts(casts: Vec<RawCast>) -> Vec<RawCast> {
    let total = casts.len();
    let cleaned: Vec<RawCast> = casts
        .into_iter()
        .filter(|c| !is_synthetic_recast(c))
        .map(|mut c| {
            narrow_mentions(&mut c);
            c
        })
        .collect();

    debug!(
        total = total,
        kept = cleaned.len(),
        dropped = total - cleaned.len(),
        "Cleaned casts"
    );
    cleaned
}
