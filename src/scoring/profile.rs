// Profile flattening and link-in-bio ranking.
//
// The rank classifies how a user's bio links out, best first:
//   1  seemore.tv
//   2  a known link aggregator (linktr.ee, bio.link, ...)
//   3  starts with https://
//   4  starts with http://
//   5  contains www.
//   6  bare domain with a path (example.com/x)
//   7  bare domain
// First match wins.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;

use crate::db::models::FlattenedProfile;
use crate::warpcast::types::RawUser;

/// Link-in-bio aggregator domains (rank 2).
pub const LINK_AGGREGATORS: [&str; 17] = [
    "linktr.ee",
    "bio.link",
    "bio.site",
    "msha.ke",
    "beacons.ai",
    "bento.me",
    "nf.td",
    "lnk.to",
    "likeshop.me",
    "github.io",
    "komi.io",
    "lnk.bio",
    "linkin.bio",
    "stan.store",
    "withkoji.com",
    "feedlink.io",
    "taplink.cc",
];

static DOMAIN_WITH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z0-9.-]+\.[a-z]{2,}/\S+").expect("static regex is valid")
});

static BARE_DOMAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-z0-9.-]+\.[a-z]{2,}\b").expect("static regex is valid"));

/// Rank the links in a bio, or None if it has none we recognize.
pub fn link_in_bio_rank(bio: Option<&str>) -> Option<i32> {
    let text = bio.filter(|t| !t.is_empty())?;

    if text.contains("seemore.tv") {
        Some(1)
    } else if LINK_AGGREGATORS.iter().any(|domain| text.contains(domain)) {
        Some(2)
    } else if text.starts_with("https://") {
        Some(3)
    } else if text.starts_with("http://") {
        Some(4)
    } else if text.contains("www.") {
        Some(5)
    } else if DOMAIN_WITH_PATH.is_match(text) {
        Some(6)
    } else if BARE_DOMAIN.is_match(text) {
        Some(7)
    } else {
        None
    }
}

/// Flatten a user into its stored profile row, stamped with `updated_at`.
///
/// Empty strings are stored as NULL. A placeholder user (fid only) yields a
/// row with every other column NULL or false.
pub fn flatten_profile(user: &RawUser, updated_at: DateTime<Utc>) -> FlattenedProfile {
    let bio = user.bio_text().filter(|t| !t.is_empty());

    FlattenedProfile {
        id: user.fid,
        username: non_empty(user.username.as_deref()),
        display_name: non_empty(user.display_name.as_deref()),
        avatar_url: user
            .pfp
            .as_ref()
            .and_then(|p| non_empty(p.url.as_deref())),
        avatar_verified: user.pfp.as_ref().is_some_and(|p| p.verified),
        followers: user.follower_count,
        following: user.following_count,
        bio: bio.map(str::to_string),
        referrer: non_empty(user.referrer_username.as_deref()),
        updated_at,
        active_on_fc: user.active_on_fc_network,
        link_in_bio_status: link_in_bio_rank(bio),
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}
