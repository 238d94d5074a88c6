// Serde types for the Warpcast `recent-casts` / `recent-users` payloads.
//
// Upstream records are heavily optional. Nested objects that we re-store
// verbatim (mentions, embeds) keep their unknown fields in a flattened map
// so nothing is lost on the way to the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::indexer::pagination::Cursor;

/// Top-level response envelope shared by both endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub result: PageResult,
    pub next: Option<NextPage>,
}

impl PageEnvelope {
    /// The cursor for the following page. An empty token means the same as
    /// no token at all.
    pub fn next_cursor(&self) -> Option<Cursor> {
        self.next
            .as_ref()
            .and_then(|n| n.cursor.clone())
            .filter(|c| !c.as_str().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageResult {
    /// Left undecoded so one malformed record can be dropped on its own.
    pub casts: Option<Vec<Value>>,
    pub users: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextPage {
    pub cursor: Option<Cursor>,
}

/// A post as returned by `recent-casts`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCast {
    pub hash: String,
    pub thread_hash: String,
    pub parent_hash: Option<String>,
    pub author: RawUser,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub mentions: Option<Vec<RawMention>>,
    #[serde(default)]
    pub replies: Counter,
    #[serde(default)]
    pub reactions: Counter,
    #[serde(default)]
    pub recasts: Counter,
    #[serde(default)]
    pub watches: Counter,
    #[serde(default)]
    pub quote_count: i64,
    pub parent_author: Option<ParentAuthor>,
    pub embeds: Option<Embeds>,
    pub tags: Option<Vec<Value>>,
}

/// `{ "count": n, ... }` wrapper used for replies, reactions, recasts and watches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
pub struct Counter {
    #[serde(default)]
    pub count: i64,
}

/// A user, either as a cast author or as a `recent-users` entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    pub fid: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub pfp: Option<RawPfp>,
    pub follower_count: Option<i64>,
    pub following_count: Option<i64>,
    pub active_on_fc_network: Option<bool>,
    pub referrer_username: Option<String>,
    pub profile: Option<RawProfileBody>,
}

impl RawUser {
    /// A user known only by fid. Used to fill gaps in the `recent-users` feed.
    pub fn placeholder(fid: i64) -> Self {
        Self {
            fid,
            ..Self::default()
        }
    }

    pub fn bio_text(&self) -> Option<&str> {
        self.profile
            .as_ref()
            .and_then(|p| p.bio.as_ref())
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawPfp {
    pub url: Option<String>,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawProfileBody {
    pub bio: Option<RawBio>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RawBio {
    pub text: Option<String>,
}

/// A mentioned user. The cleaner strips everything except fid, username,
/// display name and pfp before storage.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMention {
    pub fid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pfp: Option<RawPfp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParentAuthor {
    pub fid: Option<i64>,
    pub username: Option<String>,
}

/// Structured embed payload. Only the URL previews are inspected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Embeds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<EmbedUrl>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Embeds {
    /// True when the first embedded URL's preview carries a frame marker.
    pub fn first_url_is_frame(&self) -> bool {
        self.urls
            .as_deref()
            .and_then(|urls| urls.first())
            .and_then(|url| url.open_graph.as_ref())
            .is_some_and(|og| og.frame.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedUrl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_graph: Option<OpenGraph>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OpenGraph {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
