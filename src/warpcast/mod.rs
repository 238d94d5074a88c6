// Warpcast API client: recent casts and recent users, page by page.
//
// Each submodule handles one concern of talking to the remote API. The
// walker in `indexer::pagination` drives the feeds defined in `client`.

pub mod client;
pub mod rate_limit;
pub mod types;
