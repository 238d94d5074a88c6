// Scoring: pure transforms from raw API records to stored rows.
//
// Nothing in here does I/O. `cast` computes the engagement score, band and
// author-activity gate; `profile` computes the link-in-bio rank.

pub mod cast;
pub mod profile;
