// fc-indexer: incremental Farcaster indexing
//
// This is the library root. Each module corresponds to a stage of the
// indexing pipeline or one of the systems it talks to.

pub mod chain;
pub mod config;
pub mod db;
pub mod indexer;
pub mod scheduler;
pub mod scoring;
pub mod status;
pub mod warpcast;
