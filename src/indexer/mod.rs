// Indexing pipeline: walk a paginated feed, clean and score what it
// returns, write it in chunks.

pub mod batch;
pub mod casts;
pub mod cleaner;
pub mod gap_fill;
pub mod pagination;
pub mod profiles;
