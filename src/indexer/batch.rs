// Batch upsert engine.
//
// Splits a collection of rows into ordered, contiguous chunks and upserts
// them one chunk at a time. Each chunk is its own transaction, so a run that
// dies mid-batch only loses the chunk in flight.
//
// Failure policy is asymmetric: a foreign-key violation (a cast whose
// author profile hasn't been indexed yet) skips that chunk and moves on,
// while any other error aborts the whole batch.

use std::future::Future;
use std::ops::Range;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::db::UpsertError;

/// Rows per chunk when writing casts.
pub const CAST_CHUNK_SIZE: usize = 1000;

/// Rows per chunk when writing profiles.
pub const PROFILE_CHUNK_SIZE: usize = 500;

/// Outcome of one chunked upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub chunks: usize,
    pub upserted: usize,
    /// Zero-based indexes of chunks skipped on a referential violation.
    pub skipped_chunks: Vec<usize>,
    pub skipped_rows: usize,
}

/// Contiguous ranges of at most `chunk_size` covering `0..len`.
pub fn chunk_ranges(len: usize, chunk_size: usize) -> Vec<Range<usize>> {
    let size = chunk_size.max(1);
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Upsert `len` rows in chunks of `chunk_size`, in order.
///
/// `upsert` receives the index range of each chunk and writes those rows.
/// `table` only labels log lines.
pub async fn upsert_in_chunks<F, Fut>(
    table: &str,
    len: usize,
    chunk_size: usize,
    mut upsert: F,
) -> Result<BatchReport>
where
    F: FnMut(Range<usize>) -> Fut,
    Fut: Future<Output = Result<(), UpsertError>>,
{
    let ranges = chunk_ranges(len, chunk_size);
    let total = ranges.len();
    let mut report = BatchReport {
        chunks: total,
        ..BatchReport::default()
    };
    info!(table = table, rows = len, chunks = total, "Upserting in chunks");

    for (index, range) in ranges.into_iter().enumerate() {
        let rows = range.len();
        let remaining = total - index - 1;

        match upsert(range).await {
            Ok(()) => {
                report.upserted += rows;
                info!(table = table, chunk = index, remaining = remaining, "Chunk upserted");
            }
            Err(UpsertError::ForeignKeyViolation(detail)) => {
                report.skipped_chunks.push(index);
                report.skipped_rows += rows;
                warn!(
                    table = table,
                    chunk = index,
                    remaining = remaining,
                    rows = rows,
                    error = %detail,
                    "Skipping chunk after foreign key violation"
                );
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to upsert {table} chunk {index} ({remaining} chunks left)")
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ranges_exact_multiple() {
        assert_eq!(chunk_ranges(1000, 500), vec![0..500, 500..1000]);
    }

    #[test]
    fn chunk_ranges_empty_input() {
        assert!(chunk_ranges(0, 1000).is_empty());
    }

    #[test]
    fn chunk_ranges_zero_size_is_treated_as_one() {
        assert_eq!(chunk_ranges(3, 0), vec![0..1, 1..2, 2..3]);
    }

    #[tokio::test]
    async fn empty_batch_never_calls_upsert() {
        let mut calls = 0;
        let report = upsert_in_chunks("casts", 0, 1000, |_| {
            calls += 1;
            std::future::ready(Ok(()))
        })
        .await
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(report, BatchReport::default());
    }
}
