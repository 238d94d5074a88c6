// System status display: row counts, stored cursors, last scanned block.

use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;

use crate::chain::registrations::LAST_BLOCK_KEY;
use crate::db::Database;
use crate::indexer::casts::CAST_CURSOR_KEY;

/// Print storage location, row counts and sync positions.
///
/// `sqlite_path` is the database file when running on SQLite, or None for
/// Postgres.
pub async fn show(db: &Arc<dyn Database>, sqlite_path: Option<&str>) -> Result<()> {
    match sqlite_path {
        Some(path) => {
            let file_size = std::fs::metadata(path)
                .map(|m| format_bytes(m.len()))
                .unwrap_or_else(|_| "unknown".to_string());
            println!("Database: {} ({})", path, file_size);
        }
        None => println!("Database: PostgreSQL"),
    }

    println!("Casts indexed: {}", db.count_casts().await?);
    println!("Profiles: {}", db.count_profiles().await?);

    let state = db.get_all_scan_state().await?;
    let lookup = |key: &str| {
        state
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    };

    match lookup(CAST_CURSOR_KEY) {
        Some(cursor) => println!("Backfill cursor: {}", cursor),
        None => println!("Backfill cursor: {}", "none".dimmed()),
    }
    match lookup(LAST_BLOCK_KEY) {
        Some(block) => println!("Registrations synced through block: {}", block),
        None => {
            println!("Registrations: {}", "never synced".dimmed());
            println!("  Run `fc-indexer registrations` to catch up");
        }
    }

    Ok(())
}

/// Whether the SQLite file exists yet.
pub fn sqlite_initialized(path: &str) -> bool {
    Path::new(path).exists()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
