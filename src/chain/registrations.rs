// Registration sync: id registry events -> profile rows.
//
// Catch-up and live polling are the same operation run at different times:
// read events from the last scanned block up to the head and upsert one
// row per event. The upsert is keyed on fid, so a range scanned twice or an
// event seen by both paths is harmless.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::rpc::{LogSource, RegisterEvent};
use crate::db::models::Registration;
use crate::db::Database;

/// scan_state key holding the last block whose events have been applied.
pub const LAST_BLOCK_KEY: &str = "last_registration_block";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUpSummary {
    /// First and last block scanned, or None when already at the head.
    pub scanned: Option<(u64, u64)>,
    pub ranges: usize,
    pub events: usize,
}

/// The last block recorded by a previous sync.
pub async fn last_synced_block(db: &dyn Database) -> Result<Option<u64>> {
    db.get_scan_state(LAST_BLOCK_KEY)
        .await?
        .map(|value| {
            value
                .parse::<u64>()
                .with_context(|| format!("Invalid {LAST_BLOCK_KEY} value {value:?}"))
        })
        .transpose()
}

/// Upsert the profile row for one event.
pub async fn apply_event(db: &dyn Database, event: &RegisterEvent) -> Result<()> {
    debug!(fid = event.id, owner = %event.to, block = event.block_number, "Registration");
    db.upsert_registration(&Registration {
        id: event.id,
        owner: event.to.clone(),
        registered_at: Utc::now(),
    })
    .await
}

/// Apply every registration between the last synced block (or
/// `start_block` on a fresh database) and the current head, `range`
/// blocks per request. Progress is saved after each range.
pub async fn catch_up<L>(
    source: &L,
    db: &dyn Database,
    start_block: u64,
    range: u64,
) -> Result<CatchUpSummary>
where
    L: LogSource + ?Sized,
{
    let head = source
        .latest_block()
        .await
        .context("Failed to read chain head")?;
    let from = match last_synced_block(db).await? {
        Some(last) => last.saturating_add(1),
        None => start_block,
    };

    let mut summary = CatchUpSummary::default();
    if from > head {
        debug!(head = head, "Registrations already up to date");
        return Ok(summary);
    }

    let step = range.max(1);
    info!(from = from, head = head, "Scanning registrations");

    let mut block = from;
    while block <= head {
        let end = block.saturating_add(step - 1).min(head);
        let events = source
            .register_events(block, end)
            .await
            .with_context(|| format!("Failed to read registrations in blocks {block}..={end}"))?;

        for event in &events {
            apply_event(db, event).await?;
        }
        db.set_scan_state(LAST_BLOCK_KEY, &end.to_string()).await?;

        summary.ranges += 1;
        summary.events += events.len();
        block = end + 1;
    }

    summary.scanned = Some((from, head));
    info!(
        events = summary.events,
        ranges = summary.ranges,
        head = head,
        "Registration catch-up finished"
    );
    Ok(summary)
}

/// Poll for new registrations every `interval`, forever.
///
/// A failed poll is logged and retried on the next tick; progress is only
/// saved for ranges that were fully applied.
pub async fn watch<L>(
    source: &L,
    db: &dyn Database,
    start_block: u64,
    range: u64,
    interval: Duration,
) where
    L: LogSource + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "Watching for new registrations");

    loop {
        ticker.tick().await;
        match catch_up(source, db, start_block, range).await {
            Ok(summary) if summary.events > 0 => {
                info!(events = summary.events, "New users registered");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Registration poll failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fixed chain: events at known blocks, records every range requested.
    struct FakeChain {
        head: u64,
        events: Vec<RegisterEvent>,
        requested: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl LogSource for FakeChain {
        async fn latest_block(&self) -> Result<u64> {
            Ok(self.head)
        }

        async fn register_events(&self, from: u64, to: u64) -> Result<Vec<RegisterEvent>> {
            self.requested.lock().unwrap().push((from, to));
            Ok(self
                .events
                .iter()
                .filter(|e| (from..=to).contains(&e.block_number))
                .cloned()
                .collect())
        }
    }

    fn event(id: i64, block_number: u64) -> RegisterEvent {
        RegisterEvent {
            to: format!("0x{id:040x}"),
            id,
            block_number,
        }
    }

    #[tokio::test]
    async fn catch_up_scans_in_ranges_and_saves_progress() {
        let db = crate::db::in_memory().unwrap();
        let chain = FakeChain {
            head: 25,
            events: vec![event(1, 10), event(2, 12), event(3, 24)],
            requested: Mutex::new(Vec::new()),
        };

        let summary = catch_up(&chain, db.as_ref(), 10, 10).await.unwrap();
        assert_eq!(summary.scanned, Some((10, 25)));
        assert_eq!(summary.events, 3);
        assert_eq!(
            *chain.requested.lock().unwrap(),
            vec![(10, 19), (20, 25)]
        );
        assert_eq!(last_synced_block(db.as_ref()).await.unwrap(), Some(25));

        let row = db.get_profile(3).await.unwrap().unwrap();
        assert_eq!(row.owner.as_deref(), Some(event(3, 24).to.as_str()));
    }

    #[tokio::test]
    async fn second_catch_up_resumes_after_last_block() {
        let db = crate::db::in_memory().unwrap();
        db.set_scan_state(LAST_BLOCK_KEY, "25").await.unwrap();
        let chain = FakeChain {
            head: 25,
            events: vec![event(1, 10)],
            requested: Mutex::new(Vec::new()),
        };

        let summary = catch_up(&chain, db.as_ref(), 0, 10).await.unwrap();
        assert_eq!(summary, CatchUpSummary::default());
        assert!(chain.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn replayed_events_are_idempotent() {
        let db = crate::db::in_memory().unwrap();
        let e = event(7, 1);
        apply_event(db.as_ref(), &e).await.unwrap();
        apply_event(db.as_ref(), &e).await.unwrap();
        assert_eq!(db.count_profiles().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_progress_value_is_an_error() {
        let db = crate::db::in_memory().unwrap();
        db.set_scan_state(LAST_BLOCK_KEY, "not-a-block").await.unwrap();
        assert!(last_synced_block(db.as_ref()).await.is_err());
    }
}
