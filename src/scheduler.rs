// Scheduled jobs for `serve`.
//
// Two cron jobs share one API client (and so one rate limiter) and one
// database handle. Every job body is its own error boundary: a failure or a
// timeout is logged and the scheduler keeps going. Casts and profiles run
// back to back in the same job but fail independently.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::chain::registrations;
use crate::chain::rpc::RpcLogSource;
use crate::config::Config;
use crate::db::Database;
use crate::indexer::casts::{index_all_casts, RunOptions};
use crate::indexer::profiles::update_all_profiles;
use crate::warpcast::client::ApiClient;

/// Everything a job needs, shared across runs.
pub struct Services {
    pub config: Config,
    pub db: Arc<dyn Database>,
    pub api: Arc<ApiClient>,
    /// None when no RPC endpoint is configured.
    pub chain: Option<Arc<RpcLogSource>>,
}

/// Run `job` to completion or until `limit` elapses, logging the outcome.
/// Returns None on error or timeout.
pub async fn run_bounded<T, F>(name: &str, limit: Duration, job: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(limit, job).await {
        Ok(Ok(value)) => {
            info!(
                job = name,
                duration_secs = started.elapsed().as_secs_f64(),
                "Job finished"
            );
            Some(value)
        }
        Ok(Err(e)) => {
            let detail = format!("{e:#}");
            error!(job = name, error = %detail, "Job failed");
            None
        }
        Err(_) => {
            error!(job = name, timeout_secs = limit.as_secs(), "Job timed out");
            None
        }
    }
}

/// One casts-then-profiles cycle.
pub async fn index_cycle(services: &Services) {
    let limit = services.config.run_timeout;
    let db = services.db.as_ref();

    run_bounded(
        "casts",
        limit,
        index_all_casts(
            &services.api.casts(),
            db,
            RunOptions {
                limit: Some(services.config.cast_limit),
                ..RunOptions::default()
            },
        ),
    )
    .await;

    run_bounded(
        "profiles",
        limit,
        update_all_profiles(&services.api.users(), db, RunOptions::default()),
    )
    .await;
}

/// One registration catch-up pass. No-op without a chain source.
pub async fn registration_cycle(services: &Services) {
    let Some(chain) = services.chain.as_deref() else {
        return;
    };
    run_bounded(
        "registrations",
        services.config.run_timeout,
        registrations::catch_up(
            chain,
            services.db.as_ref(),
            services.config.registry_start_block,
            services.config.log_range,
        ),
    )
    .await;
}

/// Build (but don't start) the scheduler with the indexing jobs.
pub async fn build_scheduler(services: Arc<Services>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    let cron = services.config.casts_cron.clone();
    let shared = Arc::clone(&services);
    let job = Job::new_async(&cron, move |_uuid, _l| {
        let services = Arc::clone(&shared);
        Box::pin(async move {
            index_cycle(&services).await;
        })
    })
    .with_context(|| format!("creating indexing job for cron {cron}"))?;
    sched.add(job).await.context("adding indexing job")?;

    if services.chain.is_some() {
        let cron = services.config.registrations_cron.clone();
        let shared = Arc::clone(&services);
        let job = Job::new_async(&cron, move |_uuid, _l| {
            let services = Arc::clone(&shared);
            Box::pin(async move {
                registration_cycle(&services).await;
            })
        })
        .with_context(|| format!("creating registration job for cron {cron}"))?;
        sched.add(job).await.context("adding registration job")?;
    }

    Ok(sched)
}

/// Catch up on registrations, then run the scheduled jobs and the live
/// registration watcher until Ctrl-C.
pub async fn serve(services: Arc<Services>) -> Result<()> {
    let watcher = match services.chain.clone() {
        Some(chain) => {
            registration_cycle(&services).await;
            let db = Arc::clone(&services.db);
            let config = services.config.clone();
            Some(tokio::spawn(async move {
                registrations::watch(
                    chain.as_ref(),
                    db.as_ref(),
                    config.registry_start_block,
                    config.log_range,
                    config.watch_interval,
                )
                .await;
            }))
        }
        None => {
            info!("OP_RPC_URL not set; registration sync disabled");
            None
        }
    };

    let mut sched = build_scheduler(Arc::clone(&services)).await?;
    sched.start().await.context("starting scheduler")?;
    info!(
        casts_cron = %services.config.casts_cron,
        registrations_cron = %services.config.registrations_cron,
        "Scheduler running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    if let Some(handle) = watcher {
        handle.abort();
    }
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_bounded_returns_value() {
        let out = run_bounded("ok", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn run_bounded_swallows_errors() {
        let out: Option<()> = run_bounded("fails", Duration::from_secs(1), async {
            Err(anyhow::anyhow!("boom"))
        })
        .await;
        assert_eq!(out, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_bounded_times_out() {
        let out = run_bounded("slow", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert_eq!(out, None);
    }
}
