use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use fc_indexer::chain::registrations;
use fc_indexer::chain::rpc::RpcLogSource;
use fc_indexer::config::Config;
use fc_indexer::db::Database;
use fc_indexer::indexer::casts::{self, RunOptions};
use fc_indexer::indexer::pagination::{Cursor, RetryPolicy};
use fc_indexer::indexer::profiles;
use fc_indexer::scheduler::{self, Services};
use fc_indexer::warpcast::client::ApiClient;
use fc_indexer::warpcast::rate_limit::RateLimiter;

/// Cast limit for `single`: effectively the whole feed.
const SINGLE_RUN_CAST_LIMIT: usize = 100_000_000;

/// fc-indexer: incremental Farcaster cast and profile indexer.
///
/// Walks the Warpcast recent-casts and recent-users feeds into a local
/// database and keeps profiles in sync with on-chain registrations.
#[derive(Parser)]
#[command(name = "fc-indexer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Index recent casts
    Casts {
        /// Stop after at least this many casts (0 = no limit)
        #[arg(long)]
        limit: Option<usize>,

        /// Start from this cursor instead of the newest cast
        #[arg(long, conflicts_with = "resume")]
        cursor: Option<String>,

        /// Start from the cursor saved by the last backfill
        #[arg(long)]
        resume: bool,

        /// Keep going in batches of --limit until the feed is exhausted
        #[arg(long)]
        backfill: bool,
    },

    /// Refresh every profile and fill fid gaps
    Profiles {
        /// Stop after at least this many profiles (0 = no limit)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Catch up on id registry registrations
    Registrations {
        /// Keep polling for new registrations after catching up
        #[arg(long)]
        watch: bool,
    },

    /// One full pass: registrations, then profiles, then all casts
    Single,

    /// Run the scheduled jobs until interrupted
    Serve,

    /// Show database status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fc_indexer=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            info!("Initializing database...");
            let db = init_database(&config).await?;
            let table_count = db.table_count().await?;
            if config.uses_postgres() {
                println!("Database initialized on PostgreSQL");
            } else {
                println!("Database initialized at: {}", config.db_path);
            }
            println!("Tables: {table_count}");
            println!("\nNext: fill in your .env (see .env.example), then run:");
            println!("  fc-indexer profiles && fc-indexer casts --limit 10000");
        }

        Commands::Casts {
            limit,
            cursor,
            resume,
            backfill,
        } => {
            let db = open_database(&config).await?;
            let api = api_client(&config)?;
            let feed = api.casts();

            // Only runs that continue from a cursor move the saved backfill
            // position; a plain run from the newest cast leaves it alone.
            let continues = resume || cursor.is_some();
            let start = if resume {
                let saved = casts::load_resume_cursor(db.as_ref()).await?;
                if saved.is_none() {
                    warn!("No saved cursor, starting from the newest cast");
                }
                saved
            } else {
                cursor.map(Cursor::from_token)
            };

            if backfill {
                let batch = limit.unwrap_or(50_000);
                let summary =
                    casts::backfill_casts(&feed, db.as_ref(), batch, start, RetryPolicy::default())
                        .await?;
                println!(
                    "{} {} casts in {} batches",
                    "Backfill:".bold(),
                    summary.indexed,
                    summary.batches
                );
                if let Some(reason) = summary.interrupted {
                    println!("{} {}", "Interrupted:".yellow(), reason);
                    println!("  Resume with: fc-indexer casts --backfill --resume");
                }
            } else {
                let summary = casts::index_all_casts(
                    &feed,
                    db.as_ref(),
                    RunOptions {
                        limit: Some(limit.unwrap_or(config.cast_limit)),
                        cursor: start,
                        ..RunOptions::default()
                    },
                )
                .await?;
                if continues {
                    casts::save_resume_cursor(db.as_ref(), summary.next_cursor.as_ref()).await?;
                }

                println!(
                    "Indexed {} of {} fetched casts ({} skipped) in {:.1}s",
                    summary.indexed,
                    summary.fetched,
                    summary.batch.skipped_rows,
                    summary.duration.as_secs_f64()
                );
                match (&summary.next_cursor, &summary.interrupted) {
                    (_, Some(reason)) => println!("{} {}", "Interrupted:".yellow(), reason),
                    (Some(next), None) => println!("Next cursor: {next}"),
                    (None, None) => println!("{}", "Reached the end of the feed".green()),
                }
            }
        }

        Commands::Profiles { limit } => {
            let db = open_database(&config).await?;
            let api = api_client(&config)?;
            let summary = profiles::update_all_profiles(
                &api.users(),
                db.as_ref(),
                RunOptions {
                    limit,
                    ..RunOptions::default()
                },
            )
            .await?;
            println!(
                "Updated {} profiles ({} skipped), {} placeholders, in {:.1}s",
                summary.batch.upserted,
                summary.batch.skipped_rows,
                summary.placeholders,
                summary.duration.as_secs_f64()
            );
        }

        Commands::Registrations { watch } => {
            let db = open_database(&config).await?;
            let chain = chain_source(&config)?;
            let summary = registrations::catch_up(
                &chain,
                db.as_ref(),
                config.registry_start_block,
                config.log_range,
            )
            .await?;
            match summary.scanned {
                Some((from, to)) => println!(
                    "Applied {} registrations from blocks {}..={}",
                    summary.events, from, to
                ),
                None => println!("Registrations already up to date"),
            }

            if watch {
                registrations::watch(
                    &chain,
                    db.as_ref(),
                    config.registry_start_block,
                    config.log_range,
                    config.watch_interval,
                )
                .await;
            }
        }

        Commands::Single => {
            let db = open_database(&config).await?;
            let api = api_client(&config)?;
            println!("Starting Farcaster indexing...");

            if config.rpc_url.is_some() {
                let chain = chain_source(&config)?;
                registrations::catch_up(
                    &chain,
                    db.as_ref(),
                    config.registry_start_block,
                    config.log_range,
                )
                .await?;
                println!("Finished indexing registrations");
            } else {
                warn!("OP_RPC_URL not set, skipping registrations");
            }

            profiles::update_all_profiles(&api.users(), db.as_ref(), RunOptions::default())
                .await?;
            println!("Finished updating profiles");

            let summary = casts::index_all_casts(
                &api.casts(),
                db.as_ref(),
                RunOptions {
                    limit: Some(SINGLE_RUN_CAST_LIMIT),
                    ..RunOptions::default()
                },
            )
            .await?;
            println!("Finished indexing casts ({} indexed)", summary.indexed);
        }

        Commands::Serve => {
            let db = open_database(&config).await?;
            let api = Arc::new(api_client(&config)?);
            let chain = match config.rpc_url {
                Some(_) => Some(Arc::new(chain_source(&config)?)),
                None => None,
            };
            let services = Arc::new(Services {
                config: config.clone(),
                db,
                api,
                chain,
            });
            scheduler::serve(services).await?;
        }

        Commands::Status => {
            if !config.uses_postgres() && !fc_indexer::status::sqlite_initialized(&config.db_path)
            {
                println!("Database: not initialized");
                println!("\nRun `fc-indexer init` to set up the database.");
                return Ok(());
            }
            let db = open_database(&config).await?;
            let sqlite_path = (!config.uses_postgres()).then_some(config.db_path.as_str());
            fc_indexer::status::show(&db, sqlite_path).await?;
        }
    }

    Ok(())
}

/// Build the Warpcast client with the configured rate limit and timeout.
fn api_client(config: &Config) -> Result<ApiClient> {
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit,
        config.rate_window_secs,
        config.min_delay_ms,
    ));
    Ok(ApiClient::new(
        &config.api_url,
        config.api_token.clone(),
        config.http_timeout,
        limiter,
    )?
    .with_page_size(config.page_size))
}

/// Build the id registry log reader, failing if the chain isn't configured.
fn chain_source(config: &Config) -> Result<RpcLogSource> {
    let (rpc_url, topic) = config.require_chain()?;
    RpcLogSource::new(
        rpc_url,
        &config.id_registry_address,
        topic,
        config.http_timeout,
    )
}

/// Open the database (Postgres when DATABASE_URL says so, else SQLite).
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    open_sqlite(config)
}

/// Open the database for `init`, creating the SQLite file if needed.
async fn init_database(config: &Config) -> Result<Arc<dyn Database>> {
    if config.uses_postgres() {
        return connect_postgres(config).await;
    }
    initialize_sqlite(config)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &Config) -> Result<Arc<dyn Database>> {
    info!("Using PostgreSQL backend");
    let url = config.database_url.as_deref().unwrap_or_default();
    fc_indexer::db::connect_postgres(url).await
}

#[cfg(not(feature = "postgres"))]
async fn connect_postgres(_config: &Config) -> Result<Arc<dyn Database>> {
    anyhow::bail!(
        "DATABASE_URL points to PostgreSQL but the 'postgres' feature is not compiled in.\n\
         Rebuild with: cargo build --features postgres"
    )
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn Database>> {
    fc_indexer::db::open_sqlite(&config.db_path)
}

#[cfg(feature = "sqlite")]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn Database>> {
    fc_indexer::db::initialize_sqlite(&config.db_path)
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn Database>> {
    anyhow::bail!("No DATABASE_URL set and the 'sqlite' feature is not compiled in")
}

#[cfg(not(feature = "sqlite"))]
fn initialize_sqlite(config: &Config) -> Result<Arc<dyn Database>> {
    open_sqlite(config)
}
