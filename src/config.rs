use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// The Farcaster id registry on Optimism.
pub const DEFAULT_ID_REGISTRY_ADDRESS: &str = "0x00000000fcaf86937e41ba038b4fa40baa4b780a";

/// Indexer settings, read from the environment (and `.env`, which main
/// loads through dotenvy before calling `Config::load`).
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database file (used unless DATABASE_URL points at Postgres).
    pub db_path: String,
    /// A postgres:// URL here switches storage to Postgres
    pub database_url: Option<String>,
    /// Base URL of the Warpcast API.
    pub api_url: String,
    /// Optional bearer token sent with every API request.
    pub api_token: Option<String>,
    /// Items requested per page (the API caps this at 1000).
    pub page_size: usize,
    /// Timeout applied to every single HTTP request.
    pub http_timeout: Duration,
    /// Upper bound on one scheduled indexing run.
    pub run_timeout: Duration,
    /// Shared sliding-window limit for API requests.
    pub rate_limit: u32,
    pub rate_window_secs: u64,
    pub min_delay_ms: u64,
    /// Number of casts a scheduled run indexes before stopping.
    pub cast_limit: usize,
    /// JSON-RPC endpoint of the chain that hosts the id registry.
    pub rpc_url: Option<String>,
    pub id_registry_address: String,
    /// topic0 of the registry's `Register` event.
    pub register_topic: Option<String>,
    /// First block scanned when no progress has been recorded yet.
    pub registry_start_block: u64,
    /// Blocks requested per eth_getLogs call.
    pub log_range: u64,
    /// How often the live watcher polls for new blocks.
    pub watch_interval: Duration,
    /// Six-field cron expressions for the `serve` scheduler.
    pub casts_cron: String,
    pub registrations_cron: String,
}

impl Config {
    /// Read every setting, applying defaults for the optional ones.
    ///
    /// Everything has a default except the chain settings, which are only
    /// needed by the registration commands.
    pub fn load() -> Result<Self> {
        Ok(Self {
            db_path: env::var("FC_DB_PATH").unwrap_or_else(|_| "./fc-indexer.db".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            api_url: env::var("FC_API_URL")
                .unwrap_or_else(|_| crate::warpcast::client::DEFAULT_API_URL.to_string()),
            api_token: non_empty_var("FC_API_TOKEN"),
            page_size: parse_var("FC_PAGE_SIZE", 1000)?,
            http_timeout: Duration::from_secs(parse_var("FC_HTTP_TIMEOUT_SECS", 30)?),
            run_timeout: Duration::from_secs(parse_var("FC_RUN_TIMEOUT_SECS", 1500)?),
            rate_limit: parse_var("FC_RATE_LIMIT", 300)?,
            rate_window_secs: parse_var("FC_RATE_WINDOW_SECS", 60)?,
            min_delay_ms: parse_var("FC_MIN_DELAY_MS", 100)?,
            cast_limit: parse_var("FC_CAST_LIMIT", 10_000)?,
            rpc_url: non_empty_var("OP_RPC_URL"),
            id_registry_address: env::var("ID_REGISTRY_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_ID_REGISTRY_ADDRESS.to_string()),
            register_topic: non_empty_var("ID_REGISTRY_REGISTER_TOPIC"),
            registry_start_block: parse_var("ID_REGISTRY_START_BLOCK", 0)?,
            log_range: parse_var("FC_LOG_RANGE", 2000)?,
            watch_interval: Duration::from_secs(parse_var("FC_WATCH_INTERVAL_SECS", 15)?),
            casts_cron: env::var("FC_CASTS_CRON").unwrap_or_else(|_| "0 */30 * * * *".to_string()),
            registrations_cron: env::var("FC_REGISTRATIONS_CRON")
                .unwrap_or_else(|_| "0 0 * * * *".to_string()),
        })
    }

    /// Check that the chain settings are configured.
    /// Call this before any operation that reads registry events.
    pub fn require_chain(&self) -> Result<(&str, &str)> {
        let Some(rpc_url) = self.rpc_url.as_deref() else {
            anyhow::bail!(
                "OP_RPC_URL not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        };
        let Some(topic) = self.register_topic.as_deref() else {
            anyhow::bail!(
                "ID_REGISTRY_REGISTER_TOPIC not set. Registration sync needs the topic0\n\
                 hash of the registry's Register event."
            );
        };
        Ok((rpc_url, topic))
    }

    /// Whether DATABASE_URL selects the Postgres backend.
    pub fn uses_postgres(&self) -> bool {
        self.database_url
            .as_deref()
            .is_some_and(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(rpc_url: Option<&str>, topic: Option<&str>) -> Config {
        Config {
            db_path: "./test.db".to_string(),
            database_url: None,
            api_url: "http://localhost".to_string(),
            api_token: None,
            page_size: 1000,
            http_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(60),
            rate_limit: 10,
            rate_window_secs: 60,
            min_delay_ms: 0,
            cast_limit: 100,
            rpc_url: rpc_url.map(str::to_string),
            id_registry_address: DEFAULT_ID_REGISTRY_ADDRESS.to_string(),
            register_topic: topic.map(str::to_string),
            registry_start_block: 0,
            log_range: 2000,
            watch_interval: Duration::from_secs(15),
            casts_cron: "0 */30 * * * *".to_string(),
            registrations_cron: "0 0 * * * *".to_string(),
        }
    }

    #[test]
    fn require_chain_needs_rpc_url() {
        let config = config_with(None, Some("0xabc"));
        let err = config.require_chain().unwrap_err();
        assert!(err.to_string().contains("OP_RPC_URL"));
    }

    #[test]
    fn require_chain_needs_topic() {
        let config = config_with(Some("http://rpc"), None);
        let err = config.require_chain().unwrap_err();
        assert!(err.to_string().contains("ID_REGISTRY_REGISTER_TOPIC"));
    }

    #[test]
    fn require_chain_returns_both_settings() {
        let config = config_with(Some("http://rpc"), Some("0xabc"));
        assert_eq!(config.require_chain().unwrap(), ("http://rpc", "0xabc"));
    }

    #[test]
    fn postgres_detection() {
        let mut config = config_with(None, None);
        assert!(!config.uses_postgres());
        config.database_url = Some("postgresql://localhost/fc".to_string());
        assert!(config.uses_postgres());
        config.database_url = Some("sqlite://fc.db".to_string());
        assert!(!config.uses_postgres());
    }
}
