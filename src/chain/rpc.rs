// JSON-RPC log reader for the id registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// One `Register` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEvent {
    /// Custody address the fid was registered to, lowercase 0x-prefixed.
    pub to: String,
    pub id: i64,
    pub block_number: u64,
}

/// Anything that can report the chain head and the registrations in a
/// block range.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    /// Register events in `[from, to]`, inclusive, in chain order.
    async fn register_events(&self, from: u64, to: u64) -> Result<Vec<RegisterEvent>>;
}

/// A log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub topics: Vec<String>,
    pub block_number: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// `LogSource` backed by an Ethereum JSON-RPC endpoint.
pub struct RpcLogSource {
    client: reqwest::Client,
    rpc_url: String,
    contract: String,
    register_topic: String,
    next_id: AtomicU64,
}

impl RpcLogSource {
    pub fn new(
        rpc_url: &str,
        contract: &str,
        register_topic: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build RPC client")?;

        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            contract: contract.to_lowercase(),
            register_topic: register_topic.to_lowercase(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(method = method, "JSON-RPC request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("{method} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{method} returned {status}: {body}");
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode {method} response"))?;

        if let Some(err) = body.error {
            bail!("{method} failed ({}): {}", err.code, err.message);
        }
        body.result
            .ok_or_else(|| anyhow!("{method} response had no result"))
    }
}

#[async_trait]
impl LogSource for RpcLogSource {
    async fn latest_block(&self) -> Result<u64> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&hex)
    }

    async fn register_events(&self, from: u64, to: u64) -> Result<Vec<RegisterEvent>> {
        let logs: Vec<RpcLog> = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": self.contract,
                    "fromBlock": format!("{from:#x}"),
                    "toBlock": format!("{to:#x}"),
                    "topics": [self.register_topic],
                }]),
            )
            .await?;

        logs.iter()
            .filter(|log| !log.removed)
            .map(decode_register_log)
            .collect()
    }
}

/// Decode a `Register` log: topic 1 is the owner, topic 2 the id.
pub fn decode_register_log(log: &RpcLog) -> Result<RegisterEvent> {
    let [_, to, id, ..] = log.topics.as_slice() else {
        bail!("Register log has {} topics, expected at least 3", log.topics.len());
    };
    let block_number = log
        .block_number
        .as_deref()
        .ok_or_else(|| anyhow!("Register log is still pending"))
        .and_then(parse_quantity)?;

    Ok(RegisterEvent {
        to: topic_to_address(to)?,
        id: topic_to_id(id)?,
        block_number,
    })
}

/// Parse a JSON-RPC hex quantity such as `0x1a2b`.
pub fn parse_quantity(hex: &str) -> Result<u64> {
    let digits = strip_0x(hex)?;
    u64::from_str_radix(digits, 16).with_context(|| format!("Invalid hex quantity {hex:?}"))
}

/// The low 20 bytes of a 32-byte topic as a lowercase address.
fn topic_to_address(topic: &str) -> Result<String> {
    let digits = topic_digits(topic)?;
    Ok(format!("0x{}", digits[24..].to_lowercase()))
}

/// A uint256 topic that has to fit in an i64.
fn topic_to_id(topic: &str) -> Result<i64> {
    let digits = topic_digits(topic)?;
    let (high, low) = digits.split_at(48);
    if high.chars().any(|c| c != '0') {
        bail!("Register id {topic} does not fit in 64 bits");
    }
    let id = u64::from_str_radix(low, 16).with_context(|| format!("Invalid id topic {topic}"))?;
    i64::try_from(id).with_context(|| format!("Register id {id} out of range"))
}

fn topic_digits(topic: &str) -> Result<&str> {
    let digits = strip_0x(topic)?;
    if digits.len() != 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Malformed topic {topic:?}");
    }
    Ok(digits)
}

fn strip_0x(hex: &str) -> Result<&str> {
    hex.strip_prefix("0x")
        .or_else(|| hex.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Missing 0x prefix in {hex:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC0: &str = "0xf2e19a901b0748d8b08e428d0468896a039ac751ec4fec49b44b7b9c28097e45";

    fn log(topics: &[&str], block: Option<&str>) -> RpcLog {
        RpcLog {
            topics: topics.iter().map(|t| t.to_string()).collect(),
            block_number: block.map(str::to_string),
            removed: false,
        }
    }

    #[test]
    fn decodes_register_log() {
        let event = decode_register_log(&log(
            &[
                TOPIC0,
                "0x0000000000000000000000008773442740C17C9d0F0B87022c722F9a136206eD",
                "0x0000000000000000000000000000000000000000000000000000000000000003",
            ],
            Some("0x10"),
        ))
        .unwrap();

        assert_eq!(
            event,
            RegisterEvent {
                to: "0x8773442740c17c9d0f0b87022c722f9a136206ed".to_string(),
                id: 3,
                block_number: 16,
            }
        );
    }

    #[test]
    fn rejects_short_and_pending_logs() {
        assert!(decode_register_log(&log(&[TOPIC0], Some("0x1"))).is_err());

        let full = [
            TOPIC0,
            "0x0000000000000000000000008773442740c17c9d0f0b87022c722f9a136206ed",
            "0x0000000000000000000000000000000000000000000000000000000000000003",
        ];
        assert!(decode_register_log(&log(&full, None)).is_err());
    }

    #[test]
    fn rejects_ids_wider_than_64_bits() {
        let topic = "0x0000000000000000000000000000000000000000000000010000000000000000";
        assert!(topic_to_id(topic).is_err());
    }

    #[test]
    fn parses_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x6c8b3f").unwrap(), 7_113_535);
        assert!(parse_quantity("12").is_err());
    }
}
