// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Ledger JSON-RPC client: header fetches and registry log filtering.
//!
//! The registry contract emits two topics the pipeline consumes:
//! `Registered(address,bytes,bool)` and `Invalidated(address)`. Neither event
//! indexes its parameters, so decoding happens over the log data.

use super::retry::{RetryConfig, RetryHelper};
use crate::error::{Error, Result};
use alloy_primitives::{Address, B256};
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

sol! {
    /// A TEE service registered an attestation quote.
    event Registered(address teeAddress, bytes rawQuote, bool alreadyExists);
    /// A TEE service's attestation was invalidated.
    event Invalidated(address teeAddress);
}

/// An undecoded log entry returned by the ledger.
#[derive(Debug, Clone)]
pub struct RawLog {
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Position of the log within the block.
    pub log_index: u32,
    /// Transaction hash, `0x`-prefixed hex.
    pub tx_hash: String,
    /// Log topics.
    pub topics: Vec<B256>,
    /// ABI-encoded log data.
    pub data: Vec<u8>,
}

/// A decoded registry event.
#[derive(Debug, Clone)]
pub enum RegistryLogEvent {
    /// `Registered(teeAddress, rawQuote, alreadyExists)`
    Registered {
        /// Registering TEE service.
        tee_address: Address,
        /// The attestation quote blob.
        raw_quote: Vec<u8>,
        /// Informational re-registration flag; recorded, never keyed on.
        already_exists: bool,
    },
    /// `Invalidated(teeAddress)`
    Invalidated {
        /// Invalidated TEE service.
        tee_address: Address,
    },
}

/// Decode a raw registry log by its first topic.
pub fn decode_registry_log(log: &RawLog) -> Result<RegistryLogEvent> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| Error::protocol("log without topics"))?;
    if *topic0 == Registered::SIGNATURE_HASH {
        let event = Registered::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| Error::protocol(format!("undecodable Registered log: {e}")))?;
        Ok(RegistryLogEvent::Registered {
            tee_address: event.teeAddress,
            raw_quote: event.rawQuote.to_vec(),
            already_exists: event.alreadyExists,
        })
    } else if *topic0 == Invalidated::SIGNATURE_HASH {
        let event = Invalidated::decode_raw_log(log.topics.iter().copied(), &log.data, true)
            .map_err(|e| Error::protocol(format!("undecodable Invalidated log: {e}")))?;
        Ok(RegistryLogEvent::Invalidated {
            tee_address: event.teeAddress,
        })
    } else {
        Err(Error::protocol(format!("unexpected log topic {topic0}")))
    }
}

/// Ledger read interface used by the ingester.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Number of the current head block.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Timestamp of block `number`.
    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>>;

    /// Logs of `address` matching `topic0` within `[from, to]`, both inclusive.
    async fn filter_logs(
        &self,
        address: Address,
        topic0: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>>;
}

const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC implementation of [`LedgerClient`] over an Ethereum-compatible node.
///
/// Transient request failures are retried with exponential backoff before
/// they surface to the ingester.
pub struct EthLedgerClient {
    client: Client,
    rpc_url: Url,
    retry: RetryHelper,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize, Debug)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct LogEntry {
    #[serde(rename = "blockNumber")]
    block_number: String,
    #[serde(rename = "logIndex")]
    log_index: String,
    #[serde(rename = "transactionHash")]
    transaction_hash: String,
    topics: Vec<String>,
    data: String,
}

impl EthLedgerClient {
    /// Create a new client for `rpc_url` with the default retry behavior.
    pub fn new(rpc_url: Url) -> Result<Self> {
        Self::new_with_retry(rpc_url, RetryConfig::default())
    }

    /// Create a new client for `rpc_url` with a custom retry configuration.
    pub fn new_with_retry(rpc_url: Url, retry: RetryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(RPC_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::internal(format!("Failed to create JSON-RPC client: {e}")))?;
        Ok(Self {
            client,
            rpc_url,
            retry: RetryHelper::new(retry),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.retry
            .execute(method, || self.call_once(method, params.clone()))
            .await
    }

    async fn call_once(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: JsonRpcResponse = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await?
            .error_for_status()
            .map_err(Error::from)?
            .json()
            .await
            .map_err(|e| Error::JsonRpcInvalidResponse(e.to_string()))?;

        if let Some(e) = response.error {
            return Err(Error::JsonRpc(format!("{method}: {} ({})", e.message, e.code)));
        }
        response
            .result
            .ok_or_else(|| Error::JsonRpcInvalidResponse(format!("{method}: empty result")))
    }
}

fn parse_hex_u64(value: &str, what: &str) -> Result<u64> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| Error::JsonRpcInvalidResponse(format!("{what} is not hex: {value}")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::JsonRpcInvalidResponse(format!("{what} {value}: {e}")))
}

fn parse_b256(value: &str, what: &str) -> Result<B256> {
    value
        .parse::<B256>()
        .map_err(|e| Error::JsonRpcInvalidResponse(format!("{what} {value}: {e}")))
}

#[async_trait]
impl LedgerClient for EthLedgerClient {
    async fn latest_block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let number = result
            .as_str()
            .ok_or_else(|| Error::JsonRpcInvalidResponse("eth_blockNumber: not a string".into()))?;
        parse_hex_u64(number, "block number")
    }

    async fn block_timestamp(&self, number: u64) -> Result<DateTime<Utc>> {
        let result = self
            .call(
                "eth_getBlockByNumber",
                json!([format!("{number:#x}"), false]),
            )
            .await?;
        let timestamp = result
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::JsonRpcInvalidResponse(format!("block {number} has no timestamp"))
            })?;
        let seconds = parse_hex_u64(timestamp, "block timestamp")?;
        Utc.timestamp_opt(seconds as i64, 0).single().ok_or_else(|| {
            Error::JsonRpcInvalidResponse(format!("block {number} timestamp out of range"))
        })
    }

    async fn filter_logs(
        &self,
        address: Address,
        topic0: B256,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLog>> {
        let result = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": format!("{address:#x}"),
                    "topics": [format!("{topic0:#x}")],
                    "fromBlock": format!("{from:#x}"),
                    "toBlock": format!("{to:#x}"),
                }]),
            )
            .await?;

        let entries: Vec<LogEntry> = serde_json::from_value(result)
            .map_err(|e| Error::JsonRpcInvalidResponse(format!("eth_getLogs: {e}")))?;

        entries
            .into_iter()
            .map(|entry| {
                let data = entry
                    .data
                    .strip_prefix("0x")
                    .map(hex::decode)
                    .transpose()?
                    .unwrap_or_default();
                Ok(RawLog {
                    block_number: parse_hex_u64(&entry.block_number, "log block number")?,
                    log_index: parse_hex_u64(&entry.log_index, "log index")? as u32,
                    tx_hash: entry.transaction_hash,
                    topics: entry
                        .topics
                        .iter()
                        .map(|t| parse_b256(t, "log topic"))
                        .collect::<Result<Vec<_>>>()?,
                    data,
                })
            })
            .collect()
    }
}
