// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! ClickHouse store backend, speaking the HTTP interface.
//!
//! Idempotency comes from `ReplacingMergeTree` engines keyed on the row keys;
//! duplicate inserts collapse at merge time and every read path groups or
//! sorts so that pre-merge duplicates are invisible. Inserts use
//! `JSONEachRow`, reads use `FORMAT JSON` with unquoted 64-bit integers.

use super::{
    AlertStore, CheckpointStore, EvaluationStore, RegistryStore, StoreError, StoreInspect, TcbStore,
};
use crate::model::{
    Checkpoint, EventType, FmspcRow, QuoteEvaluationRow, QuoteStatus, RegistryEventRow,
    StatusTransitionRow, TcbAlertRow, TcbComponents, TcbInfoRow, TcbStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Wire compression of the store connection.
///
/// The HTTP interface negotiates its own transfer encoding; the option is
/// accepted for configuration parity with native-protocol deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Compression {
    /// No compression.
    None,
    /// LZ4 frames.
    #[default]
    Lz4,
    /// Zstandard frames.
    Zstd,
}

/// Connection settings for the ClickHouse backend.
#[derive(Debug, Clone)]
pub struct ClickhouseConfig {
    /// `host:port` endpoints, tried in order.
    pub addresses: Vec<String>,
    /// Database holding the pipeline tables.
    pub database: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Connect timeout.
    pub dial_timeout: Duration,
    /// Wire compression.
    pub compression: Compression,
    /// Connect via https.
    pub secure: bool,
}

/// Store backed by a ClickHouse database.
pub struct ClickhouseStore {
    client: Client,
    base_url: Url,
    database: String,
    username: String,
    password: String,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

impl ClickhouseStore {
    /// Connect to the first reachable address and verify the connection.
    pub async fn connect(config: &ClickhouseConfig) -> Result<Self, StoreError> {
        if config.compression != Compression::None {
            debug!(
                compression = %format!("{:?}", config.compression).to_lowercase(),
                "compression setting applies to the native protocol; HTTP transfer encoding is negotiated"
            );
        }
        let client = Client::builder()
            .connect_timeout(config.dial_timeout)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let scheme = if config.secure { "https" } else { "http" };
        let mut last_error = StoreError::Connection("no store addresses configured".into());
        for address in &config.addresses {
            let url = format!("{scheme}://{address}/");
            let base_url = match Url::parse(&url) {
                Ok(url) => url,
                Err(e) => {
                    last_error = StoreError::Connection(format!("invalid address {address}: {e}"));
                    continue;
                }
            };
            let store = Self {
                client: client.clone(),
                base_url,
                database: config.database.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
            };
            match store.execute("SELECT 1").await {
                Ok(_) => {
                    info!(address, database = config.database, "connected to ClickHouse");
                    return Ok(store);
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Create the pipeline tables when they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for ddl in MIGRATIONS {
            self.execute(ddl).await?;
        }
        Ok(())
    }

    fn endpoint(&self) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("database", &self.database)
            // keep UInt64 columns as JSON numbers
            .append_pair("output_format_json_quote_64bit_integers", "0");
        url
    }

    async fn execute(&self, query: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("X-ClickHouse-User", &self.username)
            .header("X-ClickHouse-Key", &self.password)
            .body(query.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else if status.is_server_error() {
            Err(StoreError::Connection(format!("{status}: {body}")))
        } else {
            Err(StoreError::Consistency(format!("{status}: {body}")))
        }
    }

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<(), StoreError> {
        let mut query = format!("INSERT INTO {table} FORMAT JSONEachRow\n");
        for row in rows {
            query.push_str(&row.to_string());
            query.push('\n');
        }
        self.execute(&query).await.map(drop)
    }

    async fn select<T: DeserializeOwned>(&self, query: &str) -> Result<Vec<T>, StoreError> {
        #[derive(Deserialize)]
        struct JsonOutput<T> {
            data: Vec<T>,
        }
        let body = self.execute(&format!("{query} FORMAT JSON")).await?;
        let output: JsonOutput<T> = serde_json::from_str(&body)?;
        Ok(output.data)
    }
}

fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn datetime(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Consistency(format!("unparseable timestamp {s:?}: {e}")))
}

const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS registry_events (
        service_address String,
        block_number UInt64,
        log_index UInt32,
        event_type LowCardinality(String),
        block_time DateTime64(3, 'UTC'),
        tx_hash String,
        quote_bytes String,
        quote_len UInt32,
        quote_sha256 String,
        fmspc String,
        ingested_at DateTime64(3, 'UTC')
    ) ENGINE = ReplacingMergeTree
    ORDER BY (service_address, block_number, log_index)",
    "CREATE TABLE IF NOT EXISTS pcs_fmspcs (
        fmspc String,
        platform String,
        first_seen DateTime64(3, 'UTC'),
        last_seen DateTime64(3, 'UTC'),
        is_active UInt8
    ) ENGINE = ReplacingMergeTree(last_seen)
    ORDER BY fmspc",
    "CREATE TABLE IF NOT EXISTS pcs_tcb_info (
        fmspc String,
        tcb_evaluation_data_number UInt32,
        issue_date DateTime64(3, 'UTC'),
        next_update DateTime64(3, 'UTC'),
        tcb_type UInt32,
        tcb_levels_json String,
        raw_json String,
        fetched_at DateTime64(3, 'UTC')
    ) ENGINE = ReplacingMergeTree
    ORDER BY (fmspc, tcb_evaluation_data_number)",
    "CREATE TABLE IF NOT EXISTS tdx_quote_evaluations (
        service_address String,
        quote_hash String,
        quote_length UInt32,
        fmspc String,
        sgx_components String,
        tdx_components String,
        pce_svn UInt16,
        mr_td String,
        mr_seam String,
        mr_signer_seam String,
        report_data String,
        status LowCardinality(String),
        tcb_status LowCardinality(String),
        error String,
        block_number UInt64,
        log_index UInt32,
        block_time DateTime64(3, 'UTC'),
        evaluated_at DateTime64(3, 'UTC')
    ) ENGINE = MergeTree
    ORDER BY (service_address, quote_hash, evaluated_at)",
    "CREATE TABLE IF NOT EXISTS tdx_evaluation_history (
        service_address String,
        quote_hash String,
        previous_status LowCardinality(String),
        new_status LowCardinality(String),
        previous_tcb_status LowCardinality(String),
        new_tcb_status LowCardinality(String),
        changed_at DateTime64(3, 'UTC')
    ) ENGINE = MergeTree
    ORDER BY (service_address, quote_hash, changed_at)",
    "CREATE TABLE IF NOT EXISTS tcb_alerts (
        fmspc String,
        old_eval_number UInt32,
        new_eval_number UInt32,
        affected_quotes_count UInt32,
        details String,
        created_at DateTime64(3, 'UTC'),
        acknowledged UInt8
    ) ENGINE = MergeTree
    ORDER BY (fmspc, created_at)",
    "CREATE TABLE IF NOT EXISTS pipeline_offsets (
        service String,
        last_block UInt64,
        last_log_index UInt32,
        updated_at DateTime64(3, 'UTC')
    ) ENGINE = ReplacingMergeTree(updated_at)
    ORDER BY service",
];

/// The latest event per address, filtered to registrations.
const ACTIVE_QUOTES_VIEW: &str = "
    SELECT
        service_address,
        argMax(event_type,   (block_number, log_index)) AS event_type,
        argMax(block_number, (block_number, log_index)) AS block_number,
        argMax(log_index,    (block_number, log_index)) AS log_index,
        argMax(block_time,   (block_number, log_index)) AS block_time,
        argMax(tx_hash,      (block_number, log_index)) AS tx_hash,
        argMax(quote_bytes,  (block_number, log_index)) AS quote_bytes,
        argMax(quote_len,    (block_number, log_index)) AS quote_len,
        argMax(quote_sha256, (block_number, log_index)) AS quote_sha256,
        argMax(fmspc,        (block_number, log_index)) AS fmspc,
        argMax(ingested_at,  (block_number, log_index)) AS ingested_at
    FROM registry_events
    GROUP BY service_address
    HAVING event_type = 'Registered'";

#[derive(Deserialize)]
struct EventRecord {
    service_address: String,
    event_type: String,
    block_number: u64,
    log_index: u32,
    block_time: String,
    tx_hash: String,
    quote_bytes: String,
    quote_len: u32,
    quote_sha256: String,
    fmspc: String,
    ingested_at: String,
}

impl EventRecord {
    fn into_row(self) -> Result<RegistryEventRow, StoreError> {
        Ok(RegistryEventRow {
            service_address: self.service_address,
            block_number: self.block_number,
            log_index: self.log_index,
            event_type: self
                .event_type
                .parse::<EventType>()
                .map_err(StoreError::Consistency)?,
            block_time: parse_datetime(&self.block_time)?,
            tx_hash: self.tx_hash,
            quote_bytes: hex::decode(&self.quote_bytes)
                .map_err(|e| StoreError::Consistency(format!("quote_bytes: {e}")))?,
            quote_length: self.quote_len,
            quote_hash: self.quote_sha256,
            fmspc: self.fmspc,
            ingested_at: parse_datetime(&self.ingested_at)?,
        })
    }
}

#[async_trait]
impl RegistryStore for ClickhouseStore {
    async fn insert_registry_event(&self, row: &RegistryEventRow) -> Result<(), StoreError> {
        self.insert_rows(
            "registry_events",
            &[json!({
                "service_address": row.service_address,
                "block_number": row.block_number,
                "log_index": row.log_index,
                "event_type": row.event_type.to_string(),
                "block_time": datetime(&row.block_time),
                "tx_hash": row.tx_hash,
                "quote_bytes": hex::encode(&row.quote_bytes),
                "quote_len": row.quote_length,
                "quote_sha256": row.quote_hash,
                "fmspc": row.fmspc,
                "ingested_at": datetime(&row.ingested_at),
            })],
        )
        .await
    }

    async fn active_quotes(&self) -> Result<Vec<RegistryEventRow>, StoreError> {
        let records: Vec<EventRecord> = self.select(ACTIVE_QUOTES_VIEW).await?;
        records.into_iter().map(EventRecord::into_row).collect()
    }

    async fn count_active_quotes_by_fmspc(&self, fmspc: &str) -> Result<u64, StoreError> {
        #[derive(Deserialize)]
        struct CountRecord {
            n: u64,
        }
        let query = format!(
            "SELECT countDistinct(service_address) AS n FROM ({ACTIVE_QUOTES_VIEW}) WHERE fmspc = {}",
            sql_str(fmspc)
        );
        let records: Vec<CountRecord> = self.select(&query).await?;
        Ok(records.first().map(|r| r.n).unwrap_or(0))
    }
}

#[async_trait]
impl TcbStore for ClickhouseStore {
    async fn upsert_fmspc(&self, fmspc: &str, platform: &str) -> Result<(), StoreError> {
        let now = datetime(&Utc::now());
        self.insert_rows(
            "pcs_fmspcs",
            &[json!({
                "fmspc": fmspc,
                "platform": platform,
                "first_seen": now,
                "last_seen": now,
                "is_active": 1,
            })],
        )
        .await
    }

    async fn deactivate_missing_fmspcs(&self, seen: &[String]) -> Result<(), StoreError> {
        if seen.is_empty() {
            return Ok(());
        }
        let list = seen
            .iter()
            .map(|f| sql_str(f))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "ALTER TABLE pcs_fmspcs UPDATE is_active = 0 WHERE is_active = 1 AND fmspc NOT IN ({list})"
        );
        self.execute(&query).await.map(drop)
    }

    async fn insert_tcb_info(&self, row: &TcbInfoRow) -> Result<(), StoreError> {
        self.insert_rows(
            "pcs_tcb_info",
            &[json!({
                "fmspc": row.fmspc,
                "tcb_evaluation_data_number": row.tcb_evaluation_data_number,
                "issue_date": datetime(&row.issue_date),
                "next_update": datetime(&row.next_update),
                "tcb_type": row.tcb_type,
                "tcb_levels_json": row.tcb_levels_json,
                "raw_json": row.raw_json,
                "fetched_at": datetime(&row.fetched_at),
            })],
        )
        .await
    }

    async fn latest_tcb_info(&self, fmspc: &str) -> Result<Option<TcbInfoRow>, StoreError> {
        #[derive(Deserialize)]
        struct TcbRecord {
            fmspc: String,
            tcb_evaluation_data_number: u32,
            issue_date: String,
            next_update: String,
            tcb_type: u32,
            tcb_levels_json: String,
            raw_json: String,
            fetched_at: String,
        }
        let query = format!(
            "SELECT fmspc, tcb_evaluation_data_number, issue_date, next_update, tcb_type,
                    tcb_levels_json, raw_json, fetched_at
             FROM pcs_tcb_info
             WHERE fmspc = {}
             ORDER BY tcb_evaluation_data_number DESC
             LIMIT 1",
            sql_str(fmspc)
        );
        let records: Vec<TcbRecord> = self.select(&query).await?;
        records
            .into_iter()
            .next()
            .map(|r| {
                Ok(TcbInfoRow {
                    fmspc: r.fmspc,
                    tcb_evaluation_data_number: r.tcb_evaluation_data_number,
                    issue_date: parse_datetime(&r.issue_date)?,
                    next_update: parse_datetime(&r.next_update)?,
                    tcb_type: r.tcb_type,
                    tcb_levels_json: r.tcb_levels_json,
                    raw_json: r.raw_json,
                    fetched_at: parse_datetime(&r.fetched_at)?,
                })
            })
            .transpose()
    }
}

#[async_trait]
impl EvaluationStore for ClickhouseStore {
    async fn insert_evaluation(&self, row: &QuoteEvaluationRow) -> Result<(), StoreError> {
        let TcbComponents {
            sgx_components,
            tdx_components,
            pce_svn,
        } = row.tcb_components;
        self.insert_rows(
            "tdx_quote_evaluations",
            &[json!({
                "service_address": row.service_address,
                "quote_hash": row.quote_hash,
                "quote_length": row.quote_length,
                "fmspc": row.fmspc,
                "sgx_components": hex::encode(sgx_components),
                "tdx_components": hex::encode(tdx_components),
                "pce_svn": pce_svn,
                "mr_td": row.mr_td,
                "mr_seam": row.mr_seam,
                "mr_signer_seam": row.mr_signer_seam,
                "report_data": row.report_data,
                "status": row.status.to_string(),
                "tcb_status": row.tcb_status.to_string(),
                "error": row.error_message,
                "block_number": row.block_number,
                "log_index": row.log_index,
                "block_time": datetime(&row.block_time),
                "evaluated_at": datetime(&row.evaluated_at),
            })],
        )
        .await
    }

    async fn last_evaluation(
        &self,
        service_address: &str,
        quote_hash: &str,
    ) -> Result<Option<(QuoteStatus, TcbStatus)>, StoreError> {
        #[derive(Deserialize)]
        struct VerdictRecord {
            status: String,
            tcb_status: String,
        }
        let query = format!(
            "SELECT status, tcb_status FROM tdx_quote_evaluations
             WHERE service_address = {} AND quote_hash = {}
             ORDER BY evaluated_at DESC
             LIMIT 1",
            sql_str(service_address),
            sql_str(quote_hash)
        );
        let records: Vec<VerdictRecord> = self.select(&query).await?;
        records
            .into_iter()
            .next()
            .map(|r| {
                Ok((
                    r.status
                        .parse::<QuoteStatus>()
                        .map_err(StoreError::Consistency)?,
                    r.tcb_status
                        .parse::<TcbStatus>()
                        .map_err(StoreError::Consistency)?,
                ))
            })
            .transpose()
    }

    async fn insert_status_transition(&self, row: &StatusTransitionRow) -> Result<(), StoreError> {
        self.insert_rows(
            "tdx_evaluation_history",
            &[json!({
                "service_address": row.service_address,
                "quote_hash": row.quote_hash,
                "previous_status": row.previous_status.to_string(),
                "new_status": row.new_status.to_string(),
                "previous_tcb_status": row.previous_tcb_status.to_string(),
                "new_tcb_status": row.new_tcb_status.to_string(),
                "changed_at": datetime(&row.changed_at),
            })],
        )
        .await
    }
}

#[async_trait]
impl AlertStore for ClickhouseStore {
    async fn insert_alert(&self, row: &TcbAlertRow) -> Result<(), StoreError> {
        self.insert_rows(
            "tcb_alerts",
            &[json!({
                "fmspc": row.fmspc,
                "old_eval_number": row.old_eval_number,
                "new_eval_number": row.new_eval_number,
                "affected_quotes_count": row.affected_quotes_count,
                "details": row.details,
                "created_at": datetime(&row.created_at),
                "acknowledged": u8::from(row.acknowledged),
            })],
        )
        .await
    }
}

#[async_trait]
impl CheckpointStore for ClickhouseStore {
    async fn load_checkpoint(&self, service: &str) -> Result<Option<Checkpoint>, StoreError> {
        #[derive(Deserialize)]
        struct OffsetRecord {
            last_block: u64,
            last_log_index: u32,
        }
        let query = format!(
            "SELECT last_block, last_log_index FROM pipeline_offsets
             WHERE service = {}
             ORDER BY updated_at DESC
             LIMIT 1",
            sql_str(service)
        );
        let records: Vec<OffsetRecord> = self.select(&query).await?;
        Ok(records.into_iter().next().map(|r| Checkpoint {
            last_block: r.last_block,
            last_log_index: r.last_log_index,
        }))
    }

    async fn save_checkpoint(
        &self,
        service: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        self.insert_rows(
            "pipeline_offsets",
            &[json!({
                "service": service,
                "last_block": checkpoint.last_block,
                "last_log_index": checkpoint.last_log_index,
                "updated_at": datetime(&Utc::now()),
            })],
        )
        .await
    }
}

#[async_trait]
impl StoreInspect for ClickhouseStore {
    async fn fmspcs(&self) -> Result<Vec<FmspcRow>, StoreError> {
        #[derive(Deserialize)]
        struct FmspcRecord {
            fmspc: String,
            platform: String,
            first_seen: String,
            last_seen: String,
            is_active: u8,
        }
        let query = "SELECT fmspc,
                            argMax(platform, last_seen) AS platform,
                            min(first_seen) AS first_seen,
                            max(last_seen) AS last_seen,
                            argMax(is_active, last_seen) AS is_active
                     FROM pcs_fmspcs
                     GROUP BY fmspc
                     ORDER BY fmspc";
        let records: Vec<FmspcRecord> = self.select(query).await?;
        records
            .into_iter()
            .map(|r| {
                Ok(FmspcRow {
                    fmspc: r.fmspc,
                    platform: r.platform,
                    first_seen: parse_datetime(&r.first_seen)?,
                    last_seen: parse_datetime(&r.last_seen)?,
                    active: r.is_active != 0,
                })
            })
            .collect()
    }

    async fn unacknowledged_alerts(&self) -> Result<Vec<TcbAlertRow>, StoreError> {
        #[derive(Deserialize)]
        struct AlertRecord {
            fmspc: String,
            old_eval_number: u32,
            new_eval_number: u32,
            affected_quotes_count: u32,
            details: String,
            created_at: String,
            acknowledged: u8,
        }
        let query = "SELECT fmspc, old_eval_number, new_eval_number, affected_quotes_count,
                            details, created_at, acknowledged
                     FROM tcb_alerts
                     WHERE acknowledged = 0
                     ORDER BY created_at DESC
                     LIMIT 100";
        let records: Vec<AlertRecord> = self.select(query).await?;
        records
            .into_iter()
            .map(|r| {
                Ok(TcbAlertRow {
                    fmspc: r.fmspc,
                    old_eval_number: r.old_eval_number,
                    new_eval_number: r.new_eval_number,
                    affected_quotes_count: r.affected_quotes_count,
                    details: r.details,
                    created_at: parse_datetime(&r.created_at)?,
                    acknowledged: r.acknowledged != 0,
                })
            })
            .collect()
    }
}
