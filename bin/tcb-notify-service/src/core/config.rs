// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Configuration of the monitoring workers
//!
//! Every option can be given as a CLI flag or an environment variable; the
//! env names match the original deployment manifests.

use crate::error;
use alloy_primitives::Address;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tcb_notify::{log::LogLevelParser, store::Compression};
use tracing_subscriber::filter::LevelFilter;
use url::Url;

/// TDX attestation registry monitor
#[derive(Parser, Debug, Clone)]
#[command(author = "Matter Labs", version, about = "TDX attestation registry monitor", long_about = None)]
pub struct Config {
    /// Log level for the log output.
    /// Valid values are: `off`, `error`, `warn`, `info`, `debug`, `trace`
    #[clap(long, env = "LOG_LEVEL", default_value_t = LevelFilter::INFO, value_parser = LogLevelParser)]
    pub log_level: LevelFilter,

    /// URL of the ledger JSON-RPC endpoint.
    #[clap(long = "rpc", env = "RPC_URL")]
    pub rpc_url: Url,

    /// Address of the attestation registry contract (20-byte hex).
    #[clap(long = "registry", env = "REGISTRY_ADDRESS")]
    pub registry_address: Address,

    /// Ingester poll interval in milliseconds.
    #[clap(long, env = "INGEST_POLL_INTERVAL", default_value = "15000", value_parser = parse_duration)]
    pub ingest_poll_interval: Duration,

    /// Maximum block span fetched per ingester iteration.
    #[clap(long, env = "INGEST_BATCH_BLOCKS", default_value_t = 2500)]
    pub ingest_batch_blocks: u64,

    /// PCS poll interval in milliseconds.
    #[clap(long, env = "PCS_POLL_INTERVAL", default_value = "3600000", value_parser = parse_duration)]
    pub tcb_poll_interval: Duration,

    /// Base URL of the Intel PCS.
    #[clap(
        long,
        env = "PCS_BASE_URL",
        default_value = "https://api.trustedservices.intel.com"
    )]
    pub tcb_base_url: Url,

    /// Intel PCS subscription key, when required.
    #[clap(long, env = "PCS_API_KEY")]
    pub tcb_api_key: Option<String>,

    /// Evaluator poll interval in milliseconds.
    #[clap(long, env = "EVAL_POLL_INTERVAL", default_value = "300000", value_parser = parse_duration)]
    pub evaluate_poll_interval: Duration,

    /// Let the verifier fetch additional vendor collateral.
    #[clap(long, env = "EVAL_GET_COLLATERAL", default_value_t = false)]
    pub evaluate_get_collateral: bool,

    /// Let the verifier consult revocation lists.
    #[clap(long, env = "EVAL_CHECK_REVOCATIONS", default_value_t = false)]
    pub evaluate_check_revocations: bool,

    /// Store addresses as host:port, comma-separated.
    #[clap(
        long,
        env = "CH_ADDRS",
        default_value = "localhost:8123",
        value_delimiter = ','
    )]
    pub store_addresses: Vec<String>,

    /// Store database name.
    #[clap(long, env = "CH_DATABASE", default_value = "tcb_notify")]
    pub store_database: String,

    /// Store username.
    #[clap(long, env = "CH_USERNAME", default_value = "default")]
    pub store_username: String,

    /// Store password.
    #[clap(long, env = "CH_PASSWORD", default_value = "")]
    pub store_password: String,

    /// Store dial timeout in milliseconds.
    #[clap(long, env = "CH_DIAL_TIMEOUT", default_value = "5000", value_parser = parse_duration)]
    pub store_dial_timeout: Duration,

    /// Store wire compression.
    #[clap(long, env = "CH_COMPRESSION", default_value = "lz4", value_enum)]
    pub store_compression: Compression,

    /// Connect to the store via TLS.
    #[clap(long, env = "CH_SECURE", default_value_t = false)]
    pub store_secure: bool,

    /// Which workers to run.
    #[clap(subcommand)]
    pub workers: Option<WorkerSelection>,
}

/// Worker selection; each stage is independently deployable.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerSelection {
    /// Run only the registry ingester.
    Ingest,
    /// Run only the PCS TCB poller.
    TcbPoll,
    /// Run only the quote evaluator.
    Evaluate,
    /// Run all three workers.
    #[default]
    All,
}

impl Config {
    /// The selected workers, defaulting to all of them.
    pub fn worker_selection(&self) -> WorkerSelection {
        self.workers.unwrap_or_default()
    }

    /// Store connection settings.
    pub fn clickhouse(&self) -> tcb_notify::store::ClickhouseConfig {
        tcb_notify::store::ClickhouseConfig {
            addresses: self.store_addresses.clone(),
            database: self.store_database.clone(),
            username: self.store_username.clone(),
            password: self.store_password.clone(),
            dial_timeout: self.store_dial_timeout,
            compression: self.store_compression,
            secure: self.store_secure,
        }
    }
}

/// Parse a duration from a millisecond string
fn parse_duration(s: &str) -> error::Result<Duration> {
    let millis = s
        .parse()
        .map_err(|e| error::Error::internal(format!("Can't convert {s} to duration: {e}")))?;
    Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn base_args() -> Vec<&'static str> {
        vec![
            "tcb-notify-service",
            "--rpc",
            "http://localhost:8545",
            "--registry",
            "0x927Ea8b713123744E6E0a92f4417366B0B000dA5",
        ]
    }

    #[test]
    fn defaults_match_the_deployment() {
        let config = Config::try_parse_from(base_args()).unwrap();
        assert_eq!(config.ingest_poll_interval, Duration::from_secs(15));
        assert_eq!(config.ingest_batch_blocks, 2500);
        assert_eq!(config.tcb_poll_interval, Duration::from_secs(3600));
        assert_eq!(config.evaluate_poll_interval, Duration::from_secs(300));
        assert_eq!(config.store_addresses, vec!["localhost:8123".to_string()]);
        assert_eq!(config.store_database, "tcb_notify");
        assert_eq!(config.worker_selection(), WorkerSelection::All);
        assert_eq!(
            config.tcb_base_url.as_str(),
            "https://api.trustedservices.intel.com/"
        );
    }

    #[test]
    fn worker_subcommands_parse() {
        let mut args = base_args();
        args.push("ingest");
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.worker_selection(), WorkerSelection::Ingest);

        let mut args = base_args();
        args.push("tcb-poll");
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.worker_selection(), WorkerSelection::TcbPoll);
    }

    #[test]
    fn store_addresses_split_on_commas() {
        let mut args = base_args();
        args.extend(["--store-addresses", "ch-0:8123,ch-1:8123"]);
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(
            config.store_addresses,
            vec!["ch-0:8123".to_string(), "ch-1:8123".to_string()]
        );
    }

    #[test]
    fn invalid_registry_address_is_rejected() {
        let args = vec![
            "tcb-notify-service",
            "--rpc",
            "http://localhost:8545",
            "--registry",
            "not-an-address",
        ];
        assert!(Config::try_parse_from(args).is_err());
    }
}
