// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Store contracts shared by the pipeline workers.
//!
//! The traits are split along writer ownership: the ingester writes registry
//! events and its checkpoint, the PCS poller writes the FMSPC catalog, TCB
//! bundles and alerts, the evaluator writes evaluations and transitions.
//! Inserts are idempotent on their row keys; a worker crash between insert
//! and checkpoint save re-plays the insert as a no-op.

mod clickhouse;
mod memory;

pub use clickhouse::{ClickhouseConfig, ClickhouseStore, Compression};
pub use memory::MemoryStore;

use crate::model::{
    Checkpoint, FmspcRow, QuoteEvaluationRow, QuoteStatus, RegistryEventRow, StatusTransitionRow,
    TcbAlertRow, TcbInfoRow, TcbStatus,
};
use async_trait::async_trait;
use thiserror::Error;

/// Store layer error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend is unreachable or the request did not complete.
    #[error("store connection: {0}")]
    Connection(String),
    /// The backend rejected a write for a reason other than an
    /// idempotent-duplicate key.
    #[error("store consistency: {0}")]
    Consistency(String),
    /// A row failed to encode or decode.
    #[error("store serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StoreError {
    fn from(value: reqwest::Error) -> Self {
        StoreError::Connection(value.to_string())
    }
}

/// Registry event rows; written by the ingester.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert an event row; idempotent on
    /// `(service_address, block_number, log_index)`.
    async fn insert_registry_event(&self, row: &RegistryEventRow) -> Result<(), StoreError>;

    /// The active-quote view: for each address, the latest event by
    /// `(block_number, log_index)`, kept only when it is a registration.
    async fn active_quotes(&self) -> Result<Vec<RegistryEventRow>, StoreError>;

    /// Distinct active addresses whose registration carries `fmspc`.
    async fn count_active_quotes_by_fmspc(&self, fmspc: &str) -> Result<u64, StoreError>;
}

/// FMSPC catalog and TCB bundles; written by the PCS poller.
#[async_trait]
pub trait TcbStore: Send + Sync {
    /// Insert or refresh a catalog entry, updating `last_seen` and re-activating it.
    async fn upsert_fmspc(&self, fmspc: &str, platform: &str) -> Result<(), StoreError>;

    /// Flip `active` off for every FMSPC not in `seen`.
    async fn deactivate_missing_fmspcs(&self, seen: &[String]) -> Result<(), StoreError>;

    /// Insert a bundle snapshot; idempotent on
    /// `(fmspc, tcb_evaluation_data_number)`.
    async fn insert_tcb_info(&self, row: &TcbInfoRow) -> Result<(), StoreError>;

    /// The cached bundle with the highest evaluation data number for `fmspc`.
    async fn latest_tcb_info(&self, fmspc: &str) -> Result<Option<TcbInfoRow>, StoreError>;
}

/// Evaluation verdicts and status transitions; written by the evaluator.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    /// Append an evaluation row.
    async fn insert_evaluation(&self, row: &QuoteEvaluationRow) -> Result<(), StoreError>;

    /// The most recent verdict for `(service_address, quote_hash)`.
    async fn last_evaluation(
        &self,
        service_address: &str,
        quote_hash: &str,
    ) -> Result<Option<(QuoteStatus, TcbStatus)>, StoreError>;

    /// Append a status transition row.
    async fn insert_status_transition(&self, row: &StatusTransitionRow) -> Result<(), StoreError>;
}

/// TCB update alerts; written by the PCS poller.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Append an alert row.
    async fn insert_alert(&self, row: &TcbAlertRow) -> Result<(), StoreError>;
}

/// Per-worker resumption positions.
///
/// A checkpoint never rewinds; saving a position below the stored one leaves
/// the stored one in place.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last saved position of `service`, if any.
    async fn load_checkpoint(&self, service: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Persist the position of `service`.
    async fn save_checkpoint(&self, service: &str, checkpoint: Checkpoint)
        -> Result<(), StoreError>;
}

/// Read access used by operators and tests to inspect the alert and catalog
/// state; not on the workers' write path.
#[async_trait]
pub trait StoreInspect: Send + Sync {
    /// All catalog rows.
    async fn fmspcs(&self) -> Result<Vec<FmspcRow>, StoreError>;

    /// Alerts not yet acknowledged, newest first.
    async fn unacknowledged_alerts(&self) -> Result<Vec<TcbAlertRow>, StoreError>;
}
