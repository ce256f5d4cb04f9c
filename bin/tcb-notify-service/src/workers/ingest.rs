// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Registry ingestion worker.
//!
//! Tails the registry's `Registered` and `Invalidated` topics in bounded
//! block windows, persists one row per event ordered by
//! `(block_number, log_index)` and advances its checkpoint with the last
//! persisted event. Persistence is idempotent on the event key, so replaying
//! a window after a crash leaves exactly one row per event.

use crate::{
    client::{decode_registry_log, Invalidated, LedgerClient, RawLog, Registered, RegistryLogEvent},
    core::INGEST_SERVICE_NAME,
    error::{Error, Result},
    workers::idle,
};
use alloy_primitives::Address;
use alloy_sol_types::SolEvent;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tcb_notify::{
    model::{Checkpoint, EventType, RegistryEventRow},
    quote::ParsedQuote,
    store::{CheckpointStore, RegistryStore},
};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Settings of the ingestion worker.
#[derive(Debug, Clone)]
pub struct IngesterConfig {
    /// Poll interval between iterations.
    pub poll_interval: Duration,
    /// Maximum block span per iteration.
    pub batch_blocks: u64,
    /// Address of the registry contract.
    pub registry_address: Address,
}

/// The registry ingestion worker.
pub struct RegistryIngester {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<dyn RegistryStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: IngesterConfig,
    checkpoint: Option<Checkpoint>,
}

struct PendingEvent {
    event: RegistryLogEvent,
    block_number: u64,
    log_index: u32,
    tx_hash: String,
    block_time: DateTime<Utc>,
}

impl RegistryIngester {
    /// Create the worker; the checkpoint is loaded on the first iteration.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<dyn RegistryStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: IngesterConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            checkpoints,
            config,
            checkpoint: None,
        }
    }

    /// Run until the stop channel flips.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_blocks = self.config.batch_blocks,
            registry = %self.config.registry_address,
            "Starting registry ingestion worker"
        );

        match self.checkpoints.load_checkpoint(INGEST_SERVICE_NAME).await {
            Ok(checkpoint) => self.checkpoint = checkpoint,
            Err(e) => error!("Failed to load checkpoint, starting from genesis: {e}"),
        }

        loop {
            if let Err(e) = self.tick().await {
                error!("Failed to process batch: {e}");
            }
            if !idle(&mut stop, self.config.poll_interval).await {
                info!("Registry ingestion worker stopped");
                return Ok(());
            }
        }
    }

    /// One poll iteration: fetch, order, persist, checkpoint.
    pub async fn tick(&mut self) -> Result<()> {
        let head = self.ledger.latest_block_number().await?;

        let from = match self.checkpoint {
            Some(c) => c.last_block + 1,
            None => 0,
        };
        let to = from
            .saturating_add(self.config.batch_blocks.saturating_sub(1))
            .min(head);
        if from > to {
            return Ok(());
        }

        let events = self.fetch_events(from, to).await?;
        if events.is_empty() {
            return Ok(());
        }

        let mut processed = 0usize;
        for event in &events {
            if let Err(e) = self.persist_event(event).await {
                // hold the checkpoint at the last successfully written event
                self.save_checkpoint().await?;
                return Err(e);
            }
            self.checkpoint = Some(Checkpoint {
                last_block: event.block_number,
                last_log_index: event.log_index,
            });
            processed += 1;
        }

        self.save_checkpoint().await?;
        info!(
            processed,
            from,
            to,
            last = ?self.checkpoint,
            "Processed registry events"
        );
        Ok(())
    }

    async fn fetch_events(&self, from: u64, to: u64) -> Result<Vec<PendingEvent>> {
        let registered = self
            .ledger
            .filter_logs(
                self.config.registry_address,
                Registered::SIGNATURE_HASH,
                from,
                to,
            )
            .await?;
        let invalidated = self
            .ledger
            .filter_logs(
                self.config.registry_address,
                Invalidated::SIGNATURE_HASH,
                from,
                to,
            )
            .await?;

        let mut block_times: HashMap<u64, DateTime<Utc>> = HashMap::new();
        let mut events = Vec::with_capacity(registered.len() + invalidated.len());
        for log in registered.iter().chain(invalidated.iter()) {
            events.push(self.resolve_event(log, &mut block_times).await?);
        }

        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }

    async fn resolve_event(
        &self,
        log: &RawLog,
        block_times: &mut HashMap<u64, DateTime<Utc>>,
    ) -> Result<PendingEvent> {
        let block_time = match block_times.get(&log.block_number) {
            Some(ts) => *ts,
            None => {
                let ts = self.ledger.block_timestamp(log.block_number).await?;
                block_times.insert(log.block_number, ts);
                ts
            }
        };
        Ok(PendingEvent {
            event: decode_registry_log(log)?,
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.tx_hash.clone(),
            block_time,
        })
    }

    async fn persist_event(&self, pending: &PendingEvent) -> Result<()> {
        let row = match &pending.event {
            RegistryLogEvent::Registered {
                tee_address,
                raw_quote,
                already_exists,
            } => {
                if *already_exists {
                    debug!(address = %tee_address, "re-registration of an existing quote");
                }
                let fmspc = match ParsedQuote::from_bytes(raw_quote) {
                    Ok(parsed) => parsed.fmspc,
                    Err(e) => {
                        debug!(
                            address = %tee_address,
                            block = pending.block_number,
                            "quote parse failed, persisting without FMSPC: {e}"
                        );
                        String::new()
                    }
                };
                RegistryEventRow {
                    service_address: format!("{tee_address:#x}"),
                    block_number: pending.block_number,
                    log_index: pending.log_index,
                    event_type: EventType::Registered,
                    block_time: pending.block_time,
                    tx_hash: pending.tx_hash.clone(),
                    quote_bytes: raw_quote.clone(),
                    quote_length: raw_quote.len() as u32,
                    quote_hash: hex::encode(Sha256::digest(raw_quote)),
                    fmspc,
                    ingested_at: Utc::now(),
                }
            }
            RegistryLogEvent::Invalidated { tee_address } => RegistryEventRow {
                service_address: format!("{tee_address:#x}"),
                block_number: pending.block_number,
                log_index: pending.log_index,
                event_type: EventType::Invalidated,
                block_time: pending.block_time,
                tx_hash: pending.tx_hash.clone(),
                quote_bytes: Vec::new(),
                quote_length: 0,
                quote_hash: String::new(),
                fmspc: String::new(),
                ingested_at: Utc::now(),
            },
        };
        self.store.insert_registry_event(&row).await?;
        Ok(())
    }

    async fn save_checkpoint(&self) -> Result<()> {
        if let Some(checkpoint) = self.checkpoint {
            self.checkpoints
                .save_checkpoint(INGEST_SERVICE_NAME, checkpoint)
                .await
                .map_err(Error::from)?;
        }
        Ok(())
    }
}
