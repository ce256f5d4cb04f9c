// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! In-memory store backend.
//!
//! Implements every store contract with the same idempotency, active-view and
//! checkpoint semantics as the columnar backend. Used as the test double and
//! as an ephemeral dev backend.

use super::{
    AlertStore, CheckpointStore, EvaluationStore, RegistryStore, StoreError, StoreInspect, TcbStore,
};
use crate::model::{
    Checkpoint, EventType, FmspcRow, QuoteEvaluationRow, QuoteStatus, RegistryEventRow,
    StatusTransitionRow, TcbAlertRow, TcbInfoRow, TcbStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::warn;

#[derive(Default)]
struct Inner {
    events: BTreeMap<(String, u64, u32), RegistryEventRow>,
    fmspcs: BTreeMap<String, FmspcRow>,
    tcb_infos: BTreeMap<(String, u32), TcbInfoRow>,
    evaluations: Vec<QuoteEvaluationRow>,
    transitions: Vec<StatusTransitionRow>,
    alerts: Vec<TcbAlertRow>,
    checkpoints: BTreeMap<String, Checkpoint>,
}

impl Inner {
    fn active_quotes(&self) -> Vec<RegistryEventRow> {
        let mut latest: BTreeMap<&str, &RegistryEventRow> = BTreeMap::new();
        for row in self.events.values() {
            let slot = latest.entry(row.service_address.as_str()).or_insert(row);
            if (row.block_number, row.log_index) >= ((*slot).block_number, (*slot).log_index) {
                *slot = row;
            }
        }
        latest
            .into_values()
            .filter(|row| row.event_type == EventType::Registered)
            .cloned()
            .collect()
    }
}

/// A store keeping every row in process memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock means a panicking test, not a store defect
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All registry event rows, ordered by key.
    pub fn registry_events(&self) -> Vec<RegistryEventRow> {
        self.lock().events.values().cloned().collect()
    }

    /// All evaluation rows in insertion order.
    pub fn evaluations(&self) -> Vec<QuoteEvaluationRow> {
        self.lock().evaluations.clone()
    }

    /// All transition rows in insertion order.
    pub fn transitions(&self) -> Vec<StatusTransitionRow> {
        self.lock().transitions.clone()
    }

    /// All alert rows in insertion order.
    pub fn alerts(&self) -> Vec<TcbAlertRow> {
        self.lock().alerts.clone()
    }

    /// All cached TCB bundles, ordered by key.
    pub fn tcb_infos(&self) -> Vec<TcbInfoRow> {
        self.lock().tcb_infos.values().cloned().collect()
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn insert_registry_event(&self, row: &RegistryEventRow) -> Result<(), StoreError> {
        let key = (
            row.service_address.clone(),
            row.block_number,
            row.log_index,
        );
        // idempotent: a re-inserted key keeps the first row
        self.lock().events.entry(key).or_insert_with(|| row.clone());
        Ok(())
    }

    async fn active_quotes(&self) -> Result<Vec<RegistryEventRow>, StoreError> {
        Ok(self.lock().active_quotes())
    }

    async fn count_active_quotes_by_fmspc(&self, fmspc: &str) -> Result<u64, StoreError> {
        Ok(self
            .lock()
            .active_quotes()
            .iter()
            .filter(|row| row.fmspc == fmspc)
            .count() as u64)
    }
}

#[async_trait]
impl TcbStore for MemoryStore {
    async fn upsert_fmspc(&self, fmspc: &str, platform: &str) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut inner = self.lock();
        inner
            .fmspcs
            .entry(fmspc.to_string())
            .and_modify(|row| {
                row.platform = platform.to_string();
                row.last_seen = now;
                row.active = true;
            })
            .or_insert_with(|| FmspcRow {
                fmspc: fmspc.to_string(),
                platform: platform.to_string(),
                first_seen: now,
                last_seen: now,
                active: true,
            });
        Ok(())
    }

    async fn deactivate_missing_fmspcs(&self, seen: &[String]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        for row in inner.fmspcs.values_mut() {
            if !seen.contains(&row.fmspc) {
                row.active = false;
            }
        }
        Ok(())
    }

    async fn insert_tcb_info(&self, row: &TcbInfoRow) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let current_max = inner
            .tcb_infos
            .range((row.fmspc.clone(), 0)..=(row.fmspc.clone(), u32::MAX))
            .next_back()
            .map(|((_, eval), _)| *eval);
        let key = (row.fmspc.clone(), row.tcb_evaluation_data_number);
        if inner.tcb_infos.contains_key(&key) {
            return Ok(()); // idempotent duplicate
        }
        if let Some(max) = current_max {
            if row.tcb_evaluation_data_number < max {
                return Err(StoreError::Consistency(format!(
                    "TCB info for {} would rewind evaluation number {} below {}",
                    row.fmspc, row.tcb_evaluation_data_number, max
                )));
            }
        }
        inner.tcb_infos.insert(key, row.clone());
        Ok(())
    }

    async fn latest_tcb_info(&self, fmspc: &str) -> Result<Option<TcbInfoRow>, StoreError> {
        Ok(self
            .lock()
            .tcb_infos
            .range((fmspc.to_string(), 0)..=(fmspc.to_string(), u32::MAX))
            .next_back()
            .map(|(_, row)| row.clone()))
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn insert_evaluation(&self, row: &QuoteEvaluationRow) -> Result<(), StoreError> {
        self.lock().evaluations.push(row.clone());
        Ok(())
    }

    async fn last_evaluation(
        &self,
        service_address: &str,
        quote_hash: &str,
    ) -> Result<Option<(QuoteStatus, TcbStatus)>, StoreError> {
        Ok(self
            .lock()
            .evaluations
            .iter()
            .filter(|row| row.service_address == service_address && row.quote_hash == quote_hash)
            .max_by_key(|row| row.evaluated_at)
            .map(|row| (row.status, row.tcb_status)))
    }

    async fn insert_status_transition(&self, row: &StatusTransitionRow) -> Result<(), StoreError> {
        self.lock().transitions.push(row.clone());
        Ok(())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, row: &TcbAlertRow) -> Result<(), StoreError> {
        self.lock().alerts.push(row.clone());
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_checkpoint(&self, service: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.lock().checkpoints.get(service).copied())
    }

    async fn save_checkpoint(
        &self,
        service: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.checkpoints.get(service) {
            Some(current) if checkpoint < *current => {
                warn!(
                    service,
                    ?current,
                    ?checkpoint,
                    "refusing to rewind checkpoint"
                );
            }
            _ => {
                inner.checkpoints.insert(service.to_string(), checkpoint);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreInspect for MemoryStore {
    async fn fmspcs(&self) -> Result<Vec<FmspcRow>, StoreError> {
        Ok(self.lock().fmspcs.values().cloned().collect())
    }

    async fn unacknowledged_alerts(&self) -> Result<Vec<TcbAlertRow>, StoreError> {
        let mut alerts: Vec<TcbAlertRow> = self
            .lock()
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }
}
