// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Quote evaluation worker.
//!
//! Each cycle re-evaluates every currently-active attestation against the
//! latest cached TCB bundle for its FMSPC, appends the verdict and records a
//! status transition whenever the verdict differs from the previous one for
//! the same `(service_address, quote_hash)`.

use crate::{
    core::EVALUATE_SERVICE_NAME,
    error::Result,
    workers::idle,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tcb_notify::{
    model::{QuoteEvaluationRow, QuoteStatus, RegistryEventRow, StatusTransitionRow, TcbStatus},
    quote::{ParsedQuote, Quote},
    store::{EvaluationStore, RegistryStore},
    verify::{classify, QuoteVerifier, VerifyOptions},
};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Per-cycle evaluation statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationStats {
    /// Active quotes seen this cycle.
    pub total: usize,
    /// Quotes with a `Valid` verdict.
    pub valid: usize,
    /// Quotes with any other verdict.
    pub invalid: usize,
    /// Quotes whose verdict changed since the previous evaluation.
    pub changed: usize,
}

/// The quote evaluation worker.
pub struct QuoteEvaluator {
    registry_store: Arc<dyn RegistryStore>,
    evaluation_store: Arc<dyn EvaluationStore>,
    verifier: Arc<dyn QuoteVerifier>,
    options: VerifyOptions,
    poll_interval: Duration,
}

impl QuoteEvaluator {
    /// Create the worker.
    pub fn new(
        registry_store: Arc<dyn RegistryStore>,
        evaluation_store: Arc<dyn EvaluationStore>,
        verifier: Arc<dyn QuoteVerifier>,
        options: VerifyOptions,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry_store,
            evaluation_store,
            verifier,
            options,
            poll_interval,
        }
    }

    /// Run until the stop channel flips.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            service = EVALUATE_SERVICE_NAME,
            poll_interval = ?self.poll_interval,
            "Starting quote evaluator worker"
        );

        loop {
            match self.tick().await {
                Ok(stats) => info!(
                    total = stats.total,
                    valid = stats.valid,
                    invalid = stats.invalid,
                    changed = stats.changed,
                    "Completed quote evaluation cycle"
                ),
                Err(e) => error!("Quote evaluation cycle failed: {e}"),
            }
            if !idle(&mut stop, self.poll_interval).await {
                info!("Quote evaluator worker stopped");
                return Ok(());
            }
        }
    }

    /// One evaluation cycle over the active-quote view.
    pub async fn tick(&self) -> Result<EvaluationStats> {
        let quotes = self.registry_store.active_quotes().await?;
        let mut stats = EvaluationStats {
            total: quotes.len(),
            ..EvaluationStats::default()
        };

        for quote in &quotes {
            let evaluation = self.evaluate(quote).await;

            match self.record(&evaluation).await {
                Ok(changed) => {
                    if changed {
                        stats.changed += 1;
                    }
                }
                Err(e) => {
                    error!(
                        address = quote.service_address,
                        "Failed to store evaluation: {e}"
                    );
                    continue;
                }
            }

            if evaluation.status == QuoteStatus::Valid {
                stats.valid += 1;
            } else {
                stats.invalid += 1;
            }
        }

        Ok(stats)
    }

    /// Evaluate one active registration.
    async fn evaluate(&self, row: &RegistryEventRow) -> QuoteEvaluationRow {
        let mut evaluation = QuoteEvaluationRow {
            service_address: row.service_address.clone(),
            quote_hash: row.quote_hash.clone(),
            quote_length: row.quote_length,
            fmspc: String::new(),
            status: QuoteStatus::InvalidFormat,
            tcb_status: TcbStatus::NotApplicable,
            error_message: String::new(),
            tcb_components: Default::default(),
            mr_td: String::new(),
            mr_seam: String::new(),
            mr_signer_seam: String::new(),
            report_data: String::new(),
            block_number: row.block_number,
            log_index: row.log_index,
            block_time: row.block_time,
            evaluated_at: Utc::now(),
        };

        // structural parse gates verification; extraction is best-effort
        let quote = match Quote::parse(&row.quote_bytes) {
            Ok(quote) => quote,
            Err(e) => {
                evaluation.error_message = e.to_string();
                return evaluation;
            }
        };
        let parsed = ParsedQuote::from_quote(quote);
        evaluation.fmspc = parsed.fmspc.clone();
        evaluation.tcb_components = parsed.tcb_components;
        evaluation.mr_td = parsed.mr_td;
        evaluation.mr_seam = parsed.mr_seam;
        evaluation.mr_signer_seam = parsed.mr_signer_seam;
        evaluation.report_data = parsed.report_data;

        let outcome = self.verifier.verify(&row.quote_bytes, &self.options).await;
        if let Err(e) = &outcome {
            evaluation.error_message = e.to_string();
        }
        let (status, tcb_status) = classify(&outcome);
        evaluation.status = status;
        evaluation.tcb_status = tcb_status;

        debug!(
            fmspc = evaluation.fmspc,
            status = %evaluation.status,
            tcb_status = %evaluation.tcb_status,
            "Evaluated quote"
        );

        evaluation
    }

    /// Persist the verdict; append a transition when it differs from the
    /// previous one. Returns true when the verdict changed.
    async fn record(&self, evaluation: &QuoteEvaluationRow) -> Result<bool> {
        let previous = self
            .evaluation_store
            .last_evaluation(&evaluation.service_address, &evaluation.quote_hash)
            .await?;

        self.evaluation_store.insert_evaluation(evaluation).await?;

        let Some((previous_status, previous_tcb_status)) = previous else {
            return Ok(false); // first evaluation, nothing to compare against
        };
        if previous_status == evaluation.status && previous_tcb_status == evaluation.tcb_status {
            return Ok(false);
        }

        let transition = StatusTransitionRow {
            service_address: evaluation.service_address.clone(),
            quote_hash: evaluation.quote_hash.clone(),
            previous_status,
            new_status: evaluation.status,
            previous_tcb_status,
            new_tcb_status: evaluation.tcb_status,
            changed_at: evaluation.evaluated_at,
        };
        if let Err(e) = self.evaluation_store.insert_status_transition(&transition).await {
            error!(
                address = evaluation.service_address,
                "Failed to record status change: {e}"
            );
        } else {
            info!(
                address = evaluation.service_address,
                prev_status = %previous_status,
                new_status = %evaluation.status,
                prev_tcb = %previous_tcb_status,
                new_tcb = %evaluation.tcb_status,
                "Quote status changed"
            );
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tcb_notify::model::EventType;
    use tcb_notify::quote::{MIN_QUOTE_BYTE_LEN, QUOTE_VERSION, TEE_TYPE_TDX};
    use tcb_notify::store::MemoryStore;
    use tcb_notify::verify::{VerifyError, VerifyErrorKind};

    /// Verifier returning a scripted sequence of outcomes.
    struct ScriptedVerifier {
        outcomes: Mutex<Vec<std::result::Result<(), VerifyError>>>,
    }

    impl ScriptedVerifier {
        fn new(outcomes: Vec<std::result::Result<(), VerifyError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
            })
        }
    }

    #[async_trait]
    impl QuoteVerifier for ScriptedVerifier {
        async fn verify(
            &self,
            _quote: &[u8],
            _options: &VerifyOptions,
        ) -> std::result::Result<(), VerifyError> {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            }
        }
    }

    fn structural_quote() -> Vec<u8> {
        let mut raw = Vec::with_capacity(MIN_QUOTE_BYTE_LEN);
        raw.extend_from_slice(&QUOTE_VERSION.to_le_bytes());
        raw.extend_from_slice(&2u16.to_le_bytes());
        raw.extend_from_slice(&TEE_TYPE_TDX.to_le_bytes());
        raw.extend_from_slice(&[0u8; 40]); // rest of the header
        raw.resize(MIN_QUOTE_BYTE_LEN, 0);
        raw
    }

    fn registration(address: &str, quote: Vec<u8>) -> RegistryEventRow {
        RegistryEventRow {
            service_address: address.to_string(),
            block_number: 100,
            log_index: 2,
            event_type: EventType::Registered,
            block_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            tx_hash: format!("0x{:064x}", 5),
            quote_length: quote.len() as u32,
            quote_hash: hex::encode(sha2::Sha256::digest(&quote)),
            quote_bytes: quote,
            fmspc: String::new(),
            ingested_at: Utc::now(),
        }
    }

    use sha2::Digest;

    fn evaluator(store: Arc<MemoryStore>, verifier: Arc<dyn QuoteVerifier>) -> QuoteEvaluator {
        QuoteEvaluator::new(
            store.clone(),
            store,
            verifier,
            VerifyOptions::default(),
            Duration::from_secs(300),
        )
    }

    const ADDR_A: &str = "0x1111111111111111111111111111111111111111";

    #[tokio::test]
    async fn empty_active_view_completes_with_no_rows() {
        let store = Arc::new(MemoryStore::new());
        let worker = evaluator(store.clone(), ScriptedVerifier::new(vec![Ok(())]));

        let stats = worker.tick().await.unwrap();

        assert_eq!(stats, EvaluationStats::default());
        assert!(store.evaluations().is_empty());
    }

    #[tokio::test]
    async fn valid_verdict_is_recorded_without_transition() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_registry_event(&registration(ADDR_A, structural_quote()))
            .await
            .unwrap();
        let worker = evaluator(store.clone(), ScriptedVerifier::new(vec![Ok(())]));

        let stats = worker.tick().await.unwrap();

        assert_eq!(stats.total, 1);
        assert_eq!(stats.valid, 1);
        assert_eq!(stats.changed, 0);
        let evaluations = store.evaluations();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].status, QuoteStatus::Valid);
        assert_eq!(evaluations[0].tcb_status, TcbStatus::UpToDate);
        assert_eq!(evaluations[0].block_number, 100);
        assert_eq!(evaluations[0].log_index, 2);
        assert!(store.transitions().is_empty());
    }

    #[tokio::test]
    async fn tcb_bump_produces_exactly_one_transition() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_registry_event(&registration(ADDR_A, structural_quote()))
            .await
            .unwrap();
        let verifier = ScriptedVerifier::new(vec![
            Ok(()),
            Err(VerifyError::new(VerifyErrorKind::OutOfDate, "bump")),
        ]);
        let worker = evaluator(store.clone(), verifier);

        worker.tick().await.unwrap();
        let stats = worker.tick().await.unwrap();
        assert_eq!(stats.changed, 1);
        // a third cycle with the same verdict adds no transition
        worker.tick().await.unwrap();

        let transitions = store.transitions();
        assert_eq!(transitions.len(), 1);
        let t = &transitions[0];
        assert_eq!(t.previous_status, QuoteStatus::Valid);
        assert_eq!(t.previous_tcb_status, TcbStatus::UpToDate);
        assert_eq!(t.new_status, QuoteStatus::ValidSignature);
        assert_eq!(t.new_tcb_status, TcbStatus::OutOfDate);

        assert_eq!(store.evaluations().len(), 3);
    }

    #[tokio::test]
    async fn unparseable_quote_is_invalid_format() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_registry_event(&registration(ADDR_A, vec![0xffu8; 200]))
            .await
            .unwrap();
        let worker = evaluator(store.clone(), ScriptedVerifier::new(vec![Ok(())]));

        let stats = worker.tick().await.unwrap();

        assert_eq!(stats.invalid, 1);
        let evaluations = store.evaluations();
        assert_eq!(evaluations[0].status, QuoteStatus::InvalidFormat);
        assert_eq!(evaluations[0].tcb_status, TcbStatus::NotApplicable);
        assert!(!evaluations[0].error_message.is_empty());
    }

    #[tokio::test]
    async fn invalidated_addresses_are_not_evaluated() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_registry_event(&registration(ADDR_A, structural_quote()))
            .await
            .unwrap();
        let mut invalidation = registration(ADDR_A, Vec::new());
        invalidation.event_type = EventType::Invalidated;
        invalidation.block_number = 150;
        invalidation.log_index = 0;
        invalidation.quote_hash = String::new();
        store.insert_registry_event(&invalidation).await.unwrap();

        let worker = evaluator(store.clone(), ScriptedVerifier::new(vec![Ok(())]));
        let stats = worker.tick().await.unwrap();

        assert_eq!(stats.total, 0);
        assert!(store.evaluations().is_empty());
    }

    #[tokio::test]
    async fn signature_failure_maps_to_invalid_signature() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_registry_event(&registration(ADDR_A, structural_quote()))
            .await
            .unwrap();
        let verifier = ScriptedVerifier::new(vec![Err(VerifyError::new(
            VerifyErrorKind::Signature,
            "bad signature",
        ))]);
        let worker = evaluator(store.clone(), verifier);

        worker.tick().await.unwrap();

        let evaluations = store.evaluations();
        assert_eq!(evaluations[0].status, QuoteStatus::InvalidSignature);
        assert_eq!(evaluations[0].tcb_status, TcbStatus::NotApplicable);
        assert_eq!(evaluations[0].error_message, "Signature: bad signature");
    }
}
