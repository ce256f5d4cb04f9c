// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! The three long-running pipeline workers.
//!
//! Each worker owns a poll loop driven by its configured interval and exits
//! at the next safe point once the stop channel flips. Workers never block on
//! each other; all coordination goes through the store.

mod evaluator;
mod ingest;
mod pcs_poller;

pub use evaluator::{EvaluationStats, QuoteEvaluator};
pub use ingest::{IngesterConfig, RegistryIngester};
pub use pcs_poller::{FetchStats, PcsFetcher};

use std::time::Duration;
use tokio::sync::watch;

/// Sleep for `interval`, waking early when the stop channel flips.
///
/// Returns false when the worker should exit.
pub(crate) async fn idle(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    if *stop.borrow() {
        return false;
    }
    tokio::select! {
        _ = stop.changed() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}
