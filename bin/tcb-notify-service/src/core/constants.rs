// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Shared constants for the worker loops

/// Checkpoint name of the registry ingester.
pub const INGEST_SERVICE_NAME: &str = "ingest-registry";
/// Checkpoint name of the PCS poller.
pub const PCS_SERVICE_NAME: &str = "fetch-pcs";
/// Checkpoint name of the quote evaluator.
pub const EVALUATE_SERVICE_NAME: &str = "evaluate-quotes";

/// Delay between per-FMSPC TCB requests, to stay under the PCS rate limit.
pub const PCS_THROTTLE_MS: u64 = 100;

/// Maximum retry attempts for a single ledger RPC call.
pub const MAX_RPC_RETRIES: u32 = 3;
/// Base delay between ledger RPC retries.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
