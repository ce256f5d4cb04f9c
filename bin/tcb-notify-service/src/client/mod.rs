// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Client modules for external API communication

mod ledger;
mod retry;

pub use ledger::{
    decode_registry_log, EthLedgerClient, Invalidated, LedgerClient, RawLog, Registered,
    RegistryLogEvent,
};
pub use retry::{RetryConfig, RetryHelper};
