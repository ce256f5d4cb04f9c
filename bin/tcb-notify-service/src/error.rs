// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Error types for the monitoring workers

use tcb_notify::{quote::error::QuoteParseError, store::StoreError};
use thiserror::Error;

/// Result type used throughout the service
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while running the workers
#[derive(Error, Debug)]
pub enum Error {
    /// Error communicating with an HTTP server
    #[error("HTTP request failed with status {status_code}: {message}")]
    Http {
        /// HTTP status code
        status_code: u16,
        /// Error message
        message: String,
    },

    /// Error communicating with the ledger JSON-RPC server
    #[error("JSON-RPC error: {0}")]
    JsonRpc(String),

    /// JSON-RPC response has an invalid format
    #[error("JSON-RPC response has an invalid format: {0}")]
    JsonRpcInvalidResponse(String),

    /// Error from the store layer
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Error from the Intel PCS client
    #[error(transparent)]
    Pcs(#[from] intel_pcs_api::PcsApiError),

    /// The vendor returned JSON of an unexpected shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error parsing an attestation quote
    #[error(transparent)]
    QuoteParse(#[from] QuoteParseError),

    /// Operation interrupted by the stop signal
    #[error("Operation interrupted")]
    Interrupted,

    #[error(transparent)]
    FromHex(#[from] hex::FromHexError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Utility functions for working with errors
impl Error {
    /// Create a new protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Create a new internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Self::Http {
            status_code: value.status().map(|v| v.as_u16()).unwrap_or(0),
            message: value.to_string(),
        }
    }
}
