// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

use reqwest::StatusCode;
use thiserror::Error;

/// Errors of the Intel PCS API client.
///
/// Non-success statuses are mapped onto the cases the poller keys on: a
/// missing TDX bundle, rate limiting, and everything else with whatever
/// diagnostics the service put into its error headers.
#[derive(Error, Debug)]
pub enum PcsApiError {
    /// The request never produced a usable response.
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// An endpoint URL could not be built.
    #[error("bad endpoint URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// HTTP 404: for the TCB endpoint this means the FMSPC has no TDX bundle.
    #[error("resource not found")]
    NotFound,

    /// HTTP 429: the PCS rate limit was hit.
    #[error("rate limited, retry after {retry_after}s (request {request_id})")]
    TooManyRequests {
        /// Request identifier from the service, for tracing.
        request_id: String,
        /// Seconds to back off, from the Retry-After header; 60 when absent.
        retry_after: u64,
    },

    /// Any other non-success status.
    #[error("PCS returned {status} (request {request_id}): {error_code:?} {error_message:?}")]
    ApiError {
        /// HTTP status of the response.
        status: StatusCode,
        /// Request identifier from the service, for tracing.
        request_id: String,
        /// Error code from the Error-Code header, when present.
        error_code: Option<String>,
        /// Error detail from the Error-Message header, when present.
        error_message: Option<String>,
    },
}
