// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Intel PCS API Client
//!
//! A thin client for the two Provisioning Certification Service endpoints the
//! TCB monitoring pipeline consumes: the FMSPC catalog and per-FMSPC TDX TCB
//! bundles (API v4). Responses are returned as the verbatim JSON body so
//! callers can both decode them and persist them for audit.
//!
//! Example
//! ```rust,no_run
//! use intel_pcs_api::{PcsClient, PcsApiError, PlatformFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PcsApiError> {
//!     let client = PcsClient::new()?;
//!     let fmspcs = client.get_fmspcs(Some(PlatformFilter::All)).await?;
//!     println!("FMSPC catalog: {fmspcs}");
//!
//!     match client.get_tdx_tcb_info("30606a000000").await {
//!         Ok(bundle) => println!("TCB bundle: {bundle}"),
//!         Err(PcsApiError::NotFound) => println!("no TDX bundle for this FMSPC"),
//!         Err(e) => eprintln!("error: {e}"),
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]

mod client;
mod error;
mod responses;
mod types;

pub use client::PcsClient;
pub use error::PcsApiError;
pub use responses::{FmspcJsonResponse, TcbInfoJsonResponse};
pub use types::PlatformFilter;
