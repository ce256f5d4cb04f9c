// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Shared domain types for the monitoring pipeline.
//!
//! These are the row contracts of the columnar store and the status
//! taxonomies used by the evaluator. Ownership is split by worker: the
//! ingester writes [`RegistryEventRow`] and its checkpoint, the PCS poller
//! writes [`FmspcRow`], [`TcbInfoRow`] and [`TcbAlertRow`], the evaluator
//! writes [`QuoteEvaluationRow`] and [`StatusTransitionRow`]. All workers
//! read freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Verdict on an attestation quote as a whole.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum QuoteStatus {
    /// Signature and TCB level are both good.
    Valid,
    /// Signature chain verifies, but the TCB level needs attention.
    ValidSignature,
    /// The quote failed verification for a reason other than signature or format.
    Invalid,
    /// The signature or certificate chain does not verify.
    InvalidSignature,
    /// The quote could not be parsed at all.
    InvalidFormat,
}

impl Display for QuoteStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuoteStatus::Valid => "Valid",
            QuoteStatus::ValidSignature => "ValidSignature",
            QuoteStatus::Invalid => "Invalid",
            QuoteStatus::InvalidSignature => "InvalidSignature",
            QuoteStatus::InvalidFormat => "InvalidFormat",
        };
        write!(f, "{s}")
    }
}

impl FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Valid" => Ok(QuoteStatus::Valid),
            "ValidSignature" => Ok(QuoteStatus::ValidSignature),
            "Invalid" => Ok(QuoteStatus::Invalid),
            "InvalidSignature" => Ok(QuoteStatus::InvalidSignature),
            "InvalidFormat" => Ok(QuoteStatus::InvalidFormat),
            _ => Err(format!("Invalid quote status: {s}")),
        }
    }
}

/// TCB status of a quote relative to the latest cached TCB bundle.
///
/// The string forms follow Intel's `tcbStatus` values so rows can be compared
/// with PCS responses directly.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum TcbStatus {
    /// All TCB components meet the most recent level.
    UpToDate,
    /// Software hardening is needed.
    #[serde(rename = "SWHardeningNeeded")]
    SwHardeningNeeded,
    /// Platform configuration update is needed.
    ConfigurationNeeded,
    /// Both configuration and software hardening are needed.
    #[serde(rename = "ConfigurationAndSWHardeningNeeded")]
    ConfigurationAndSwHardeningNeeded,
    /// TCB components are below the current requirements.
    OutOfDate,
    /// Out of date and the configuration also needs an update.
    OutOfDateConfigurationNeeded,
    /// The TCB level has been revoked.
    Revoked,
    /// No TCB statement applies (signature or format failures).
    #[serde(rename = "N/A")]
    NotApplicable,
    /// The status could not be determined.
    #[serde(other)]
    Unknown,
}

impl Display for TcbStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TcbStatus::UpToDate => "UpToDate",
            TcbStatus::SwHardeningNeeded => "SWHardeningNeeded",
            TcbStatus::ConfigurationNeeded => "ConfigurationNeeded",
            TcbStatus::ConfigurationAndSwHardeningNeeded => "ConfigurationAndSWHardeningNeeded",
            TcbStatus::OutOfDate => "OutOfDate",
            TcbStatus::OutOfDateConfigurationNeeded => "OutOfDateConfigurationNeeded",
            TcbStatus::Revoked => "Revoked",
            TcbStatus::Unknown => "Unknown",
            TcbStatus::NotApplicable => "N/A",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TcbStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UpToDate" => Ok(TcbStatus::UpToDate),
            "SWHardeningNeeded" => Ok(TcbStatus::SwHardeningNeeded),
            "ConfigurationNeeded" => Ok(TcbStatus::ConfigurationNeeded),
            "ConfigurationAndSWHardeningNeeded" => Ok(TcbStatus::ConfigurationAndSwHardeningNeeded),
            "OutOfDate" => Ok(TcbStatus::OutOfDate),
            "OutOfDateConfigurationNeeded" => Ok(TcbStatus::OutOfDateConfigurationNeeded),
            "Revoked" => Ok(TcbStatus::Revoked),
            "Unknown" => Ok(TcbStatus::Unknown),
            "N/A" => Ok(TcbStatus::NotApplicable),
            _ => Err(format!("Invalid TCB status: {s}")),
        }
    }
}

/// Registry log event kind.
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub enum EventType {
    /// A TEE service registered an attestation quote.
    Registered,
    /// A TEE service's attestation was invalidated.
    Invalidated,
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Registered => write!(f, "Registered"),
            EventType::Invalidated => write!(f, "Invalidated"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Registered" => Ok(EventType::Registered),
            "Invalidated" => Ok(EventType::Invalidated),
            _ => Err(format!("Invalid event type: {s}")),
        }
    }
}

/// TCB component vectors carried by a quote, compared against PCS TCB levels.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcbComponents {
    /// SGX component SVNs from the PCK leaf certificate.
    pub sgx_components: [u8; 16],
    /// TDX component SVNs, the raw TEE TCB SVN of the TD report.
    pub tdx_components: [u8; 16],
    /// PCE SVN from the PCK leaf certificate.
    pub pce_svn: u16,
}

/// One ledger event for a TEE service, append-only.
///
/// Unique per `(service_address, block_number, log_index)`; re-inserting the
/// same key is a no-op at the store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEventRow {
    /// TEE service address, `0x`-prefixed lowercase hex.
    pub service_address: String,
    /// Block the log was emitted in.
    pub block_number: u64,
    /// Position of the log within the block.
    pub log_index: u32,
    /// Registered or Invalidated.
    pub event_type: EventType,
    /// Block timestamp.
    pub block_time: DateTime<Utc>,
    /// Transaction hash, hex(32).
    pub tx_hash: String,
    /// Raw attestation quote; empty for invalidations.
    pub quote_bytes: Vec<u8>,
    /// Length of `quote_bytes`.
    pub quote_length: u32,
    /// SHA-256 of `quote_bytes` as lowercase hex; empty for invalidations.
    pub quote_hash: String,
    /// FMSPC extracted at ingest, lowercase hex(6); empty when extraction failed.
    pub fmspc: String,
    /// When the ingester persisted the row.
    pub ingested_at: DateTime<Utc>,
}

/// Catalog entry for an FMSPC known to the PCS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FmspcRow {
    /// The FMSPC, lowercase hex(6).
    pub fmspc: String,
    /// Platform tag reported by the PCS; "ALL" when unknown.
    pub platform: String,
    /// First catalog fetch that contained this FMSPC.
    pub first_seen: DateTime<Utc>,
    /// Most recent catalog fetch that contained this FMSPC.
    pub last_seen: DateTime<Utc>,
    /// False once the FMSPC is absent from the latest successful catalog fetch.
    pub active: bool,
}

/// A TCB bundle snapshot for one FMSPC at one evaluation data number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbInfoRow {
    /// The FMSPC, lowercase hex(6).
    pub fmspc: String,
    /// Intel's monotonically increasing bundle identifier.
    pub tcb_evaluation_data_number: u32,
    /// Bundle issue date.
    pub issue_date: DateTime<Utc>,
    /// Scheduled next update.
    pub next_update: DateTime<Utc>,
    /// TCB type from the bundle.
    pub tcb_type: u32,
    /// The ordered TCB level list, serialized as JSON.
    pub tcb_levels_json: String,
    /// Full vendor response verbatim, for audit.
    pub raw_json: String,
    /// When the poller fetched the bundle.
    pub fetched_at: DateTime<Utc>,
}

/// One evaluation verdict for an active quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteEvaluationRow {
    /// TEE service address.
    pub service_address: String,
    /// SHA-256 of the quote, lowercase hex.
    pub quote_hash: String,
    /// Quote length in bytes.
    pub quote_length: u32,
    /// FMSPC of the quote; empty when extraction failed.
    pub fmspc: String,
    /// Overall verdict.
    pub status: QuoteStatus,
    /// TCB verdict.
    pub tcb_status: TcbStatus,
    /// Error detail for non-Valid verdicts; empty on success.
    pub error_message: String,
    /// TCB component vectors extracted from the quote.
    pub tcb_components: TcbComponents,
    /// MRTD measurement, hex; empty when unavailable.
    pub mr_td: String,
    /// MRSEAM measurement, hex; empty when unavailable.
    pub mr_seam: String,
    /// MRSIGNERSEAM measurement, hex; empty when unavailable.
    pub mr_signer_seam: String,
    /// Report data, hex; empty when unavailable.
    pub report_data: String,
    /// Block of the originating registration event.
    pub block_number: u64,
    /// Log index of the originating registration event.
    pub log_index: u32,
    /// Block time of the originating registration event.
    pub block_time: DateTime<Utc>,
    /// When this evaluation ran.
    pub evaluated_at: DateTime<Utc>,
}

/// A change of `(status, tcb_status)` between two successive evaluations of
/// the same quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransitionRow {
    /// TEE service address.
    pub service_address: String,
    /// SHA-256 of the quote, lowercase hex.
    pub quote_hash: String,
    /// Status of the previous evaluation.
    pub previous_status: QuoteStatus,
    /// Status of the current evaluation.
    pub new_status: QuoteStatus,
    /// TCB status of the previous evaluation.
    pub previous_tcb_status: TcbStatus,
    /// TCB status of the current evaluation.
    pub new_tcb_status: TcbStatus,
    /// When the change was observed.
    pub changed_at: DateTime<Utc>,
}

/// Alert raised when the PCS publishes a new TCB evaluation data number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcbAlertRow {
    /// Affected FMSPC, lowercase hex(6).
    pub fmspc: String,
    /// Previously cached evaluation data number.
    pub old_eval_number: u32,
    /// Newly published evaluation data number.
    pub new_eval_number: u32,
    /// Count of distinct active registrations carrying this FMSPC.
    pub affected_quotes_count: u32,
    /// Free-form description including the severity tag.
    pub details: String,
    /// When the alert was raised.
    pub created_at: DateTime<Utc>,
    /// Operator acknowledgement flag; false on insert.
    pub acknowledged: bool,
}

/// Resumption position of a pipeline worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last fully processed block.
    pub last_block: u64,
    /// Last fully processed log index within that block.
    pub last_log_index: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcb_status_round_trips_wire_strings() {
        for (status, wire) in [
            (TcbStatus::UpToDate, "UpToDate"),
            (TcbStatus::SwHardeningNeeded, "SWHardeningNeeded"),
            (
                TcbStatus::ConfigurationAndSwHardeningNeeded,
                "ConfigurationAndSWHardeningNeeded",
            ),
            (TcbStatus::OutOfDateConfigurationNeeded, "OutOfDateConfigurationNeeded"),
            (TcbStatus::NotApplicable, "N/A"),
        ] {
            assert_eq!(status.to_string(), wire);
            assert_eq!(wire.parse::<TcbStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{wire}\"")
            );
        }
    }

    #[test]
    fn unknown_tcb_status_deserializes_to_unknown() {
        let status: TcbStatus = serde_json::from_str("\"SomeFutureStatus\"").unwrap();
        assert_eq!(status, TcbStatus::Unknown);
    }

    #[test]
    fn checkpoint_ordering_is_block_then_index() {
        let a = Checkpoint {
            last_block: 100,
            last_log_index: 7,
        };
        let b = Checkpoint {
            last_block: 101,
            last_log_index: 0,
        };
        assert!(a < b);
        assert!(
            Checkpoint {
                last_block: 100,
                last_log_index: 8
            } > a
        );
    }
}
