// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! The quote verifier boundary and the verdict classification table.
//!
//! Verification is pluggable: anything implementing [`QuoteVerifier`] can sit
//! behind the evaluator, including a full cryptographic DCAP verifier. The
//! crate ships [`TcbLevelVerifier`], which classifies a quote's component
//! SVNs against the latest cached TCB bundle for its FMSPC. Mapping a
//! verifier outcome to the `(status, tcbStatus)` verdict is the evaluator's
//! responsibility and lives here as the table-driven [`classify`].

use crate::{
    model::{QuoteStatus, TcbStatus},
    quote::Quote,
    store::TcbStore,
    tcb::{match_level, TcbLevel},
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Options forwarded to the verifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyOptions {
    /// Allow the verifier to fetch additional vendor collateral.
    pub get_collateral: bool,
    /// Consult revocation lists during verification.
    pub check_revocations: bool,
}

/// Failure classes a verifier can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyErrorKind {
    /// TCB components are below every current level.
    OutOfDate,
    /// Out of date and the platform configuration also needs an update.
    OutOfDateConfigurationNeeded,
    /// Software hardening is needed.
    SwHardeningNeeded,
    /// Configuration and software hardening are both needed.
    ConfigurationAndSwHardeningNeeded,
    /// Platform configuration update is needed.
    ConfigurationNeeded,
    /// The TCB level has been revoked.
    Revoked,
    /// A TCB statement could not be derived.
    TcbUnknown,
    /// The quote signature does not verify.
    Signature,
    /// The certificate chain is missing, malformed or untrusted.
    CertificateChain,
    /// Anything else.
    Other,
}

/// A verification failure with its kind tag.
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct VerifyError {
    /// Failure class.
    pub kind: VerifyErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl VerifyError {
    /// Construct an error of `kind` with a message.
    pub fn new(kind: VerifyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Opaque verifier of attestation quotes.
#[async_trait]
pub trait QuoteVerifier: Send + Sync {
    /// Verify `quote`, returning `Ok(())` only for an up-to-date quote.
    async fn verify(&self, quote: &[u8], options: &VerifyOptions) -> Result<(), VerifyError>;
}

/// Map a verifier outcome onto the `(status, tcbStatus)` verdict.
pub fn classify(outcome: &Result<(), VerifyError>) -> (QuoteStatus, TcbStatus) {
    let Err(e) = outcome else {
        return (QuoteStatus::Valid, TcbStatus::UpToDate);
    };
    match e.kind {
        VerifyErrorKind::OutOfDate => (QuoteStatus::ValidSignature, TcbStatus::OutOfDate),
        VerifyErrorKind::OutOfDateConfigurationNeeded => (
            QuoteStatus::ValidSignature,
            TcbStatus::OutOfDateConfigurationNeeded,
        ),
        VerifyErrorKind::SwHardeningNeeded => {
            (QuoteStatus::ValidSignature, TcbStatus::SwHardeningNeeded)
        }
        VerifyErrorKind::ConfigurationAndSwHardeningNeeded => (
            QuoteStatus::ValidSignature,
            TcbStatus::ConfigurationAndSwHardeningNeeded,
        ),
        VerifyErrorKind::ConfigurationNeeded => {
            (QuoteStatus::ValidSignature, TcbStatus::ConfigurationNeeded)
        }
        VerifyErrorKind::Revoked => (QuoteStatus::ValidSignature, TcbStatus::Revoked),
        VerifyErrorKind::TcbUnknown => (QuoteStatus::ValidSignature, TcbStatus::Unknown),
        VerifyErrorKind::Signature | VerifyErrorKind::CertificateChain => {
            (QuoteStatus::InvalidSignature, TcbStatus::NotApplicable)
        }
        VerifyErrorKind::Other => (QuoteStatus::Invalid, TcbStatus::NotApplicable),
    }
}

fn kind_for_status(status: TcbStatus) -> VerifyErrorKind {
    match status {
        TcbStatus::OutOfDate => VerifyErrorKind::OutOfDate,
        TcbStatus::OutOfDateConfigurationNeeded => VerifyErrorKind::OutOfDateConfigurationNeeded,
        TcbStatus::SwHardeningNeeded => VerifyErrorKind::SwHardeningNeeded,
        TcbStatus::ConfigurationAndSwHardeningNeeded => {
            VerifyErrorKind::ConfigurationAndSwHardeningNeeded
        }
        TcbStatus::ConfigurationNeeded => VerifyErrorKind::ConfigurationNeeded,
        TcbStatus::Revoked => VerifyErrorKind::Revoked,
        TcbStatus::UpToDate | TcbStatus::Unknown | TcbStatus::NotApplicable => {
            VerifyErrorKind::TcbUnknown
        }
    }
}

/// Classifies quotes against the latest cached TCB bundle for their FMSPC.
///
/// Levels are scanned highest-security first; the first level whose SGX, TDX
/// and PCE requirements the quote meets determines the outcome. A quote that
/// meets no level is out of date. Cryptographic signature verification is out
/// of this verifier's scope.
pub struct TcbLevelVerifier {
    store: Arc<dyn TcbStore>,
}

impl TcbLevelVerifier {
    /// A verifier reading cached bundles from `store`.
    pub fn new(store: Arc<dyn TcbStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QuoteVerifier for TcbLevelVerifier {
    async fn verify(&self, quote: &[u8], _options: &VerifyOptions) -> Result<(), VerifyError> {
        let quote = Quote::parse(quote)
            .map_err(|e| VerifyError::new(VerifyErrorKind::Other, e.to_string()))?;
        let pck = quote.pck_tcb().map_err(|e| {
            let kind = if e.is_cert_defect() {
                VerifyErrorKind::CertificateChain
            } else {
                VerifyErrorKind::Other
            };
            VerifyError::new(kind, e.to_string())
        })?;

        let fmspc = hex::encode(pck.fmspc);
        let row = self
            .store
            .latest_tcb_info(&fmspc)
            .await
            .map_err(|e| VerifyError::new(VerifyErrorKind::TcbUnknown, e.to_string()))?
            .ok_or_else(|| {
                VerifyError::new(
                    VerifyErrorKind::TcbUnknown,
                    format!("no cached TCB bundle for FMSPC {fmspc}"),
                )
            })?;

        let levels: Vec<TcbLevel> = serde_json::from_str(&row.tcb_levels_json).map_err(|e| {
            VerifyError::new(
                VerifyErrorKind::TcbUnknown,
                format!("cached TCB levels for {fmspc} do not decode: {e}"),
            )
        })?;

        let components = crate::model::TcbComponents {
            sgx_components: pck.sgx_svns,
            tdx_components: quote.tdx_components(),
            pce_svn: pck.pce_svn,
        };

        match match_level(&levels, &components) {
            Some(level) if level.tcb_status == TcbStatus::UpToDate => Ok(()),
            Some(level) => Err(VerifyError::new(
                kind_for_status(level.tcb_status),
                format!(
                    "TCB level of {} requires attention: {} (advisories: {})",
                    fmspc,
                    level.tcb_status,
                    level.advisory_ids.join(", ")
                ),
            )),
            None => Err(VerifyError::new(
                VerifyErrorKind::OutOfDate,
                format!("quote does not meet any TCB level of {fmspc}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_the_table() {
        let ok: Result<(), VerifyError> = Ok(());
        assert_eq!(classify(&ok), (QuoteStatus::Valid, TcbStatus::UpToDate));

        let case = |kind| classify(&Err(VerifyError::new(kind, "x")));
        assert_eq!(
            case(VerifyErrorKind::OutOfDate),
            (QuoteStatus::ValidSignature, TcbStatus::OutOfDate)
        );
        assert_eq!(
            case(VerifyErrorKind::OutOfDateConfigurationNeeded),
            (
                QuoteStatus::ValidSignature,
                TcbStatus::OutOfDateConfigurationNeeded
            )
        );
        assert_eq!(
            case(VerifyErrorKind::SwHardeningNeeded),
            (QuoteStatus::ValidSignature, TcbStatus::SwHardeningNeeded)
        );
        assert_eq!(
            case(VerifyErrorKind::ConfigurationAndSwHardeningNeeded),
            (
                QuoteStatus::ValidSignature,
                TcbStatus::ConfigurationAndSwHardeningNeeded
            )
        );
        assert_eq!(
            case(VerifyErrorKind::ConfigurationNeeded),
            (QuoteStatus::ValidSignature, TcbStatus::ConfigurationNeeded)
        );
        assert_eq!(
            case(VerifyErrorKind::Revoked),
            (QuoteStatus::ValidSignature, TcbStatus::Revoked)
        );
        assert_eq!(
            case(VerifyErrorKind::TcbUnknown),
            (QuoteStatus::ValidSignature, TcbStatus::Unknown)
        );
        assert_eq!(
            case(VerifyErrorKind::Signature),
            (QuoteStatus::InvalidSignature, TcbStatus::NotApplicable)
        );
        assert_eq!(
            case(VerifyErrorKind::CertificateChain),
            (QuoteStatus::InvalidSignature, TcbStatus::NotApplicable)
        );
        assert_eq!(
            case(VerifyErrorKind::Other),
            (QuoteStatus::Invalid, TcbStatus::NotApplicable)
        );
    }
}
