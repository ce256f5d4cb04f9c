// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Quote parse error type

use thiserror::Error;

/// Structural defect classes of an attestation quote.
///
/// Hostile input never panics the parser; every defect maps to exactly one of
/// these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input is shorter than the structure it claims to contain.
    TruncatedQuote,
    /// The fixed-layout header could not be decoded.
    MalformedHeader,
    /// The signed data carries no usable PCK certificate chain.
    NoCertChain,
    /// The PCK certificate extension is not valid ASN.1.
    BadAsn1,
    /// The Intel SGX extension carries no well-formed FMSPC.
    MissingFmspc,
}

/// Quote parsing error
#[derive(Error, Debug)]
pub enum QuoteParseError {
    /// Input ended before the structure did.
    #[error("truncated quote: {0}")]
    TruncatedQuote(String),
    /// The 48-byte header could not be decoded.
    #[error("malformed header: {0}")]
    MalformedHeader(String),
    /// No PCK certificate chain in the signed data.
    #[error("no certificate chain: {0}")]
    NoCertChain(String),
    /// ASN.1 decoding of the PCK extension failed.
    #[error("bad ASN.1: {0}")]
    BadAsn1(String),
    /// The FMSPC is absent or has the wrong length.
    #[error("missing FMSPC: {0}")]
    MissingFmspc(String),
}

impl QuoteParseError {
    /// The kind tag of this error.
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            QuoteParseError::TruncatedQuote(_) => ParseErrorKind::TruncatedQuote,
            QuoteParseError::MalformedHeader(_) => ParseErrorKind::MalformedHeader,
            QuoteParseError::NoCertChain(_) => ParseErrorKind::NoCertChain,
            QuoteParseError::BadAsn1(_) => ParseErrorKind::BadAsn1,
            QuoteParseError::MissingFmspc(_) => ParseErrorKind::MissingFmspc,
        }
    }

    /// True for defects of the certificate chain or its extension, as opposed
    /// to defects of the fixed-layout part of the quote.
    pub fn is_cert_defect(&self) -> bool {
        matches!(
            self.kind(),
            ParseErrorKind::NoCertChain | ParseErrorKind::BadAsn1 | ParseErrorKind::MissingFmspc
        )
    }
}
