// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Parsing of version-4 TDX attestation quotes.
//!
//! A quote is a 48-byte header, a 584-byte TD report and a trailing
//! length-prefixed signed-data blob. The signed data embeds the PCK
//! certificate chain whose leaf carries the Intel SGX extension with the
//! FMSPC and the SGX/PCE component SVNs; the TDX component SVNs are the raw
//! TEE TCB SVN bytes of the TD report.
//!
//! [`Quote::parse`] is the structural layer: it is total on arbitrary input
//! and tolerates unexpected header versions for observability. The strict
//! extraction contract, including the PCK walk, is [`ParsedQuote::from_bytes`].

pub mod error;
mod pck;

pub use pck::PckTcb;

use crate::model::TcbComponents;
use bytemuck::AnyBitPattern;
use error::QuoteParseError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// TEE type tag of TDX quotes.
pub const TEE_TYPE_TDX: u32 = 0x0000_0081;
/// The quote version this pipeline nominally handles.
pub const QUOTE_VERSION: u16 = 4;
/// Length of the quote header.
pub const HEADER_BYTE_LEN: usize = 48;
/// Length of the TD report body.
pub const TD_REPORT_BYTE_LEN: usize = 584;
/// Minimum length of a quote carrying a complete TD report.
pub const MIN_QUOTE_BYTE_LEN: usize = HEADER_BYTE_LEN + TD_REPORT_BYTE_LEN;

/// Certification data type carrying a PEM-encoded PCK chain.
const PCK_CERT_CHAIN_TYPE: u16 = 5;

mod serde_bytes {
    use serde::Deserialize;

    pub(crate) trait FromBytes {
        fn from_bytes(bytes: Vec<u8>) -> Option<Self>
        where
            Self: Sized;
    }
    impl FromBytes for Vec<u8> {
        fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
            Some(bytes)
        }
    }
    impl<const N: usize> FromBytes for [u8; N] {
        fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
            bytes.try_into().ok()
        }
    }

    pub(crate) fn serialize<S: serde::Serializer>(
        data: impl AsRef<[u8]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let hex_str = hex::encode(data);
        serializer.serialize_str(&hex_str)
    }

    pub(crate) fn deserialize<'de, D: serde::Deserializer<'de>, T: FromBytes>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let hex_str = String::deserialize(deserializer)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        T::from_bytes(bytes).ok_or_else(|| serde::de::Error::custom("invalid bytes"))
    }
}

/// Split `n` bytes off the front of `input`, or fail as a truncation.
fn take<'a>(input: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8], QuoteParseError> {
    if input.len() < n {
        return Err(QuoteParseError::TruncatedQuote(format!(
            "{what}: need {n} bytes, {} left",
            input.len()
        )));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Bounds-checked little-endian reads of value-references from slices.
pub trait Decode: Sized {
    /// Attempt to deserialise the value from input.
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError>;
}

impl<T: AnyBitPattern> Decode for T {
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError> {
        let bytes = take(input, size_of::<T>(), core::any::type_name::<T>())?;
        bytemuck::try_pod_read_unaligned(bytes)
            .map_err(|e| QuoteParseError::MalformedHeader(e.to_string()))
    }
}

/// Length-prefixed byte sequence; `T` is the integer type of the prefix.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct Data<T> {
    /// The payload following the length prefix.
    pub data: Vec<u8>,
    _marker: core::marker::PhantomData<T>,
}

impl<T> Serialize for Data<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(&self.data, serializer)
    }
}

impl<'de, T> Deserialize<'de> for Data<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = serde_bytes::deserialize(deserializer)?;
        Ok(Data {
            data,
            _marker: core::marker::PhantomData,
        })
    }
}

impl<T: Decode + Into<u64>> Decode for Data<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError> {
        let len = T::decode(input)?;
        let data = take(input, len.into() as usize, "length-prefixed data")?.to_vec();
        Ok(Data {
            data,
            _marker: core::marker::PhantomData,
        })
    }
}

/// The 48-byte quote header.
#[allow(missing_docs)]
#[derive(AnyBitPattern, Debug, Serialize, Deserialize, Copy, Clone)]
#[repr(C, packed)]
pub struct Header {
    pub version: u16,
    pub attestation_key_type: u16,
    pub tee_type: u32,
    pub qe_svn: u16,
    pub pce_svn: u16,
    #[serde(with = "serde_bytes")]
    pub qe_vendor_id: [u8; 16],
    #[serde(with = "serde_bytes")]
    pub user_data: [u8; 20],
}

/// The 584-byte TD report body.
#[allow(missing_docs)]
#[derive(AnyBitPattern, Debug, Serialize, Deserialize, Copy, Clone)]
#[repr(C, packed)]
pub struct TdReport {
    #[serde(with = "serde_bytes")]
    pub tee_tcb_svn: [u8; 16],
    #[serde(with = "serde_bytes")]
    pub mr_seam: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub mr_signer_seam: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub seam_attributes: [u8; 8],
    #[serde(with = "serde_bytes")]
    pub td_attributes: [u8; 8],
    #[serde(with = "serde_bytes")]
    pub xfam: [u8; 8],
    #[serde(with = "serde_bytes")]
    pub mr_td: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub mr_config_id: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub mr_owner: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub mr_owner_config: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub rt_mr0: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub rt_mr1: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub rt_mr2: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub rt_mr3: [u8; 48],
    #[serde(with = "serde_bytes")]
    pub report_data: [u8; 64],
}

/// Certification data entry of the signed-data blob.
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize, Clone)]
#[repr(C)]
pub struct CertificationData {
    pub cert_type: u16,
    pub body: Data<u32>,
}

impl Decode for CertificationData {
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError> {
        Ok(Self {
            cert_type: Decode::decode(input)?,
            body: Decode::decode(input)?,
        })
    }
}

/// QE report certification data nested inside the outer certification data.
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[repr(C)]
pub struct QeReportCertificationData {
    #[serde(with = "serde_bytes")]
    pub qe_report: [u8; 384],
    #[serde(with = "serde_bytes")]
    pub qe_report_signature: [u8; 64],
    pub qe_auth_data: Data<u16>,
    pub certification_data: CertificationData,
}

impl Decode for QeReportCertificationData {
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError> {
        Ok(Self {
            qe_report: Decode::decode(input)?,
            qe_report_signature: Decode::decode(input)?,
            qe_auth_data: Decode::decode(input)?,
            certification_data: Decode::decode(input)?,
        })
    }
}

/// Version-4 signed-data blob.
#[allow(missing_docs)]
#[derive(Debug, Serialize, Deserialize)]
#[repr(C)]
pub struct AuthData {
    #[serde(with = "serde_bytes")]
    pub ecdsa_signature: [u8; 64],
    #[serde(with = "serde_bytes")]
    pub ecdsa_attestation_key: [u8; 64],
    pub certification_data: CertificationData,
    pub qe_report_data: QeReportCertificationData,
}

impl Decode for AuthData {
    fn decode(input: &mut &[u8]) -> Result<Self, QuoteParseError> {
        let ecdsa_signature = Decode::decode(input)?;
        let ecdsa_attestation_key = Decode::decode(input)?;
        let certification_data: CertificationData = Decode::decode(input)?;
        let qe_report_data =
            QeReportCertificationData::decode(&mut &certification_data.body.data[..])?;
        Ok(AuthData {
            ecdsa_signature,
            ecdsa_attestation_key,
            certification_data,
            qe_report_data,
        })
    }
}

/// A structurally decoded quote.
#[derive(Debug, Serialize, Deserialize)]
pub struct Quote {
    /// Quote header.
    pub header: Header,
    /// TD report body.
    pub report: TdReport,
    /// Declared size of the signed-data blob; 0 when the input ends at the report.
    pub signed_data_size: u32,
    /// Decoded signed data, when present.
    pub auth_data: Option<AuthData>,
}

impl Quote {
    /// Parse a TDX quote from a byte slice.
    ///
    /// Inputs shorter than a complete header + TD report fail as
    /// [`QuoteParseError::TruncatedQuote`]. An unexpected version or TEE type
    /// is logged but does not abort the parse; extraction still proceeds.
    pub fn parse(raw: &[u8]) -> Result<Self, QuoteParseError> {
        if raw.len() < MIN_QUOTE_BYTE_LEN {
            return Err(QuoteParseError::TruncatedQuote(format!(
                "quote is {} bytes, a complete TD report needs {MIN_QUOTE_BYTE_LEN}",
                raw.len()
            )));
        }
        let mut input = raw;
        let header = Header::decode(&mut input)?;
        let (version, tee_type) = (header.version, header.tee_type);
        if version != QUOTE_VERSION {
            warn!("unexpected quote version {version}");
        }
        if tee_type != TEE_TYPE_TDX {
            warn!("not a TDX quote: tee type {tee_type:#x}");
        }
        let report = TdReport::decode(&mut input)?;
        if input.is_empty() {
            return Ok(Quote {
                header,
                report,
                signed_data_size: 0,
                auth_data: None,
            });
        }
        let signed = Data::<u32>::decode(&mut input)?;
        let signed_data_size = signed.data.len() as u32;
        let auth_data = if signed.data.is_empty() {
            None
        } else {
            Some(AuthData::decode(&mut &signed.data[..])?)
        };
        Ok(Quote {
            header,
            report,
            signed_data_size,
            auth_data,
        })
    }

    /// The raw PCK certificate chain embedded in the signed data.
    pub fn raw_cert_chain(&self) -> Result<&[u8], QuoteParseError> {
        let auth_data = self
            .auth_data
            .as_ref()
            .ok_or_else(|| QuoteParseError::NoCertChain("quote carries no signed data".into()))?;
        let cert_data = &auth_data.qe_report_data.certification_data;
        if cert_data.cert_type != PCK_CERT_CHAIN_TYPE {
            return Err(QuoteParseError::NoCertChain(format!(
                "unsupported certification data type {}",
                cert_data.cert_type
            )));
        }
        Ok(&cert_data.body.data)
    }

    /// FMSPC, SGX component SVNs and PCE SVN from the PCK leaf certificate.
    pub fn pck_tcb(&self) -> Result<PckTcb, QuoteParseError> {
        let chain = self.raw_cert_chain()?;
        let certs = pck::extract_certs(chain)?;
        let leaf = certs
            .first()
            .ok_or_else(|| QuoteParseError::NoCertChain("empty certificate chain".into()))?;
        let extension = pck::intel_sgx_extension(leaf)?;
        pck::extract_pck_tcb(&extension)
    }

    /// The 16 TDX component SVNs, the raw TEE TCB SVN bytes of the TD report.
    pub fn tdx_components(&self) -> [u8; 16] {
        self.report.tee_tcb_svn
    }
}

/// Fully extracted quote contents, ready to compare against a TCB bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuote {
    /// Quote header.
    pub header: Header,
    /// TD report body.
    pub report: TdReport,
    /// FMSPC as lowercase hex(6); empty when the PCK walk failed.
    pub fmspc: String,
    /// SGX/TDX component SVNs and PCE SVN.
    pub tcb_components: TcbComponents,
    /// MRTD, hex.
    pub mr_td: String,
    /// MRSEAM, hex.
    pub mr_seam: String,
    /// MRSIGNERSEAM, hex.
    pub mr_signer_seam: String,
    /// Report data, hex.
    pub report_data: String,
}

impl ParsedQuote {
    /// Parse and extract in one step, surfacing every structural defect.
    ///
    /// This is the strict contract: a quote without a resolvable FMSPC is an
    /// error here. Use [`ParsedQuote::from_quote`] for the best-effort path.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, QuoteParseError> {
        let quote = Quote::parse(raw)?;
        let pck = quote.pck_tcb()?;
        Ok(Self::assemble(quote, Some(pck)))
    }

    /// Extract what is extractable from a structurally valid quote.
    ///
    /// A failing PCK walk leaves the FMSPC empty and the SGX/PCE components
    /// zeroed; the TD report fields are always populated.
    pub fn from_quote(quote: Quote) -> Self {
        let pck = match quote.pck_tcb() {
            Ok(pck) => Some(pck),
            Err(e) => {
                debug!("PCK extraction failed: {e}");
                None
            }
        };
        Self::assemble(quote, pck)
    }

    fn assemble(quote: Quote, pck: Option<PckTcb>) -> Self {
        let report = quote.report;
        let mut tcb_components = TcbComponents {
            tdx_components: quote.tdx_components(),
            ..TcbComponents::default()
        };
        let fmspc = match pck {
            Some(pck) => {
                tcb_components.sgx_components = pck.sgx_svns;
                tcb_components.pce_svn = pck.pce_svn;
                hex::encode(pck.fmspc)
            }
            None => String::new(),
        };
        ParsedQuote {
            header: quote.header,
            report,
            fmspc,
            tcb_components,
            mr_td: hex::encode(report.mr_td),
            mr_seam: hex::encode(report.mr_seam),
            mr_signer_seam: hex::encode(report.mr_signer_seam),
            report_data: hex::encode(report.report_data),
        }
    }
}
