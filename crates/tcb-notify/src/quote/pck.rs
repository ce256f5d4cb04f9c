// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Extraction of the FMSPC and TCB component SVNs from the PCK leaf
//! certificate embedded in a quote's certification data.
//!
//! The leaf carries Intel's SGX extension (OID `1.2.840.113741.1.13.1`), a
//! DER sequence of `(sub-OID, value)` pairs:
//! - `.4`  OCTET STRING of length 6: the FMSPC
//! - `.2`  a nested sequence whose entries `.2.{1..16}` are INTEGER SGX
//!   component SVNs and `.2.17` is the INTEGER PCE SVN

use crate::quote::error::QuoteParseError;
use asn1_der::{
    typed::{DerDecodable, Sequence},
    DerObject,
};
use x509_cert::certificate::CertificateInner;

pub(crate) mod oids {
    use const_oid::ObjectIdentifier as OID;

    const fn oid(s: &str) -> OID {
        OID::new_unwrap(s)
    }

    pub const SGX_EXTENSION: OID = oid("1.2.840.113741.1.13.1");
    pub const FMSPC: OID = oid("1.2.840.113741.1.13.1.4");
    pub const TCB: OID = oid("1.2.840.113741.1.13.1.2");

    /// Index of the PCE SVN within the TCB sub-sequence.
    pub const TCB_PCE_SVN_ARC: u8 = 17;
}

/// SGX TCB material carried by the PCK leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PckTcb {
    /// Family-Model-Stepping-Platform-CustomSKU identifier.
    pub fmspc: [u8; 6],
    /// The 16 SGX component SVNs.
    pub sgx_svns: [u8; 16],
    /// PCE SVN.
    pub pce_svn: u16,
}

/// Load the PEM certificate chain out of the certification data body.
pub(crate) fn extract_certs(cert_chain: &[u8]) -> Result<Vec<CertificateInner>, QuoteParseError> {
    let cert_chain = cert_chain.strip_suffix(&[0]).unwrap_or(cert_chain);

    CertificateInner::<x509_cert::certificate::Rfc5280>::load_pem_chain(cert_chain)
        .map_err(|e| QuoteParseError::NoCertChain(format!("could not load a PEM chain: {e}")))
}

/// The DER payload of the Intel SGX extension on `cert`.
pub(crate) fn intel_sgx_extension(cert: &CertificateInner) -> Result<Vec<u8>, QuoteParseError> {
    let mut extension_iter = cert
        .tbs_certificate
        .extensions
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter(|e| e.extn_id == oids::SGX_EXTENSION)
        .map(|e| e.extn_value.clone());

    let extension = extension_iter
        .next()
        .ok_or_else(|| QuoteParseError::MissingFmspc("Intel SGX extension not found".into()))?;
    if extension_iter.next().is_some() {
        // there must be exactly one section carrying Intel extensions
        return Err(QuoteParseError::BadAsn1("Intel SGX extension ambiguity".into()));
    }
    Ok(extension.into_bytes())
}

/// Walk the SGX extension sequence and collect FMSPC, SGX SVNs and PCE SVN.
pub(crate) fn extract_pck_tcb(extension: &[u8]) -> Result<PckTcb, QuoteParseError> {
    let obj = DerObject::decode(extension)
        .map_err(|_| QuoteParseError::BadAsn1("failed to decode extension DER".into()))?;
    let seq = Sequence::load(obj)
        .map_err(|_| QuoteParseError::BadAsn1("extension is not a sequence".into()))?;

    let mut fmspc: Option<[u8; 6]> = None;
    let mut sgx_svns = [0u8; 16];
    let mut pce_svn = 0u16;

    for i in 0..seq.len() {
        let (name, value) = kv_pair(&seq, i)?;
        if name.value() == oids::FMSPC.as_bytes() {
            if value.value().len() != 6 {
                return Err(QuoteParseError::MissingFmspc(format!(
                    "FMSPC length {} instead of 6",
                    value.value().len()
                )));
            }
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(value.value());
            fmspc = Some(bytes);
        } else if name.value() == oids::TCB.as_bytes() {
            let tcb_seq = Sequence::load(value)
                .map_err(|_| QuoteParseError::BadAsn1("TCB entry is not a sequence".into()))?;
            for j in 0..tcb_seq.len() {
                let (component, svn) = kv_pair(&tcb_seq, j)?;
                let Some(rest) = component.value().strip_prefix(oids::TCB.as_bytes()) else {
                    continue;
                };
                // one appended arc below 128 encodes as a single byte
                if rest.len() != 1 {
                    continue;
                }
                match rest[0] {
                    arc @ 1..=16 => {
                        let v = der_uint(&svn)?;
                        if v <= u8::MAX as u64 {
                            sgx_svns[arc as usize - 1] = v as u8;
                        }
                    }
                    oids::TCB_PCE_SVN_ARC => {
                        let v = der_uint(&svn)?;
                        if v <= u16::MAX as u64 {
                            pce_svn = v as u16;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    let fmspc =
        fmspc.ok_or_else(|| QuoteParseError::MissingFmspc("no FMSPC entry in extension".into()))?;
    Ok(PckTcb {
        fmspc,
        sgx_svns,
        pce_svn,
    })
}

fn kv_pair<'a>(
    seq: &Sequence<'a>,
    index: usize,
) -> Result<(DerObject<'a>, DerObject<'a>), QuoteParseError> {
    let entry = seq
        .get(index)
        .map_err(|_| QuoteParseError::BadAsn1(format!("failed to get entry {index}")))?;
    let entry = Sequence::load(entry)
        .map_err(|_| QuoteParseError::BadAsn1(format!("entry {index} is not a sequence")))?;
    let name = entry
        .get(0)
        .map_err(|_| QuoteParseError::BadAsn1(format!("entry {index} has no OID")))?;
    let value = entry
        .get(1)
        .map_err(|_| QuoteParseError::BadAsn1(format!("entry {index} has no value")))?;
    Ok((name, value))
}

/// Decode a DER INTEGER content as an unsigned value.
fn der_uint(obj: &DerObject<'_>) -> Result<u64, QuoteParseError> {
    let bytes = obj.value();
    let bytes = bytes.strip_prefix(&[0]).unwrap_or(bytes);
    if bytes.len() > 8 {
        return Err(QuoteParseError::BadAsn1("oversized INTEGER".into()));
    }
    let mut v = 0u64;
    for b in bytes {
        v = (v << 8) | u64::from(*b);
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der_len(buf: &mut Vec<u8>, len: usize) {
        if len < 128 {
            buf.push(len as u8);
        } else if len < 256 {
            buf.push(0x81);
            buf.push(len as u8);
        } else {
            assert!(len < 65536);
            buf.push(0x82);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }

    fn der_oid(oid: &const_oid::ObjectIdentifier) -> Vec<u8> {
        let mut out = vec![0x06];
        der_len(&mut out, oid.as_bytes().len());
        out.extend_from_slice(oid.as_bytes());
        out
    }

    fn der_octet_string(data: &[u8]) -> Vec<u8> {
        let mut out = vec![0x04];
        der_len(&mut out, data.len());
        out.extend_from_slice(data);
        out
    }

    fn der_integer(v: u32) -> Vec<u8> {
        let mut content = v.to_be_bytes().to_vec();
        while content.len() > 1 && content[0] == 0 && content[1] & 0x80 == 0 {
            content.remove(0);
        }
        let mut out = vec![0x02];
        der_len(&mut out, content.len());
        out.extend_from_slice(&content);
        out
    }

    fn der_sequence(parts: &[Vec<u8>]) -> Vec<u8> {
        let content: Vec<u8> = parts.iter().flatten().copied().collect();
        let mut out = vec![0x30];
        der_len(&mut out, content.len());
        out.extend_from_slice(&content);
        out
    }

    fn tcb_component_oid(arc: u8) -> const_oid::ObjectIdentifier {
        const_oid::ObjectIdentifier::new_unwrap(&format!("1.2.840.113741.1.13.1.2.{arc}"))
    }

    fn sample_extension(fmspc: [u8; 6], sgx: [u8; 16], pce_svn: u16) -> Vec<u8> {
        let mut tcb_entries = Vec::new();
        for (i, svn) in sgx.iter().enumerate() {
            tcb_entries.push(der_sequence(&[
                der_oid(&tcb_component_oid(i as u8 + 1)),
                der_integer(u32::from(*svn)),
            ]));
        }
        tcb_entries.push(der_sequence(&[
            der_oid(&tcb_component_oid(oids::TCB_PCE_SVN_ARC)),
            der_integer(u32::from(pce_svn)),
        ]));
        der_sequence(&[
            der_sequence(&[der_oid(&oids::TCB), der_sequence(&tcb_entries)]),
            der_sequence(&[der_oid(&oids::FMSPC), der_octet_string(&fmspc)]),
        ])
    }

    #[test]
    fn const_oid_works() {
        assert_eq!(
            oids::SGX_EXTENSION.as_bytes(),
            const_oid::ObjectIdentifier::new_unwrap("1.2.840.113741.1.13.1").as_bytes()
        );
        assert!(oids::FMSPC
            .as_bytes()
            .starts_with(oids::SGX_EXTENSION.as_bytes()));
    }

    #[test]
    fn extracts_fmspc_and_svns() {
        let fmspc = [0x30, 0x60, 0x6a, 0x00, 0x00, 0x00];
        let sgx = [2, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
        let ext = sample_extension(fmspc, sgx, 13);

        let pck = extract_pck_tcb(&ext).unwrap();
        assert_eq!(pck.fmspc, fmspc);
        assert_eq!(pck.sgx_svns, sgx);
        assert_eq!(pck.pce_svn, 13);
        assert_eq!(hex::encode(pck.fmspc), "30606a000000");
    }

    #[test]
    fn missing_fmspc_entry_is_reported() {
        let tcb = der_sequence(&[der_sequence(&[
            der_oid(&oids::TCB),
            der_sequence(&[der_sequence(&[
                der_oid(&tcb_component_oid(1)),
                der_integer(1),
            ])]),
        ])]);
        let err = extract_pck_tcb(&tcb).unwrap_err();
        assert!(matches!(err, QuoteParseError::MissingFmspc(_)));
    }

    #[test]
    fn wrong_fmspc_length_is_reported() {
        let ext = der_sequence(&[der_sequence(&[
            der_oid(&oids::FMSPC),
            der_octet_string(&[1, 2, 3]),
        ])]);
        let err = extract_pck_tcb(&ext).unwrap_err();
        assert!(matches!(err, QuoteParseError::MissingFmspc(_)));
    }

    #[test]
    fn garbage_extension_is_bad_asn1() {
        let err = extract_pck_tcb(&[0xff, 0x03, 0x01]).unwrap_err();
        assert!(matches!(err, QuoteParseError::BadAsn1(_)));
    }

    #[test]
    fn large_pce_svn_round_trips() {
        let ext = sample_extension([0u8; 6], [0u8; 16], 0x1234);
        let pck = extract_pck_tcb(&ext).unwrap();
        assert_eq!(pck.pce_svn, 0x1234);
    }
}
