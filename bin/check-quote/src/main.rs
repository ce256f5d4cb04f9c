// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Tool for inspecting TDX attestation quote files.
//!
//! Accepts a raw binary quote, a hex-encoded text file, or a JSON document
//! with a hex `quote` field, and prints what the parser extracts from it.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tcb_notify::quote::{ParsedQuote, Quote, MIN_QUOTE_BYTE_LEN, QUOTE_VERSION, TEE_TYPE_TDX};

#[derive(Parser, Debug)]
#[command(author = "Matter Labs", version, about = "Inspect a TDX attestation quote file", long_about = None)]
struct Arguments {
    /// File containing the attestation quote (binary, hex text, or JSON with a `quote` field).
    #[clap()]
    quote_file: PathBuf,
}

fn main() -> Result<()> {
    let args = Arguments::parse();

    let data = fs::read(&args.quote_file)
        .with_context(|| format!("failed to read {}", args.quote_file.display()))?;
    println!("File size: {} bytes", data.len());

    let raw = extract_quote_bytes(&data)?;
    println!("Quote size: {} bytes", raw.len());
    println!("Quote SHA-256: {}", hex::encode(Sha256::digest(&raw)));

    if raw.len() < MIN_QUOTE_BYTE_LEN {
        bail!(
            "quote is {} bytes, a complete TD report needs {MIN_QUOTE_BYTE_LEN}",
            raw.len()
        );
    }

    let quote = Quote::parse(&raw).context("structural parse failed")?;
    let (version, attestation_key_type, tee_type) = (
        quote.header.version,
        quote.header.attestation_key_type,
        quote.header.tee_type,
    );
    println!("Header:");
    println!("  version: {version} (expected {QUOTE_VERSION})");
    println!("  attestation key type: {attestation_key_type}");
    println!("  tee type: {tee_type:#010x} (TDX is {TEE_TYPE_TDX:#010x})");
    println!("  signed data size: {}", quote.signed_data_size);

    let parsed = ParsedQuote::from_quote(quote);
    if parsed.fmspc.is_empty() {
        println!("FMSPC: <not extractable, no usable PCK chain>");
    } else {
        println!("FMSPC: {}", parsed.fmspc);
        println!(
            "SGX components: {}",
            hex::encode(parsed.tcb_components.sgx_components)
        );
        println!("PCE SVN: {}", parsed.tcb_components.pce_svn);
    }
    println!(
        "TDX components: {}",
        hex::encode(parsed.tcb_components.tdx_components)
    );
    println!("mrtd: {}", parsed.mr_td);
    println!("mrseam: {}", parsed.mr_seam);
    println!("mrsignerseam: {}", parsed.mr_signer_seam);
    println!("reportdata: {}", parsed.report_data);

    Ok(())
}

/// Pull the raw quote bytes out of whatever container the file uses.
fn extract_quote_bytes(data: &[u8]) -> Result<Vec<u8>> {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(data) {
        let quote = json
            .get("quote")
            .and_then(|q| q.as_str())
            .context("file is JSON but has no string `quote` field")?;
        println!("Container: JSON with hex `quote` field");
        return hex::decode(quote.trim_start_matches("0x"))
            .context("`quote` field is not valid hex");
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let text: String = text.split_whitespace().collect();
        let text = text.trim_start_matches("0x");
        if !text.is_empty() && text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            println!("Container: hex text");
            return hex::decode(text).context("file looks like hex but does not decode");
        }
    }

    println!("Container: raw binary");
    Ok(data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_container_passes_through() {
        let raw = vec![4u8, 0, 0, 0, 0x81, 0, 0, 0];
        assert_eq!(extract_quote_bytes(&raw).unwrap(), raw);
    }

    #[test]
    fn hex_text_container_decodes() {
        let decoded = extract_quote_bytes(b"0400020081000000").unwrap();
        assert_eq!(decoded, vec![0x04, 0x00, 0x02, 0x00, 0x81, 0x00, 0x00, 0x00]);

        let with_whitespace = extract_quote_bytes(b"0400 0200\n8100 0000\n").unwrap();
        assert_eq!(with_whitespace, decoded);
    }

    #[test]
    fn json_container_unwraps_the_quote_field() {
        let decoded = extract_quote_bytes(br#"{"quote": "0xdeadbeef"}"#).unwrap();
        assert_eq!(decoded, vec![0xde, 0xad, 0xbe, 0xef]);

        assert!(extract_quote_bytes(br#"{"other": 1}"#).is_err());
    }
}
