// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Fetch the FMSPC catalog and one TCB bundle from the live Intel PCS.
//!
//! Run with: `cargo run --example fetch_tcb [fmspc]`

use intel_pcs_api::{PcsApiError, PcsClient, PlatformFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let fmspc = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "30606a000000".to_string());

    let client = PcsClient::new()?;

    let catalog = client.get_fmspcs(Some(PlatformFilter::All)).await?;
    let entries: serde_json::Value = serde_json::from_str(&catalog)?;
    println!(
        "FMSPC catalog entries: {}",
        entries.as_array().map(|a| a.len()).unwrap_or(0)
    );

    match client.get_tdx_tcb_info(&fmspc).await {
        Ok(body) => {
            let bundle: serde_json::Value = serde_json::from_str(&body)?;
            println!(
                "TCB bundle for {fmspc}: evaluation data number {}",
                bundle["tcbInfo"]["tcbEvaluationDataNumber"]
            );
        }
        Err(PcsApiError::NotFound) => println!("{fmspc} has no TDX TCB bundle"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
