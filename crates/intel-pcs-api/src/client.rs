// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

use crate::{
    error::PcsApiError,
    responses::{FmspcJsonResponse, TcbInfoJsonResponse},
    types::PlatformFilter,
};
use reqwest::{Client, IntoUrl, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

// Base URL for the Intel Trusted Services API
const BASE_URL: &str = "https://api.trustedservices.intel.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the Intel Provisioning Certification Service.
///
/// Covers the v4 endpoints the TCB monitoring pipeline polls: the FMSPC
/// catalog and per-FMSPC TDX TCB bundles. An `Ocp-Apim-Subscription-Key` is
/// attached when configured.
#[derive(Clone)]
pub struct PcsClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl PcsClient {
    /// Creates a new client against the public Intel endpoint, without an API key.
    ///
    /// # Errors
    ///
    /// Fails when the underlying `reqwest` client cannot be built.
    pub fn new() -> Result<Self, PcsApiError> {
        Self::new_with_options(BASE_URL, None::<&str>)
    }

    /// Creates a new client with a custom base URL and an optional API key.
    ///
    /// # Errors
    ///
    /// Fails when the base URL is invalid or the `reqwest` client cannot be
    /// built.
    pub fn new_with_options(
        base_url: impl IntoUrl,
        api_key: Option<impl Into<String>>,
    ) -> Result<Self, PcsApiError> {
        Ok(PcsClient {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.into_url()?,
            api_key: api_key.map(Into::into).filter(|k: &String| !k.is_empty()),
        })
    }

    /// GET /sgx/certification/v4/fmspcs
    ///
    /// Retrieves the FMSPC catalog, optionally filtered by platform.
    ///
    /// # Returns
    ///
    /// The verbatim JSON array of `{fmspc, platform}` objects.
    ///
    /// # Errors
    ///
    /// Returns a [`PcsApiError`] for transport failures and non-success
    /// statuses.
    pub async fn get_fmspcs(
        &self,
        platform_filter: Option<PlatformFilter>,
    ) -> Result<FmspcJsonResponse, PcsApiError> {
        let mut url = self.base_url.join("/sgx/certification/v4/fmspcs")?;
        if let Some(platform) = platform_filter {
            url.query_pairs_mut()
                .append_pair("platform", &platform.to_string());
        }

        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    /// GET /tdx/certification/v4/tcb?fmspc={fmspc}
    ///
    /// Retrieves the TDX TCB bundle for an FMSPC.
    ///
    /// # Returns
    ///
    /// The verbatim JSON object `{tcbInfo, signature}`.
    ///
    /// # Errors
    ///
    /// Returns [`PcsApiError::NotFound`] when the FMSPC has no TDX bundle,
    /// [`PcsApiError::TooManyRequests`] on rate limiting, and
    /// [`PcsApiError::ApiError`] for any other non-success status.
    pub async fn get_tdx_tcb_info(&self, fmspc: &str) -> Result<TcbInfoJsonResponse, PcsApiError> {
        let mut url = self.base_url.join("/tdx/certification/v4/tcb")?;
        url.query_pairs_mut().append_pair("fmspc", fmspc);

        let response = self.get(url).await?;
        Ok(response.text().await?)
    }

    async fn get(&self, url: Url) -> Result<Response, PcsApiError> {
        debug!(%url, "PCS request");
        let mut request_builder = self.client.get(url);
        if let Some(key) = &self.api_key {
            request_builder = request_builder.header("Ocp-Apim-Subscription-Key", key);
        }
        let response = request_builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(PcsApiError::NotFound);
        }

        // diagnostics the PCS carries in response headers
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let request_id = header("Request-ID").unwrap_or_else(|| "unknown".into());

        if status == StatusCode::TOO_MANY_REQUESTS {
            // Retry-After may be missing or an HTTP date; fall back to a minute
            let retry_after = header("Retry-After")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(PcsApiError::TooManyRequests {
                request_id,
                retry_after,
            });
        }

        Err(PcsApiError::ApiError {
            status,
            request_id,
            error_code: header("Error-Code"),
            error_message: header("Error-Message"),
        })
    }
}
