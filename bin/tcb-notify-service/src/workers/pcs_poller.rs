// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Intel PCS polling worker.
//!
//! Each cycle refreshes the FMSPC catalog, pulls the TDX TCB bundle of every
//! FMSPC and stores bundles carrying a new `tcbEvaluationDataNumber`. A bump
//! over a previously cached number raises an alert sized by the count of
//! active registrations on that FMSPC. Requests are throttled to stay under
//! the PCS rate limit.

use crate::{
    core::{PCS_SERVICE_NAME, PCS_THROTTLE_MS},
    error::{Error, Result},
    workers::idle,
};
use chrono::Utc;
use intel_pcs_api::{PcsApiError, PcsClient, PlatformFilter};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tcb_notify::{
    model::{TcbAlertRow, TcbInfoRow},
    store::{AlertStore, RegistryStore, TcbStore},
    tcb::{alert_severity, component_delta, TcbInfo, TcbInfoResponse},
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// One entry of the FMSPC catalog response.
#[derive(Debug, Clone, Deserialize)]
struct FmspcEntry {
    fmspc: String,
    #[serde(default)]
    platform: String,
}

/// Per-cycle fetch statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// FMSPCs the catalog listed.
    pub total: usize,
    /// Bundles stored because they were new or bumped.
    pub updated: usize,
    /// Bundles already cached at the fetched evaluation number.
    pub skipped: usize,
    /// FMSPCs that failed this cycle.
    pub errors: usize,
}

/// The PCS polling worker.
pub struct PcsFetcher {
    client: PcsClient,
    tcb_store: Arc<dyn TcbStore>,
    registry_store: Arc<dyn RegistryStore>,
    alert_store: Arc<dyn AlertStore>,
    poll_interval: Duration,
    throttle: Duration,
}

impl PcsFetcher {
    /// Create the worker.
    pub fn new(
        client: PcsClient,
        tcb_store: Arc<dyn TcbStore>,
        registry_store: Arc<dyn RegistryStore>,
        alert_store: Arc<dyn AlertStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            tcb_store,
            registry_store,
            alert_store,
            poll_interval,
            throttle: Duration::from_millis(PCS_THROTTLE_MS),
        }
    }

    /// Run until the stop channel flips.
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<()> {
        info!(
            service = PCS_SERVICE_NAME,
            poll_interval = ?self.poll_interval,
            "Starting PCS fetcher worker"
        );

        loop {
            match self.tick(&stop).await {
                Ok(stats) => info!(
                    total = stats.total,
                    updated = stats.updated,
                    skipped = stats.skipped,
                    errors = stats.errors,
                    "Completed PCS fetch cycle"
                ),
                Err(Error::Interrupted) => {}
                Err(e) => error!("PCS fetch cycle failed: {e}"),
            }
            if !idle(&mut stop, self.poll_interval).await {
                info!("PCS fetcher worker stopped");
                return Ok(());
            }
        }
    }

    /// One poll cycle: refresh the catalog, then every bundle.
    pub async fn tick(&self, stop: &watch::Receiver<bool>) -> Result<FetchStats> {
        let fmspcs = self.fetch_catalog().await?;
        let mut stats = FetchStats {
            total: fmspcs.len(),
            ..FetchStats::default()
        };

        for entry in &fmspcs {
            if *stop.borrow() {
                return Err(Error::Interrupted);
            }
            match self.fetch_and_store_tcb(&entry.fmspc).await {
                Ok(true) => stats.updated += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    error!(fmspc = entry.fmspc, "Failed to fetch TCB info: {e}");
                    stats.errors += 1;
                }
            }
            tokio::time::sleep(self.throttle).await;
        }

        Ok(stats)
    }

    /// Fetch the FMSPC catalog and upsert it; FMSPCs missing from a
    /// successful response are deactivated.
    async fn fetch_catalog(&self) -> Result<Vec<FmspcEntry>> {
        let body = self.client.get_fmspcs(Some(PlatformFilter::All)).await?;
        let mut entries: Vec<FmspcEntry> = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("FMSPC catalog does not decode: {e}")))?;

        for entry in &mut entries {
            entry.fmspc = entry.fmspc.to_lowercase();
            if entry.platform.is_empty() {
                entry.platform = "ALL".to_string();
            }
        }

        info!(count = entries.len(), "Fetched FMSPC catalog");

        for entry in &entries {
            if let Err(e) = self.tcb_store.upsert_fmspc(&entry.fmspc, &entry.platform).await {
                error!(fmspc = entry.fmspc, "Failed to store FMSPC: {e}");
            }
        }
        let seen: Vec<String> = entries.iter().map(|e| e.fmspc.clone()).collect();
        if !seen.is_empty() {
            if let Err(e) = self.tcb_store.deactivate_missing_fmspcs(&seen).await {
                error!("Failed to deactivate stale FMSPCs: {e}");
            }
        }

        Ok(entries)
    }

    /// Fetch one FMSPC's bundle; store it when its evaluation number is new.
    ///
    /// Returns true when a bundle was stored.
    async fn fetch_and_store_tcb(&self, fmspc: &str) -> Result<bool> {
        let cached_eval = self
            .tcb_store
            .latest_tcb_info(fmspc)
            .await?
            .map(|row| row.tcb_evaluation_data_number);

        let body = match self.client.get_tdx_tcb_info(fmspc).await {
            Ok(body) => body,
            Err(PcsApiError::NotFound) => {
                // the FMSPC has no TDX bundle
                debug!(fmspc, "No TCB info available");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let response: TcbInfoResponse = serde_json::from_str(&body)
            .map_err(|e| Error::protocol(format!("TCB bundle for {fmspc} does not decode: {e}")))?;
        let fetched_eval = response.tcb_info.tcb_evaluation_data_number;

        match cached_eval {
            None => {
                self.store_bundle(fmspc, &response, &body).await?;
                info!(fmspc, eval_num = fetched_eval, "Stored new TCB info for FMSPC");
                Ok(true)
            }
            Some(current) if fetched_eval > current => {
                let previous = self.tcb_store.latest_tcb_info(fmspc).await?;
                self.store_bundle(fmspc, &response, &body).await?;
                info!(
                    fmspc,
                    old_eval = current,
                    new_eval = fetched_eval,
                    "TCB update detected"
                );
                if let Err(e) = self
                    .raise_alert(fmspc, current, &response.tcb_info, previous.as_ref())
                    .await
                {
                    error!(fmspc, "Failed to create TCB update alert: {e}");
                }
                Ok(true)
            }
            Some(current) => {
                debug!(
                    fmspc,
                    current_eval = current,
                    fetched_eval,
                    "TCB info already up to date, skipping"
                );
                Ok(false)
            }
        }
    }

    async fn store_bundle(
        &self,
        fmspc: &str,
        response: &TcbInfoResponse,
        raw_body: &str,
    ) -> Result<()> {
        let info = &response.tcb_info;
        let row = TcbInfoRow {
            fmspc: fmspc.to_string(),
            tcb_evaluation_data_number: info.tcb_evaluation_data_number,
            issue_date: info.issue_date,
            next_update: info.next_update,
            tcb_type: info.tcb_type,
            tcb_levels_json: serde_json::to_string(&info.tcb_levels)
                .map_err(tcb_notify::store::StoreError::from)?,
            raw_json: raw_body.to_string(),
            fetched_at: Utc::now(),
        };
        self.tcb_store.insert_tcb_info(&row).await?;
        Ok(())
    }

    async fn raise_alert(
        &self,
        fmspc: &str,
        old_eval: u32,
        new_info: &TcbInfo,
        previous: Option<&TcbInfoRow>,
    ) -> Result<()> {
        let affected = match self
            .registry_store
            .count_active_quotes_by_fmspc(fmspc)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count affected quotes, using 0: {e}");
                0
            }
        };

        let severity = previous
            .map(|row| {
                let previous_info = TcbInfo {
                    tcb_levels: serde_json::from_str(&row.tcb_levels_json).unwrap_or_default(),
                    ..new_info.clone()
                };
                alert_severity(&component_delta(&previous_info, new_info))
            })
            .unwrap_or(tcb_notify::tcb::Severity::Low);

        let new_eval = new_info.tcb_evaluation_data_number;
        let details = format!(
            "severity={severity}: TCB evaluation updated from {old_eval} to {new_eval} \
             for FMSPC {fmspc}, affecting {affected} registered quotes"
        );

        warn!(
            fmspc,
            old_eval,
            new_eval,
            affected_quotes = affected,
            %severity,
            "TCB update detected, creating alert"
        );

        self.alert_store
            .insert_alert(&TcbAlertRow {
                fmspc: fmspc.to_string(),
                old_eval_number: old_eval,
                new_eval_number: new_eval,
                affected_quotes_count: affected as u32,
                details,
                created_at: Utc::now(),
                acknowledged: false,
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Server;
    use tcb_notify::model::{EventType, RegistryEventRow};
    use tcb_notify::store::{MemoryStore, StoreInspect};

    const FMSPC: &str = "30606a000000";

    fn bundle_json(eval: u32) -> String {
        format!(
            r#"{{
                "tcbInfo": {{
                    "id": "TDX",
                    "version": 3,
                    "issueDate": "2024-03-13T10:40:28Z",
                    "nextUpdate": "2024-04-12T10:40:28Z",
                    "fmspc": "{FMSPC}",
                    "pceId": "0000",
                    "tcbType": 0,
                    "tcbEvaluationDataNumber": {eval},
                    "tcbLevels": [
                        {{
                            "tcb": {{
                                "sgxtcbcomponents": [
                                    {{"svn": {eval}}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}
                                ],
                                "pcesvn": 13,
                                "tdxtcbcomponents": [
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}},
                                    {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}, {{"svn": 0}}
                                ]
                            }},
                            "tcbDate": "2024-03-13T00:00:00Z",
                            "tcbStatus": "UpToDate"
                        }}
                    ]
                }},
                "signature": "00"
            }}"#
        )
    }

    fn fetcher(server_url: &str, store: Arc<MemoryStore>) -> PcsFetcher {
        let client = PcsClient::new_with_options(server_url, None::<&str>).unwrap();
        let mut fetcher = PcsFetcher::new(
            client,
            store.clone(),
            store.clone(),
            store,
            Duration::from_secs(3600),
        );
        fetcher.throttle = Duration::from_millis(0);
        fetcher
    }

    fn active_registration(address: &str, fmspc: &str) -> RegistryEventRow {
        RegistryEventRow {
            service_address: address.to_string(),
            block_number: 100,
            log_index: 2,
            event_type: EventType::Registered,
            block_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            tx_hash: format!("0x{:064x}", 1),
            quote_bytes: vec![0u8; 64],
            quote_length: 64,
            quote_hash: format!("{:064x}", 7),
            fmspc: fmspc.to_string(),
            ingested_at: Utc::now(),
        }
    }

    fn stopped_receiver() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // keep the sender alive for the duration of the test
        std::mem::forget(tx);
        rx
    }

    async fn mock_catalog(server: &mut Server) {
        server
            .mock("GET", "/sgx/certification/v4/fmspcs")
            .match_query(mockito::Matcher::UrlEncoded("platform".into(), "all".into()))
            .with_status(200)
            .with_body(format!(r#"[{{"fmspc":"{FMSPC}","platform":"E5"}}]"#))
            .create_async()
            .await;
    }

    #[tokio::test]
    async fn first_observation_stores_without_alert() {
        let mut server = Server::new_async().await;
        mock_catalog(&mut server).await;
        server
            .mock("GET", "/tdx/certification/v4/tcb")
            .match_query(mockito::Matcher::UrlEncoded("fmspc".into(), FMSPC.into()))
            .with_status(200)
            .with_body(bundle_json(10))
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let worker = fetcher(&server.url(), store.clone());
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.total, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(store.tcb_infos().len(), 1);
        assert!(store.unacknowledged_alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn eval_bump_raises_a_sized_alert() {
        let mut server = Server::new_async().await;
        mock_catalog(&mut server).await;
        server
            .mock("GET", "/tdx/certification/v4/tcb")
            .match_query(mockito::Matcher::UrlEncoded("fmspc".into(), FMSPC.into()))
            .with_status(200)
            .with_body(bundle_json(12))
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        // pre-cached bundle at evaluation number 10
        let cached: TcbInfoResponse = serde_json::from_str(&bundle_json(10)).unwrap();
        store
            .insert_tcb_info(&TcbInfoRow {
                fmspc: FMSPC.into(),
                tcb_evaluation_data_number: 10,
                issue_date: cached.tcb_info.issue_date,
                next_update: cached.tcb_info.next_update,
                tcb_type: 0,
                tcb_levels_json: serde_json::to_string(&cached.tcb_info.tcb_levels).unwrap(),
                raw_json: bundle_json(10),
                fetched_at: Utc::now(),
            })
            .await
            .unwrap();
        // two active registrations on the FMSPC, one on another
        store
            .insert_registry_event(&active_registration(
                "0x1111111111111111111111111111111111111111",
                FMSPC,
            ))
            .await
            .unwrap();
        let mut second = active_registration(
            "0x2222222222222222222222222222222222222222",
            FMSPC,
        );
        second.block_number = 101;
        store.insert_registry_event(&second).await.unwrap();
        let mut other = active_registration(
            "0x3333333333333333333333333333333333333333",
            "00806f050000",
        );
        other.block_number = 102;
        store.insert_registry_event(&other).await.unwrap();

        let worker = fetcher(&server.url(), store.clone());
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.updated, 1);
        assert_eq!(store.tcb_infos().len(), 2);

        // the alert is pending on the operator read path
        let alerts = store.unacknowledged_alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.fmspc, FMSPC);
        assert_eq!(alert.old_eval_number, 10);
        assert_eq!(alert.new_eval_number, 12);
        assert_eq!(alert.affected_quotes_count, 2);
        assert!(!alert.acknowledged);
        // sgx component 0 requirement moved 10 -> 12: one change, no downgrade
        assert!(alert.details.starts_with("severity=low"), "{}", alert.details);
    }

    #[tokio::test]
    async fn unchanged_eval_number_is_skipped() {
        let mut server = Server::new_async().await;
        mock_catalog(&mut server).await;
        server
            .mock("GET", "/tdx/certification/v4/tcb")
            .match_query(mockito::Matcher::UrlEncoded("fmspc".into(), FMSPC.into()))
            .with_status(200)
            .with_body(bundle_json(10))
            .expect(2)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let worker = fetcher(&server.url(), store.clone());
        worker.tick(&stopped_receiver()).await.unwrap();
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.tcb_infos().len(), 1);
        assert!(store.alerts().is_empty());
    }

    #[tokio::test]
    async fn missing_tdx_bundle_is_skipped_silently() {
        let mut server = Server::new_async().await;
        mock_catalog(&mut server).await;
        server
            .mock("GET", "/tdx/certification/v4/tcb")
            .match_query(mockito::Matcher::UrlEncoded("fmspc".into(), FMSPC.into()))
            .with_status(404)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let worker = fetcher(&server.url(), store.clone());
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.total, 1);
        assert_eq!(stats.updated, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 0);
        assert!(store.tcb_infos().is_empty());
    }

    #[tokio::test]
    async fn empty_catalog_writes_nothing() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/sgx/certification/v4/fmspcs")
            .match_query(mockito::Matcher::UrlEncoded("platform".into(), "all".into()))
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let worker = fetcher(&server.url(), store.clone());
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.total, 0);
        assert!(store.tcb_infos().is_empty());
        assert!(store.alerts().is_empty());
    }

    #[tokio::test]
    async fn malformed_bundle_counts_as_error_without_partial_writes() {
        let mut server = Server::new_async().await;
        mock_catalog(&mut server).await;
        server
            .mock("GET", "/tdx/certification/v4/tcb")
            .match_query(mockito::Matcher::UrlEncoded("fmspc".into(), FMSPC.into()))
            .with_status(200)
            .with_body(r#"{"unexpected": true}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        let worker = fetcher(&server.url(), store.clone());
        let stats = worker.tick(&stopped_receiver()).await.unwrap();

        assert_eq!(stats.errors, 1);
        assert!(store.tcb_infos().is_empty());
    }
}
