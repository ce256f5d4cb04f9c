// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! TDX attestation registry monitor.
//!
//! Runs up to three long-running workers over a shared columnar store: the
//! registry ingester, the Intel PCS TCB poller and the quote evaluator. Each
//! worker owns its poll loop and checkpoint; a SIGINT/SIGTERM flips the stop
//! channel and every worker exits at its next safe point.

mod client;
mod core;
mod error;
mod workers;

use crate::{
    client::EthLedgerClient,
    core::{Config, WorkerSelection},
    workers::{IngesterConfig, PcsFetcher, QuoteEvaluator, RegistryIngester},
};
use anyhow::Context;
use clap::Parser;
use intel_pcs_api::PcsClient;
use std::sync::Arc;
use tcb_notify::{
    log::setup_logging,
    store::ClickhouseStore,
    verify::{TcbLevelVerifier, VerifyOptions},
};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    setup_logging(env!("CARGO_CRATE_NAME"), &config.log_level)?;

    let store = Arc::new(
        ClickhouseStore::connect(&config.clickhouse())
            .await
            .context("store unreachable")?,
    );
    store.migrate().await.context("store migration failed")?;

    let (stop_sender, stop_receiver) = watch::channel(false);
    let mut tasks = Vec::new();

    let selection = config.worker_selection();
    info!(?selection, "Starting workers");

    if matches!(selection, WorkerSelection::Ingest | WorkerSelection::All) {
        let ledger = Arc::new(
            EthLedgerClient::new(config.rpc_url.clone()).context("ledger client setup failed")?,
        );
        let ingester = RegistryIngester::new(
            ledger,
            store.clone(),
            store.clone(),
            IngesterConfig {
                poll_interval: config.ingest_poll_interval,
                batch_blocks: config.ingest_batch_blocks,
                registry_address: config.registry_address,
            },
        );
        tasks.push(tokio::spawn(ingester.run(stop_receiver.clone())));
    }

    if matches!(selection, WorkerSelection::TcbPoll | WorkerSelection::All) {
        let pcs_client =
            PcsClient::new_with_options(config.tcb_base_url.clone(), config.tcb_api_key.clone())
                .context("PCS client setup failed")?;
        let fetcher = PcsFetcher::new(
            pcs_client,
            store.clone(),
            store.clone(),
            store.clone(),
            config.tcb_poll_interval,
        );
        tasks.push(tokio::spawn(fetcher.run(stop_receiver.clone())));
    }

    if matches!(selection, WorkerSelection::Evaluate | WorkerSelection::All) {
        let verifier = Arc::new(TcbLevelVerifier::new(store.clone()));
        let evaluator = QuoteEvaluator::new(
            store.clone(),
            store.clone(),
            verifier,
            VerifyOptions {
                get_collateral: config.evaluate_get_collateral,
                check_revocations: config.evaluate_check_revocations,
            },
            config.evaluate_poll_interval,
        );
        tasks.push(tokio::spawn(evaluator.run(stop_receiver.clone())));
    }
    drop(stop_receiver);

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received, stopping workers");
        let _ = stop_sender.send(true);
    });

    for task in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Worker exited with error: {e}"),
            Err(e) => error!("Worker panicked: {e}"),
        }
    }

    info!("Service stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
