// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use credentials_sidecar::configuration::SidecarOptions;
use credentials_sidecar::metrics::init_metrics;
use credentials_sidecar::sidecar::Sidecar;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("[sidecar] init");

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        // this needs to be set to remove duplicated information in the log.
        .with_current_span(false)
        // this needs to be set to false, otherwise ANSI color codes will
        // show up in a confusing manner in the log collector.
        .with_ansi(false)
        // disabling time is handy because the log collector adds the ingestion time.
        .without_time()
        // remove the name of the function from every log entry
        .with_target(false)
        .init();

    // get configuration options from arguments and environment variables
    let options = SidecarOptions::parse();

    tracing::info!("[sidecar] {:?}", &options);

    let metrics = init_metrics()?;
    let sidecar = Arc::new(Sidecar::new(options, metrics)?);

    let cancel = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("unable to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("unable to install SIGINT handler")?;
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("[sidecar] received SIGTERM"),
                _ = sigint.recv() => tracing::info!("[sidecar] received SIGINT"),
            }
            cancel.cancel();
        });
    }

    sidecar.run(cancel).await.context("sidecar stopped with an error")
}
