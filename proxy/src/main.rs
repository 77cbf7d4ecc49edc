// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT-0

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metadata_proxy::application::{AppState, Application};
use metadata_proxy::aws::{AwsIam, AwsSts};
use metadata_proxy::cache::Caches;
use metadata_proxy::configuration::{LogFormat, ProxyOptions};
use metadata_proxy::docker::DockerRuntime;
use metadata_proxy::telemetry;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
    );

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            // this needs to be set to remove duplicated information in the log.
            .with_current_span(false)
            // ANSI color codes are unreadable once shipped to a log store.
            .with_ansi(false)
            // remove the name of the function from every log entry
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("[metadataproxy] init");

    // get configuration options from arguments and environment variables
    let options = ProxyOptions::parse();
    init_tracing(options.log_format);

    tracing::info!("[metadataproxy] {:?}", &options);

    let metrics = telemetry::install_recorder().context("could not install metrics recorder")?;
    let runtime = Arc::new(DockerRuntime::connect().await?);

    let aws_config = aws_config::load_from_env().await;
    let iam = Arc::new(AwsIam::new(&aws_config));
    let sts = Arc::new(AwsSts::new(&aws_config));

    let caches = Caches::new();
    tracing::info!(
        "[metadataproxy] sweeping expired cache entries every {:#?}",
        options.cache_sweep_interval
    );
    caches.spawn_sweeper(options.cache_sweep_interval);

    let state = AppState::new(options, runtime, iam, sts, &caches).with_metrics(metrics);
    let application = Application::build(state).await?;

    application.run_until_stopped().await?;
    Ok(())
}
