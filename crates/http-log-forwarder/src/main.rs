// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::{env, process::ExitCode};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use http_log_adapter::{
    adapter::HttpAdapter,
    config::Route,
    errors::AdapterError,
    record::{ContainerInfo, LogRecord},
};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_SOURCE: &str = "stdout";

fn container_from_env() -> ContainerInfo {
    let var = |key: &str| env::var(key).unwrap_or_default();
    ContainerInfo {
        name: var("LOG_CONTAINER_NAME"),
        id: var("LOG_CONTAINER_ID"),
        image: var("LOG_CONTAINER_IMAGE"),
        hostname: var("HOSTNAME"),
    }
}

fn install_subscriber(log_level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(format!("h2=off,hyper=off,rustls=off,{log_level}"))?;
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(logger::Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    if let Err(e) = install_subscriber(&log_level) {
        eprintln!("LOG_FORWARDER | ERROR | Unable to install logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    let Ok(route_uri) = env::var("LOG_ROUTE") else {
        error!("LOG_ROUTE is not set, nothing to forward to");
        return ExitCode::FAILURE;
    };

    let adapter = match Route::parse(&route_uri)
        .map_err(AdapterError::from)
        .and_then(|route| HttpAdapter::from_route(&route))
    {
        Ok(adapter) => adapter,
        Err(e) => {
            error!("Error creating adapter for route {route_uri}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let source = env::var("LOG_SOURCE").unwrap_or(DEFAULT_SOURCE.to_string());
    let container = container_from_env();
    let cancel_token = adapter.cancel_token();
    let stats = adapter.stats();
    let (tx, mut handle) = adapter.spawn();

    info!("Forwarding stdin to {route_uri}");

    let mut lines = BufReader::new(io::stdin()).lines();
    let result = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if tx.send(LogRecord::new(line, source.as_str(), container.clone())).is_err() {
                        debug!("Adapter stopped accepting records");
                    }
                }
                Ok(None) => {
                    debug!("End of input, draining adapter");
                    drop(tx);
                    break (&mut handle).await;
                }
                Err(e) => {
                    warn!("Unable to read from stdin: {e}");
                    drop(tx);
                    break (&mut handle).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, flushing buffered records");
                cancel_token.cancel();
                break (&mut handle).await;
            }
            joined = &mut handle => break joined,
        }
    };

    info!(
        "Forwarded {} messages in {} batches, {} messages lost",
        stats.messages_delivered(),
        stats.batches_delivered(),
        stats.messages_lost()
    );

    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("Adapter stopped: {e}");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Adapter task failed: {e}");
            ExitCode::FAILURE
        }
    }
}
