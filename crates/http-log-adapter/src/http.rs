// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound HTTP client construction.

use crate::config::AdapterConfig;
use core::time::Duration;
use reqwest::ClientBuilder;
use std::error::Error;
use tracing::debug;

/// Creates a reqwest client builder using the rustls TLS implementation.
fn create_reqwest_client_builder() -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls()
}

/// Builds the client a delivery pipeline sends through.
///
/// Connections are pooled so that draining a failed response lets the next
/// attempt reuse its connection. When a proxy is configured, all traffic is
/// routed through it and certificate verification is relaxed, since
/// intercepting proxies commonly re-sign upstream TLS.
pub fn build_client(config: &AdapterConfig) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = create_reqwest_client_builder()
        .timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if let Some(proxy_url) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url.clone())?;
        client = client.proxy(proxy).danger_accept_invalid_certs(true);
        debug!("HTTP_LOGS | routing through proxy {proxy_url}, TLS verification relaxed");
    }

    Ok(client.build()?)
}
