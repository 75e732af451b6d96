// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of serialized batches to the collector.
//!
//! ```text
//!   Payload
//!      │
//!      v
//!   ┌──────────┐
//!   │   Gzip   │ (optional, once per payload)
//!   └────┬─────┘
//!        v
//!   ┌──────────┐   2xx
//!   │   POST   │ ───────> delivered
//!   └────┬─────┘
//!        │ transport error / non-2xx
//!        v
//!   crash mode? ──yes──> fatal
//!        │ no
//!        v
//!   backoff, retry (up to 5 times) ──> lost
//! ```

use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::AdapterConfig;
use crate::errors::{AttemptFailure, DeliveryError};
use crate::serializer::Payload;

/// Summary of a delivery run that reached the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempts: u32,
    pub messages: usize,
    pub latency: Duration,
}

/// Ships one payload. Implementations own their retry behaviour.
#[async_trait]
pub trait PayloadSender: Send + Sync {
    async fn deliver(&self, payload: Payload) -> Result<DeliveryReport, DeliveryError>;
}

/// Per-adapter delivery counters.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    messages_delivered: AtomicUsize,
    batches_delivered: AtomicUsize,
    messages_lost: AtomicUsize,
    batches_lost: AtomicUsize,
    last_flush_latency_us: AtomicU64,
}

impl DeliveryStats {
    pub fn record_delivered(&self, report: &DeliveryReport) -> usize {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.last_flush_latency_us.store(
            u64::try_from(report.latency.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        self.messages_delivered
            .fetch_add(report.messages, Ordering::Relaxed)
            + report.messages
    }

    pub fn record_lost(&self, messages: usize) {
        self.batches_lost.fetch_add(1, Ordering::Relaxed);
        self.messages_lost.fetch_add(messages, Ordering::Relaxed);
    }

    #[must_use]
    pub fn messages_delivered(&self) -> usize {
        self.messages_delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batches_delivered(&self) -> usize {
        self.batches_delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_lost(&self) -> usize {
        self.messages_lost.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batches_lost(&self) -> usize {
        self.batches_lost.load(Ordering::Relaxed)
    }

    /// Latency of the most recent successful delivery, retries included.
    #[must_use]
    pub fn last_flush_latency(&self) -> Option<Duration> {
        match self.last_flush_latency_us.load(Ordering::Relaxed) {
            0 => None,
            us => Some(Duration::from_micros(us)),
        }
    }
}

/// HTTP delivery of payloads to the configured collector endpoint.
#[derive(Debug, Clone)]
pub struct Flusher {
    client: reqwest::Client,
    config: Arc<AdapterConfig>,
}

impl Flusher {
    #[must_use]
    pub fn new(client: reqwest::Client, config: Arc<AdapterConfig>) -> Self {
        Flusher { client, config }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.config.use_gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        headers
    }

    fn encode(&self, payload: String) -> Result<Vec<u8>, std::io::Error> {
        if !self.config.use_gzip {
            return Ok(payload.into_bytes());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload.as_bytes())?;
        encoder.finish()
    }

    fn create_request(&self, body: Vec<u8>) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(self.config.endpoint.clone())
            .headers(self.headers())
            .body(body);
        match &self.config.credentials {
            Some(credentials) => {
                request.basic_auth(&credentials.user, Some(&credentials.password))
            }
            None => request,
        }
    }

    async fn attempt(&self, body: &[u8]) -> Result<(), AttemptFailure> {
        let response = self.create_request(body.to_vec()).send().await?;
        let status = response.status();
        // Read the whole body so the connection goes back to the pool.
        if let Err(e) = response.bytes().await {
            debug!("HTTP_LOGS | Failed to drain response body: {e}");
        }
        if status.is_success() {
            Ok(())
        } else {
            Err(AttemptFailure::Status(status))
        }
    }

    /// Runs the build, send and retry sequence for one payload.
    ///
    /// The body is compressed once and re-sent as is on every attempt.
    pub async fn send(&self, payload: Payload) -> Result<DeliveryReport, DeliveryError> {
        let messages = payload.messages;
        let reason = payload.reason;
        let body = self
            .encode(payload.body)
            .map_err(|source| DeliveryError::Compression { messages, source })?;

        let retry = self.config.retry;
        let start = Instant::now();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let attempt_start = Instant::now();
            let result = self.attempt(&body).await;
            let elapsed = attempt_start.elapsed();

            let cause = match result {
                Ok(()) => {
                    return Ok(DeliveryReport {
                        attempts,
                        messages,
                        latency: start.elapsed(),
                    });
                }
                Err(cause) => cause,
            };

            // Terminal outcomes are logged at error by whoever reaps the run.
            if self.config.crash_on_error {
                return Err(DeliveryError::Fatal { attempts, cause });
            }

            if attempts >= retry.max_attempts() {
                return Err(DeliveryError::Exhausted {
                    attempts,
                    messages,
                    cause,
                });
            }

            let backoff = retry.backoff(attempts);
            warn!(
                "HTTP_LOGS | Attempt {attempts} to {} failed after {} ms: {cause}, retrying {reason} flush of {messages} messages after {} ms",
                self.config.endpoint,
                elapsed.as_millis(),
                backoff.as_millis()
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl PayloadSender for Flusher {
    async fn deliver(&self, payload: Payload) -> Result<DeliveryReport, DeliveryError> {
        self.send(payload).await
    }
}
