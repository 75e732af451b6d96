// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Flush loop tying the buffer, serializer and delivery tasks together.
//!
//! # Architecture
//!
//! ```text
//!   Producers
//!       │ LogRecord (unbounded channel, never blocks)
//!       v
//!   ┌──────────────┐
//!   │  Flush loop  │──── timer (buffer.timeout)
//!   └──────┬───────┘
//!          │ append / swap
//!          v
//!   ┌──────────────┐
//!   │ BatchBuffer  │
//!   └──────┬───────┘
//!          │ drained batch
//!          v
//!   ┌──────────────┐
//!   │  Serializer  │
//!   └──────┬───────┘
//!          │ Payload
//!          v
//!   ┌──────────────┐
//!   │  Deliveries  │ (JoinSet, one task per flush)
//!   └──────────────┘
//! ```
//!
//! The loop is the only task deciding when to drain. Each drained batch is
//! delivered by its own task so that retries never hold up accumulation of
//! the next batch. Completed deliveries are reaped by the loop, which is
//! where crash mode turns a failure into an error for the supervisor.
//!
//! # Shutdown
//!
//! The loop stops when its cancellation token fires or when every producer
//! handle is dropped. Records still queued in the channel are drained in
//! batches no larger than the capacity, the remainder is flushed one last
//! time, and the loop waits for in-flight deliveries before returning.

use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{sleep, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::buffer::BatchBuffer;
use crate::config::{AdapterConfig, Route};
use crate::errors::{AdapterError, DeliveryError};
use crate::flusher::{DeliveryReport, DeliveryStats, Flusher, PayloadSender};
use crate::http::build_client;
use crate::record::LogRecord;
use crate::serializer::{serialize_batch, FlushReason};

type DeliveryResult = Result<DeliveryReport, DeliveryError>;

/// Adapter that batches records and posts them to an HTTP collector.
pub struct HttpAdapter {
    config: Arc<AdapterConfig>,
    buffer: Arc<BatchBuffer>,
    sender: Arc<dyn PayloadSender>,
    stats: Arc<DeliveryStats>,
    deliveries: JoinSet<DeliveryResult>,
    cancel_token: CancellationToken,
}

impl HttpAdapter {
    /// Creates an adapter delivering over HTTP with a client built from
    /// `config`.
    pub fn new(config: AdapterConfig) -> Result<Self, AdapterError> {
        let client = build_client(&config).map_err(|e| AdapterError::Client(e.to_string()))?;
        let config = Arc::new(config);
        let flusher = Flusher::new(client, Arc::clone(&config));
        Ok(Self::with_sender(config, Arc::new(flusher)))
    }

    pub fn from_route(route: &Route) -> Result<Self, AdapterError> {
        Self::new(AdapterConfig::from_route(route)?)
    }

    /// Creates an adapter handing its payloads to `sender`.
    #[must_use]
    pub fn with_sender(config: Arc<AdapterConfig>, sender: Arc<dyn PayloadSender>) -> Self {
        Self {
            buffer: Arc::new(BatchBuffer::new(config.buffer_capacity)),
            config,
            sender,
            stats: Arc::new(DeliveryStats::default()),
            deliveries: JoinSet::new(),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Token that stops the flush loop once cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn stats(&self) -> Arc<DeliveryStats> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn buffer(&self) -> Arc<BatchBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Spawns the flush loop and returns the producer handle along with the
    /// loop's join handle.
    #[must_use]
    pub fn spawn(
        self,
    ) -> (
        mpsc::UnboundedSender<LogRecord>,
        JoinHandle<Result<(), AdapterError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.stream(rx));
        (tx, handle)
    }

    /// Runs the flush loop until cancellation or until `logstream` closes.
    ///
    /// Returns an error only when a delivery failed in crash mode or a
    /// delivery task panicked; in both cases the remaining deliveries are
    /// aborted.
    pub async fn stream(
        mut self,
        mut logstream: mpsc::UnboundedReceiver<LogRecord>,
    ) -> Result<(), AdapterError> {
        info!(
            "HTTP_LOGS | Streaming to {} (capacity: {}, timeout: {:?})",
            self.config.endpoint, self.config.buffer_capacity, self.config.buffer_timeout
        );

        let timer = sleep(self.config.buffer_timeout);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!("HTTP_LOGS | Received shutdown signal");
                    break;
                }
                Some(joined) = self.deliveries.join_next(), if !self.deliveries.is_empty() => {
                    self.reap(joined)?;
                }
                record = logstream.recv() => {
                    let Some(record) = record else {
                        debug!("HTTP_LOGS | Log stream closed");
                        break;
                    };
                    self.buffer.append(record);
                    if self.buffer.capacity_reached() {
                        debug!("HTTP_LOGS | full - flush");
                        self.flush(FlushReason::Full, timer.as_mut());
                    }
                }
                () = &mut timer => {
                    debug!("HTTP_LOGS | timeout - flush");
                    self.flush(FlushReason::Timeout, timer.as_mut());
                }
            }
        }

        self.shutdown(logstream).await
    }

    /// Drains the buffer into a delivery task and re-arms the timer, even
    /// when there was nothing to send.
    fn flush(&mut self, reason: FlushReason, timer: Pin<&mut Sleep>) {
        self.dispatch(reason);
        timer.reset(Instant::now() + self.config.buffer_timeout);
    }

    fn dispatch(&mut self, reason: FlushReason) {
        if self.buffer.is_empty() {
            return;
        }

        let batch = self.buffer.swap();
        let Some(payload) = serialize_batch(&batch, self.config.hostname.as_deref(), reason)
        else {
            return;
        };

        let sender = Arc::clone(&self.sender);
        self.deliveries
            .spawn(async move { sender.deliver(payload).await });
    }

    fn reap(&mut self, joined: Result<DeliveryResult, JoinError>) -> Result<(), AdapterError> {
        match joined {
            Ok(Ok(report)) => {
                let total = self.stats.record_delivered(&report);
                debug!(
                    "HTTP_LOGS | flushed messages: {} in: {} ms attempts: {} total: {total}",
                    report.messages,
                    report.latency.as_millis(),
                    report.attempts
                );
                Ok(())
            }
            Ok(Err(e)) if e.is_fatal() => {
                error!("HTTP_LOGS | {e}, stopping adapter");
                self.deliveries.abort_all();
                Err(e.into())
            }
            Ok(Err(e)) => {
                self.stats.record_lost(e.messages_lost().unwrap_or_default());
                error!("HTTP_LOGS | Stop retrying - logs lost: {e}");
                Ok(())
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                error!("HTTP_LOGS | Delivery task panicked: {e}");
                self.deliveries.abort_all();
                Err(e.into())
            }
        }
    }

    async fn shutdown(
        mut self,
        mut logstream: mpsc::UnboundedReceiver<LogRecord>,
    ) -> Result<(), AdapterError> {
        logstream.close();
        while let Ok(record) = logstream.try_recv() {
            self.buffer.append(record);
            if self.buffer.capacity_reached() {
                self.dispatch(FlushReason::Full);
            }
        }
        self.dispatch(FlushReason::Shutdown);

        while let Some(joined) = self.deliveries.join_next().await {
            self.reap(joined)?;
        }

        info!(
            "HTTP_LOGS | Adapter stopped, {} messages delivered, {} lost",
            self.stats.messages_delivered(),
            self.stats.messages_lost()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AttemptFailure;
    use crate::record::ContainerInfo;
    use crate::serializer::Payload;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Clone, Copy)]
    enum Outcome {
        Delivered,
        Lost,
        Fatal,
    }

    /// Records every payload it is handed and answers with a fixed outcome.
    struct RecordingSender {
        tx: mpsc::UnboundedSender<Payload>,
        outcome: Outcome,
    }

    #[async_trait]
    impl PayloadSender for RecordingSender {
        async fn deliver(&self, payload: Payload) -> Result<DeliveryReport, DeliveryError> {
            let messages = payload.messages;
            self.tx.send(payload).expect("test receiver dropped");
            match self.outcome {
                Outcome::Delivered => Ok(DeliveryReport {
                    attempts: 1,
                    messages,
                    latency: Duration::from_millis(3),
                }),
                Outcome::Lost => Err(DeliveryError::Exhausted {
                    attempts: 6,
                    messages,
                    cause: AttemptFailure::Status(StatusCode::SERVICE_UNAVAILABLE),
                }),
                Outcome::Fatal => Err(DeliveryError::Fatal {
                    attempts: 1,
                    cause: AttemptFailure::Status(StatusCode::INTERNAL_SERVER_ERROR),
                }),
            }
        }
    }

    fn create_test_config(capacity: &str, buffer_timeout: &str) -> Arc<AdapterConfig> {
        let route = Route {
            adapter: "http".to_string(),
            address: "127.0.0.1:9".to_string(),
            options: [
                ("buffer.capacity".to_string(), capacity.to_string()),
                ("buffer.timeout".to_string(), buffer_timeout.to_string()),
            ]
            .into_iter()
            .collect(),
        };
        Arc::new(AdapterConfig::from_route(&route).unwrap())
    }

    fn create_test_adapter(
        capacity: &str,
        buffer_timeout: &str,
        outcome: Outcome,
    ) -> (HttpAdapter, mpsc::UnboundedReceiver<Payload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = HttpAdapter::with_sender(
            create_test_config(capacity, buffer_timeout),
            Arc::new(RecordingSender { tx, outcome }),
        );
        (adapter, rx)
    }

    fn record(data: &str) -> LogRecord {
        LogRecord::new(data, "stdout", ContainerInfo::default())
    }

    fn messages(payload: &Payload) -> Vec<String> {
        payload
            .body
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).unwrap();
                value["message"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_flush_is_immediate() {
        let (adapter, mut payloads) = create_test_adapter("2", "10s", Outcome::Delivered);
        let buffer = adapter.buffer();
        let (tx, _handle) = adapter.spawn();

        tx.send(record("A")).unwrap();
        tx.send(record("B")).unwrap();

        let payload = timeout(Duration::from_millis(10), payloads.recv())
            .await
            .expect("capacity flush did not happen")
            .unwrap();
        assert_eq!(payload.reason, FlushReason::Full);
        assert_eq!(messages(&payload), vec!["A", "B"]);
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_sends_partial_batch() {
        let (adapter, mut payloads) = create_test_adapter("100", "100ms", Outcome::Delivered);
        let (tx, _handle) = adapter.spawn();

        tx.send(record("A")).unwrap();

        assert!(timeout(Duration::from_millis(90), payloads.recv())
            .await
            .is_err());
        let payload = timeout(Duration::from_millis(20), payloads.recv())
            .await
            .expect("timer flush did not happen")
            .unwrap();
        assert_eq!(payload.reason, FlushReason::Timeout);
        assert_eq!(messages(&payload), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_timer_flush_keeps_cadence() {
        let (adapter, mut payloads) = create_test_adapter("100", "100ms", Outcome::Delivered);
        let (tx, _handle) = adapter.spawn();

        // Several intervals pass with nothing to send.
        assert!(timeout(Duration::from_millis(350), payloads.recv())
            .await
            .is_err());

        tx.send(record("late")).unwrap();
        let payload = timeout(Duration::from_millis(60), payloads.recv())
            .await
            .expect("timer stopped after empty flushes")
            .unwrap();
        assert_eq!(messages(&payload), vec!["late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_flush_resets_timer() {
        let (adapter, mut payloads) = create_test_adapter("2", "100ms", Outcome::Delivered);
        let (tx, _handle) = adapter.spawn();

        sleep(Duration::from_millis(80)).await;
        tx.send(record("A")).unwrap();
        tx.send(record("B")).unwrap();
        let payload = payloads.recv().await.unwrap();
        assert_eq!(payload.reason, FlushReason::Full);

        tx.send(record("C")).unwrap();
        // The original deadline at 100ms was pushed back to 180ms.
        assert!(timeout(Duration::from_millis(60), payloads.recv())
            .await
            .is_err());
        let payload = timeout(Duration::from_millis(60), payloads.recv())
            .await
            .expect("timer flush did not happen")
            .unwrap();
        assert_eq!(payload.reason, FlushReason::Timeout);
        assert_eq!(messages(&payload), vec!["C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_stream_flushes_remaining_records() {
        let (adapter, mut payloads) = create_test_adapter("100", "10s", Outcome::Delivered);
        let stats = adapter.stats();
        let (tx, handle) = adapter.spawn();

        for i in 0..250 {
            tx.send(record(&format!("line {i}"))).unwrap();
        }
        drop(tx);

        handle.await.unwrap().unwrap();

        let mut reasons = Vec::new();
        let mut delivered = Vec::new();
        while let Ok(payload) = payloads.try_recv() {
            reasons.push(payload.reason);
            delivered.extend(messages(&payload));
        }
        assert_eq!(
            reasons,
            vec![FlushReason::Full, FlushReason::Full, FlushReason::Shutdown]
        );
        let expected: Vec<String> = (0..250).map(|i| format!("line {i}")).collect();
        assert_eq!(delivered, expected);
        assert_eq!(stats.messages_delivered(), 250);
        assert_eq!(stats.batches_delivered(), 3);
        assert!(stats.last_flush_latency().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_flushes_and_stops() {
        let (adapter, mut payloads) = create_test_adapter("100", "10s", Outcome::Delivered);
        let cancel_token = adapter.cancel_token();
        let (tx, handle) = adapter.spawn();

        tx.send(record("A")).unwrap();
        tokio::task::yield_now().await;
        cancel_token.cancel();

        handle.await.unwrap().unwrap();
        let payload = payloads.recv().await.unwrap();
        assert_eq!(payload.reason, FlushReason::Shutdown);
        assert_eq!(messages(&payload), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_with_backlog_keeps_batches_within_capacity() {
        let (adapter, mut payloads) = create_test_adapter("2", "10s", Outcome::Delivered);
        let cancel_token = adapter.cancel_token();
        let (tx, handle) = adapter.spawn();

        // Queue more than a batch before the loop gets to run.
        for i in 0..7 {
            tx.send(record(&format!("line {i}"))).unwrap();
        }
        cancel_token.cancel();
        handle.await.unwrap().unwrap();

        let mut batches = Vec::new();
        let mut delivered = Vec::new();
        while let Ok(payload) = payloads.try_recv() {
            batches.push((payload.reason, payload.messages));
            delivered.extend(messages(&payload));
        }
        assert!(
            batches.iter().all(|(_, size)| *size <= 2),
            "batch over capacity: {batches:?}"
        );
        assert_eq!(batches.last(), Some(&(FlushReason::Shutdown, 1)));
        let expected: Vec<String> = (0..7).map(|i| format!("line {i}")).collect();
        assert_eq!(delivered, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_batch_does_not_stop_adapter() {
        let (adapter, mut payloads) = create_test_adapter("1", "10s", Outcome::Lost);
        let stats = adapter.stats();
        let (tx, handle) = adapter.spawn();

        tx.send(record("A")).unwrap();
        tx.send(record("B")).unwrap();
        assert_eq!(messages(&payloads.recv().await.unwrap()), vec!["A"]);
        assert_eq!(messages(&payloads.recv().await.unwrap()), vec!["B"]);
        drop(tx);

        handle.await.unwrap().unwrap();
        assert_eq!(stats.messages_lost(), 2);
        assert_eq!(stats.batches_lost(), 2);
        assert_eq!(stats.messages_delivered(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_delivery_stops_adapter() {
        let (adapter, _payloads) = create_test_adapter("1", "10s", Outcome::Fatal);
        let (tx, handle) = adapter.spawn();

        tx.send(record("A")).unwrap();

        let result = timeout(Duration::from_secs(1), handle)
            .await
            .expect("adapter kept running after a fatal error")
            .unwrap();
        assert!(matches!(
            result,
            Err(AdapterError::Delivery(DeliveryError::Fatal { attempts: 1, .. }))
        ));
    }

    #[test]
    fn test_new_with_invalid_route() {
        let route = Route {
            adapter: "udp".to_string(),
            address: "127.0.0.1:514".to_string(),
            options: std::collections::HashMap::new(),
        };
        assert!(matches!(
            HttpAdapter::from_route(&route),
            Err(AdapterError::Config(_))
        ));
    }
}
