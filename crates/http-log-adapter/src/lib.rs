// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships streamed log records to an HTTP collector in batches.
//!
//! Records are accumulated in a bounded buffer and flushed either when the
//! buffer reaches its capacity or when the flush interval elapses, whichever
//! comes first. Each flush is serialized to newline-delimited JSON and
//! delivered by its own task, optionally gzip-compressed and authenticated,
//! with exponential backoff between retries.
//!
//! ```rust,ignore
//! use http_log_adapter::{adapter::HttpAdapter, config::Route};
//!
//! let route = Route::parse("https://collector:8443/ingest?buffer.capacity=500")?;
//! let (tx, handle) = HttpAdapter::from_route(&route)?.spawn();
//! tx.send(record)?;
//! drop(tx);
//! handle.await??;
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod adapter;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flusher;
pub mod http;
pub mod record;
pub mod serializer;
