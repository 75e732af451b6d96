// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and validity bounds for adapter settings.
//!
//! Values outside of these bounds are never rejected: the configuration
//! resolver logs them and falls back to the default.

use std::time::Duration;

/// Number of buffered records that triggers a flush when no option is given.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Smallest accepted `buffer.capacity`.
pub const MIN_BUFFER_CAPACITY: usize = 1;

/// Largest accepted `buffer.capacity`.
///
/// A batch is held in memory in full while it is serialized, so this bounds
/// the memory a single flush can take.
pub const MAX_BUFFER_CAPACITY: usize = 10_000;

/// Interval of the time-based flush when no option is given.
pub const DEFAULT_BUFFER_TIMEOUT: Duration = Duration::from_millis(1_000);

pub const MIN_BUFFER_TIMEOUT: Duration = Duration::from_millis(100);

pub const MAX_BUFFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-attempt HTTP timeout when no option is given.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Retries after the first attempt: six attempts in total.
pub const MAX_RETRIES: u32 = 5;

/// Base of the exponential backoff. The delay before retry `n` is
/// `DEFAULT_BACKOFF_BASE * 2^n`, i.e. 2s, 4s, 8s, 16s and 32s.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Prefix accepted in front of every option key, e.g. `http.buffer.capacity`.
pub(crate) const OPTION_PREFIX: &str = "http.";
