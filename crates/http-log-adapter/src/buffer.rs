// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::LogRecord;
use std::sync::Mutex;

/// Append-only batch of pending records.
///
/// The buffer never refuses an append. Keeping it within `capacity` is the
/// job of the flush loop, which swaps it out as soon as
/// [`BatchBuffer::capacity_reached`] turns true.
#[derive(Debug)]
pub struct BatchBuffer {
    capacity: usize,
    records: Mutex<Vec<LogRecord>>,
}

impl BatchBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn append(&self, record: LogRecord) {
        #[allow(clippy::expect_used)]
        let mut records = self.records.lock().expect("lock poisoned");
        records.push(record);
    }

    #[must_use]
    pub fn capacity_reached(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Takes the pending records and leaves an empty buffer of the same
    /// capacity behind. Appenders see either the old or the new vector,
    /// never a partially drained one.
    pub fn swap(&self) -> Vec<LogRecord> {
        let fresh = Vec::with_capacity(self.capacity);
        #[allow(clippy::expect_used)]
        let mut records = self.records.lock().expect("lock poisoned");
        std::mem::replace(&mut *records, fresh)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let records = self.records.lock().expect("lock poisoned");
        records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
