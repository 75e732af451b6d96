// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records as handed to the adapter by the host process.

use chrono::{DateTime, Utc};

/// Identity of the container a record originates from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub id: String,
    pub image: String,
    /// Hostname declared in the container configuration.
    pub hostname: String,
}

/// A single log line together with its origin.
///
/// The adapter never mutates a record; it copies the fields it needs when
/// the batch holding it is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub data: String,
    /// Stream the line was read from, usually `stdout` or `stderr`.
    pub source: String,
    pub container: ContainerInfo,
}

impl LogRecord {
    #[must_use]
    pub fn new(data: impl Into<String>, source: impl Into<String>, container: ContainerInfo) -> Self {
        Self {
            time: Utc::now(),
            data: data.into(),
            source: source.into(),
            container,
        }
    }

    #[must_use]
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }
}
