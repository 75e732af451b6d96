// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while resolving a route into an adapter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Unsupported adapter scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Cannot parse proxy URL {url}: {reason}")]
    InvalidProxy { url: String, reason: String },
}

/// Why a single delivery attempt did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptFailure {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("response not 2xx but {0}")]
    Status(StatusCode),
}

/// Terminal outcome of a delivery run that did not ship its batch.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Crash mode turned a failed attempt into an adapter-terminating fault.
    #[error("delivery failed on attempt {attempts}: {cause}")]
    Fatal {
        attempts: u32,
        #[source]
        cause: AttemptFailure,
    },

    #[error("stopped retrying after {attempts} attempts, {messages} messages lost: {cause}")]
    Exhausted {
        attempts: u32,
        messages: usize,
        #[source]
        cause: AttemptFailure,
    },

    #[error("unable to gzip payload, {messages} messages lost: {source}")]
    Compression {
        messages: usize,
        #[source]
        source: std::io::Error,
    },
}

impl DeliveryError {
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// Number of messages the failed run dropped.
    #[must_use]
    pub fn messages_lost(&self) -> Option<usize> {
        match self {
            Self::Fatal { .. } => None,
            Self::Exhausted { messages, .. } | Self::Compression { messages, .. } => {
                Some(*messages)
            }
        }
    }
}

/// Errors returned by a running adapter to its supervisor.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Fatal delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Delivery task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
