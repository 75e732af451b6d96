// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a drained batch into the newline-delimited JSON body sent to the
//! collector.

use crate::record::LogRecord;
use chrono::SecondsFormat;
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Wire shape of a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage<'a> {
    pub message: &'a str,
    pub time: String,
    pub source: &'a str,
    #[serde(rename = "docker_name")]
    pub name: &'a str,
    #[serde(rename = "docker_id")]
    pub id: &'a str,
    #[serde(rename = "docker_image")]
    pub image: &'a str,
    #[serde(rename = "docker_hostname")]
    pub hostname: &'a str,
}

impl<'a> OutboundMessage<'a> {
    /// Projects `record` onto the wire shape. A non-empty `hostname_override`
    /// replaces the hostname declared by the record's container.
    #[must_use]
    pub fn from_record(record: &'a LogRecord, hostname_override: Option<&'a str>) -> Self {
        let hostname = match hostname_override {
            Some(hostname) if !hostname.is_empty() => hostname,
            _ => record.container.hostname.as_str(),
        };
        Self {
            message: &record.data,
            time: record.time.to_rfc3339_opts(SecondsFormat::Secs, true),
            source: &record.source,
            name: &record.container.name,
            id: &record.container.id,
            image: &record.container.image,
            hostname,
        }
    }
}

/// What made the flush loop drain the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Full,
    Timeout,
    Shutdown,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Full => "full",
            Self::Timeout => "timeout",
            Self::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// A serialized batch, ready to be handed to a delivery task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: String,
    pub messages: usize,
    pub reason: FlushReason,
}

/// Serializes `batch` one record per line, preserving batch order.
///
/// A record that fails to encode is logged and left out; the others still
/// ship. Returns `None` when nothing could be encoded.
#[must_use]
pub fn serialize_batch(
    batch: &[LogRecord],
    hostname_override: Option<&str>,
    reason: FlushReason,
) -> Option<Payload> {
    let mut lines = Vec::with_capacity(batch.len());
    for record in batch {
        let message = OutboundMessage::from_record(record, hostname_override);
        match serde_json::to_string(&message) {
            Ok(line) => lines.push(line),
            Err(e) => {
                debug!("HTTP_LOGS | Error encoding log record, skipping it: {e}");
            }
        }
    }

    if lines.is_empty() {
        return None;
    }

    Some(Payload {
        messages: lines.len(),
        body: lines.join("\n"),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ContainerInfo;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    fn record(data: &str, hostname: &str) -> LogRecord {
        LogRecord::new(
            data,
            "stderr",
            ContainerInfo {
                name: "/web".to_string(),
                id: "8f3c2a".to_string(),
                image: "nginx:1.25".to_string(),
                hostname: hostname.to_string(),
            },
        )
        .with_time(Utc.with_ymd_and_hms(2024, 3, 5, 17, 4, 9).unwrap())
    }

    #[test]
    fn test_outbound_message_fields() {
        let record = record("GET / 200", "web-1");
        let line = serde_json::to_string(&OutboundMessage::from_record(&record, None)).unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["message"], "GET / 200");
        assert_eq!(value["time"], "2024-03-05T17:04:09Z");
        assert_eq!(value["source"], "stderr");
        assert_eq!(value["docker_name"], "/web");
        assert_eq!(value["docker_id"], "8f3c2a");
        assert_eq!(value["docker_image"], "nginx:1.25");
        assert_eq!(value["docker_hostname"], "web-1");
        assert_eq!(value.as_object().unwrap().len(), 7);
    }

    #[test]
    fn test_hostname_override_wins() {
        let batch = vec![record("a", "web-1"), record("b", "web-2")];
        let payload = serialize_batch(&batch, Some("collector-host"), FlushReason::Full).unwrap();

        for line in payload.body.lines() {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["docker_hostname"], "collector-host");
        }
    }

    #[test]
    fn test_empty_override_falls_back_to_record_hostname() {
        let batch = vec![record("a", "web-1"), record("b", "web-2")];
        let payload = serialize_batch(&batch, Some(""), FlushReason::Timeout).unwrap();

        let hostnames: Vec<String> = payload
            .body
            .lines()
            .map(|line| {
                let value: Value = serde_json::from_str(line).unwrap();
                value["docker_hostname"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(hostnames, vec!["web-1", "web-2"]);
    }

    #[test]
    fn test_batch_is_newline_joined_in_order() {
        let batch = vec![record("one", "h"), record("two", "h"), record("three", "h")];
        let payload = serialize_batch(&batch, None, FlushReason::Full).unwrap();

        assert_eq!(payload.messages, 3);
        assert_eq!(payload.reason, FlushReason::Full);
        assert!(!payload.body.ends_with('\n'));

        let messages: Vec<String> = payload
            .body
            .split('\n')
            .map(|line| {
                let value: Value = serde_json::from_str(line).unwrap();
                value["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_message_with_newline_stays_on_one_line() {
        let batch = vec![record("line one\nline two", "h")];
        let payload = serialize_batch(&batch, None, FlushReason::Full).unwrap();
        assert_eq!(payload.body.lines().count(), 1);
    }

    #[test]
    fn test_empty_batch_has_no_payload() {
        assert!(serialize_batch(&[], None, FlushReason::Timeout).is_none());
    }

    #[test]
    fn test_flush_reason_display() {
        assert_eq!(FlushReason::Full.to_string(), "full");
        assert_eq!(FlushReason::Timeout.to_string(), "timeout");
        assert_eq!(FlushReason::Shutdown.to_string(), "shutdown");
    }
}
