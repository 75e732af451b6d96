// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::{
    DEFAULT_BACKOFF_BASE, DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
    MAX_BUFFER_CAPACITY, MAX_BUFFER_TIMEOUT, MAX_REQUEST_TIMEOUT, MAX_RETRIES,
    MIN_BUFFER_CAPACITY, MIN_BUFFER_TIMEOUT, MIN_REQUEST_TIMEOUT, OPTION_PREFIX,
};
use crate::errors::ConfigError;

/// Where an adapter ships to, plus its raw string options.
///
/// `adapter` is the transport scheme (`http` or `https`) and `address` the
/// `host[:port]` of the collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Route {
    pub adapter: String,
    pub address: String,
    pub options: HashMap<String, String>,
}

impl Route {
    /// Parses a route URI such as
    /// `https://collector:8443/ingest?buffer.capacity=500&gzip=true`.
    ///
    /// The query string becomes the option map. A non-root path becomes the
    /// `path` option unless the query already sets `path` or `http.path`.
    pub fn parse(uri: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(uri).map_err(|e| ConfigError::InvalidRoute(format!("{uri}: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidRoute(format!("{uri}: missing host")))?;
        let address = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut options: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let path = url.path();
        let explicit_path =
            options.contains_key("path") || options.contains_key(&format!("{OPTION_PREFIX}path"));
        if path != "/" && !path.is_empty() && !explicit_path {
            options.insert("path".to_string(), path.to_string());
        }

        Ok(Self {
            adapter: url.scheme().to_string(),
            address,
            options,
        })
    }

    /// Looks up `key`, falling back to its `http.`-prefixed spelling.
    fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .or_else(|| self.options.get(&format!("{OPTION_PREFIX}{key}")))
            .map(String::as_str)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Bounded exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (starting at 1).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.backoff_base.saturating_mul(factor)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

/// Resolved, validated adapter settings.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub endpoint: Url,
    pub proxy: Option<Url>,
    pub buffer_capacity: usize,
    pub buffer_timeout: Duration,
    /// Timeout of a single HTTP attempt, not of the whole retry sequence.
    pub request_timeout: Duration,
    pub use_gzip: bool,
    pub crash_on_error: bool,
    pub credentials: Option<Credentials>,
    pub hostname: Option<String>,
    pub retry: RetryPolicy,
}

impl AdapterConfig {
    /// Resolves `route` into typed settings.
    ///
    /// Out-of-range or unparsable numeric and duration options fall back to
    /// their defaults. Only an unusable endpoint or proxy fails.
    pub fn from_route(route: &Route) -> Result<Self, ConfigError> {
        if route.adapter != "http" && route.adapter != "https" {
            return Err(ConfigError::UnsupportedScheme(route.adapter.clone()));
        }

        let path = route.option("path").unwrap_or_default();
        let endpoint_url = format!("{}://{}{}", route.adapter, route.address, path);
        let endpoint = Url::parse(&endpoint_url).map_err(|e| ConfigError::InvalidEndpoint {
            url: endpoint_url.clone(),
            reason: e.to_string(),
        })?;
        debug!("HTTP_LOGS | endpoint url: {endpoint}");

        let proxy = match route.option("proxy") {
            Some(proxy) if !proxy.is_empty() => {
                let url = Url::parse(proxy).map_err(|e| ConfigError::InvalidProxy {
                    url: proxy.to_string(),
                    reason: e.to_string(),
                })?;
                debug!("HTTP_LOGS | proxy url: {url}");
                Some(url)
            }
            _ => None,
        };

        let buffer_capacity = bounded_option(
            route,
            "buffer.capacity",
            DEFAULT_BUFFER_CAPACITY,
            MIN_BUFFER_CAPACITY..=MAX_BUFFER_CAPACITY,
        );
        let buffer_timeout = duration_option(
            route,
            "buffer.timeout",
            DEFAULT_BUFFER_TIMEOUT,
            MIN_BUFFER_TIMEOUT..=MAX_BUFFER_TIMEOUT,
        );
        let request_timeout = duration_option(
            route,
            "request.timeout",
            DEFAULT_REQUEST_TIMEOUT,
            MIN_REQUEST_TIMEOUT..=MAX_REQUEST_TIMEOUT,
        );

        let use_gzip = route.option("gzip") == Some("true");
        if use_gzip {
            debug!("HTTP_LOGS | gzip compression enabled");
        }

        // Anything but an explicit "false" keeps crash mode on.
        let crash_on_error = route.option("crash") != Some("false");
        if !crash_on_error {
            debug!("HTTP_LOGS | delivery errors will be logged, not escalated");
        }

        let user = route.option("user").unwrap_or_default();
        let password = route.option("password").unwrap_or_default();
        let credentials = match (user.is_empty(), password.is_empty()) {
            (false, false) => Some(Credentials {
                user: user.to_string(),
                password: password.to_string(),
            }),
            (true, true) => None,
            _ => {
                warn!("HTTP_LOGS | both user and password are required for basic auth, ignoring credentials");
                None
            }
        };

        let hostname = route
            .option("hostname")
            .filter(|hostname| !hostname.is_empty())
            .map(str::to_string);

        Ok(Self {
            endpoint,
            proxy,
            buffer_capacity,
            buffer_timeout,
            request_timeout,
            use_gzip,
            crash_on_error,
            credentials,
            hostname,
            retry: RetryPolicy::default(),
        })
    }
}

fn bounded_option<T>(
    route: &Route,
    key: &str,
    default: T,
    range: std::ops::RangeInclusive<T>,
) -> T
where
    T: FromStr + PartialOrd + Copy + std::fmt::Debug,
{
    let Some(raw) = route.option(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            warn!("HTTP_LOGS | non-sensical value for parameter {key}: {value:?}, using default: {default:?}");
            default
        }
        Err(_) => {
            warn!("HTTP_LOGS | invalid value for parameter {key}: {raw}, using default: {default:?}");
            default
        }
    }
}

fn duration_option(
    route: &Route,
    key: &str,
    default: Duration,
    range: std::ops::RangeInclusive<Duration>,
) -> Duration {
    let Some(raw) = route.option(key) else {
        return default;
    };
    match humantime::parse_duration(raw.trim()) {
        Ok(value) if range.contains(&value) => value,
        Ok(value) => {
            warn!("HTTP_LOGS | non-sensical value for parameter {key}: {value:?}, using default: {default:?}");
            default
        }
        Err(e) => {
            warn!("HTTP_LOGS | invalid value for parameter {key}: {raw} ({e}), using default: {default:?}");
            default
        }
    }
}
