use std::{cmp::min, collections::HashMap, time::Duration};

use crate::error::NetError;

/// Header map with case-insensitive lookup.
///
/// Names are stored lowercased, matching what HTTP/2 and reqwest report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    inner: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.inner
            .insert(key.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Parsed `Content-Length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = Self::new();
        for (k, v) in map {
            headers.insert(k, v);
        }
        headers
    }
}

/// Byte range for a `Range` request. `end` is inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: Option<u64>,
}

impl RangeSpec {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self { start, end: None }
    }

    /// Closed range `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidRange`] when `end < start`.
    pub fn inclusive(start: u64, end: u64) -> Result<Self, NetError> {
        if end < start {
            return Err(NetError::InvalidRange(format!("bytes={start}-{end}")));
        }
        Ok(Self {
            start,
            end: Some(end),
        })
    }

    /// Number of bytes covered, `None` for open-ended ranges.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start) + 1)
    }

    pub fn to_header_value(&self) -> String {
        if let Some(end) = self.end {
            format!("bytes={}-{}", self.start, end)
        } else {
            format!("bytes={}-", self.start)
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Disable transport-level retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let exponential_delay = self.base_delay.saturating_mul(factor);
        min(exponential_delay, self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Deadline for the request/response phase of a single request.
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
    /// Max idle connections per host. Set to 0 to disable pooling and reduce memory.
    pub pool_max_idle_per_host: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_policy: RetryPolicy::default(),
            pool_max_idle_per_host: 0,
        }
    }
}
