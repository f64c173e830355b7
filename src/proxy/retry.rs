//! Timeouts, transport retries and the renewal limit for upstream calls.

use std::time::Duration;

use reqwest::Method;
use reqwest_retry::policies::ExponentialBackoff;

/// Renewals allowed per logical call after an upstream 401.
pub const MAX_CREDENTIAL_RENEWALS: u32 = 1;

/// Timeouts and retry limits for outbound calls.
///
/// Only transport failures are ever retried against the same candidate.
/// An HTTP response, whatever its status, is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// GET, HEAD, DELETE.
    pub read_timeout: Duration,
    /// POST, PUT, PATCH.
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    /// Extra attempts against one candidate after a transport failure.
    pub transport_retries: u32,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(2),
            transport_retries: 1,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn timeout_for(&self, method: &Method) -> Duration {
        if is_write(method) {
            self.write_timeout
        } else {
            self.read_timeout
        }
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .retry_bounds(self.backoff_min, self.backoff_max)
            .build_with_max_retries(self.transport_retries)
    }
}

/// Whether a request may be repeated after it could already have reached
/// upstream.
pub fn is_idempotent(method: &Method) -> bool {
    *method != Method::POST
}

fn is_write(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}
