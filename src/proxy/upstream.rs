//! HTTP client for calls to the backend.
//! Uses reqwest-middleware so transport failures are retried per candidate.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{
    default_on_request_failure, RetryTransientMiddleware, Retryable, RetryableStrategy,
};
use thiserror::Error;
use url::Url;

use super::retry::{is_idempotent, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Connect,
    Dns,
    Timeout,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Connect => "connection failed",
            TransportKind::Dns => "name resolution failed",
            TransportKind::Timeout => "timed out",
            TransportKind::Other => "transport error",
        })
    }
}

/// A call that never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{candidate}: {kind}: {detail}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub candidate: String,
    pub detail: String,
}

impl TransportError {
    fn from_middleware(candidate: &Url, err: reqwest_middleware::Error) -> Self {
        let (kind, detail) = match &err {
            reqwest_middleware::Error::Reqwest(e) => (kind_of(e), error_chain(e)),
            reqwest_middleware::Error::Middleware(e) => (kind_in_chain(e), format!("{e:#}")),
        };
        Self {
            kind,
            candidate: candidate.as_str().trim_end_matches('/').to_string(),
            detail,
        }
    }
}

/// After retries the reqwest error sits behind the retry middleware's own
/// error, which wraps a `reqwest_middleware::Error`.
fn kind_in_chain(err: &anyhow::Error) -> TransportKind {
    err.chain()
        .find_map(|cause| {
            if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
                return Some(kind_of(e));
            }
            match cause.downcast_ref::<reqwest_middleware::Error>() {
                Some(reqwest_middleware::Error::Reqwest(e)) => Some(kind_of(e)),
                _ => None,
            }
        })
        .unwrap_or(TransportKind::Other)
}

fn kind_of(err: &reqwest::Error) -> TransportKind {
    if err.is_timeout() {
        TransportKind::Timeout
    } else if error_chain(err).contains("dns error") {
        TransportKind::Dns
    } else if err.is_connect() {
        TransportKind::Connect
    } else {
        TransportKind::Other
    }
}

/// reqwest's Display hides the interesting part (refused, dns) in sources.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

/// Retry only when no response arrived. Responses are handed back as-is.
struct TransportOnly;

impl RetryableStrategy for TransportOnly {
    fn handle(&self, res: &Result<Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Ok(_) => None,
            Err(err) => default_on_request_failure(err),
        }
    }
}

/// Retry only when the connection was never established, so the request
/// cannot have reached upstream. Used for non-idempotent verbs.
struct ConnectOnly;

impl RetryableStrategy for ConnectOnly {
    fn handle(&self, res: &Result<Response, reqwest_middleware::Error>) -> Option<Retryable> {
        match res {
            Err(reqwest_middleware::Error::Reqwest(e)) if e.is_connect() => {
                Some(Retryable::Transient)
            }
            _ => None,
        }
    }
}

pub struct UpstreamClient {
    /// GET, HEAD, PUT, PATCH, DELETE.
    idempotent: ClientWithMiddleware,
    /// POST: a request that may have been delivered is never repeated.
    unsafe_once: ClientWithMiddleware,
    policy: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(policy: RetryPolicy) -> Result<Self, reqwest::Error> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(32)
            .connect_timeout(policy.connect_timeout)
            .build()?;

        let idempotent = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                policy.backoff(),
                TransportOnly,
            ))
            .build();
        let unsafe_once = ClientBuilder::new(reqwest_client)
            .with(RetryTransientMiddleware::new_with_policy_and_strategy(
                policy.backoff(),
                ConnectOnly,
            ))
            .build();

        Ok(Self {
            idempotent,
            unsafe_once,
            policy,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send one request to one candidate. `Ok` means upstream answered,
    /// whatever the status.
    pub async fn send(
        &self,
        method: Method,
        candidate: &Url,
        url: Url,
        headers: HeaderMap,
        body: Option<Bytes>,
        timeout: Duration,
    ) -> Result<Response, TransportError> {
        let client = if is_idempotent(&method) {
            &self.idempotent
        } else {
            &self.unsafe_once
        };
        let mut request = client
            .request(method, url)
            .headers(headers)
            .timeout(timeout);
        if let Some(body) = body {
            request = request.body(body);
        }

        request.send().await.map_err(|e| {
            let err = TransportError::from_middleware(candidate, e);
            tracing::warn!(candidate = %err.candidate, kind = ?err.kind, "upstream transport failure: {}", err.detail);
            err
        })
    }
}
