//! One logical call against the backend: credential, candidates, at most one
//! renewal, classification and normalization.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::Instrument;
use url::Url;

use super::classify::{classify, classify_status, RawFailure};
use super::endpoints::{resource_family, EndpointResolver};
use super::retry::MAX_CREDENTIAL_RENEWALS;
use super::upstream::UpstreamClient;
use crate::credential::{Credential, CredentialManager};
use crate::errors::GatewayError;
use crate::middleware::metrics::{self, AttemptOutcome};
use crate::normalize::Normalize;

/// Headers a caller may never forward. Privilege overrides are dropped so
/// that upstream stays the only authority on roles.
const FORBIDDEN_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "x-override-role",
    "x-admin-access",
    "x-admin-override",
    "x-user-role",
];

pub fn is_forbidden_header(name: &HeaderName) -> bool {
    FORBIDDEN_HEADERS.contains(&name.as_str())
}

/// Everything needed to issue one logical call. The bearer token is not
/// part of it; it is attached per attempt.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Extra caller headers. Forbidden ones are silently dropped.
    pub fn with_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            if is_forbidden_header(name) {
                tracing::debug!(header = %name, "dropping caller header");
                continue;
            }
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `<candidate>/api/<path>?<query>`, each path segment percent-encoded.
    pub fn url_for(&self, candidate: &Url) -> Result<Url, GatewayError> {
        let mut url = candidate.clone();
        let trimmed = self.path.trim_matches('/');
        let relative = trimmed.strip_prefix("api/").unwrap_or(trimmed);
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                GatewayError::Unknown(format!("endpoint {candidate} cannot carry a path"))
            })?;
            segments
                .pop_if_empty()
                .push("api")
                .extend(relative.split('/').filter(|s| !s.is_empty()));
        }
        url.set_query(None);
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }

    fn encoded_body(&self) -> Result<Option<Bytes>, GatewayError> {
        self.body
            .as_ref()
            .map(|b| {
                serde_json::to_vec(b)
                    .map(Bytes::from)
                    .map_err(|e| GatewayError::Unknown(format!("failed to encode request body: {e}")))
            })
            .transpose()
    }

    fn outbound_headers(&self, credential: &Credential) -> Result<HeaderMap, GatewayError> {
        let mut headers = self.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if self.body.is_some() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential.token()))
            .map_err(|_| GatewayError::authentication("credential is not a valid header value"))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        Ok(headers)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<UpstreamClient>,
    resolver: Arc<EndpointResolver>,
    credentials: Arc<CredentialManager>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<UpstreamClient>,
        resolver: Arc<EndpointResolver>,
        credentials: Arc<CredentialManager>,
    ) -> Self {
        Self {
            client,
            resolver,
            credentials,
        }
    }

    /// Same transport and endpoints, different credential slot.
    pub fn with_credentials(&self, credentials: Arc<CredentialManager>) -> Self {
        Self {
            client: Arc::clone(&self.client),
            resolver: Arc::clone(&self.resolver),
            credentials,
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialManager> {
        &self.credentials
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub async fn execute<T: Normalize>(
        &self,
        descriptor: &RequestDescriptor,
        resource: &str,
    ) -> Result<T, GatewayError> {
        let family = resource_family(resource);
        let span = tracing::info_span!(
            "upstream_call",
            resource = %family,
            method = %descriptor.method,
            path = %descriptor.path,
        );

        let result = async {
            let payload = self.execute_raw(descriptor, resource, &family).await?;
            T::from_upstream(&payload).map_err(GatewayError::from)
        }
        .instrument(span)
        .await;

        if let Err(e) = &result {
            metrics::record_error(e);
            tracing::warn!(
                resource = %family,
                code = e.code(),
                detail = e.upstream_detail().unwrap_or("-"),
                "upstream call failed"
            );
        }
        result
    }

    async fn execute_raw(
        &self,
        descriptor: &RequestDescriptor,
        resource: &str,
        family: &str,
    ) -> Result<Value, GatewayError> {
        let mut credential = self.credentials.acquire(false).await?;
        let candidates = self.resolver.resolve(resource);
        let body = descriptor.encoded_body()?;
        let timeout = descriptor
            .timeout
            .unwrap_or_else(|| self.client.policy().timeout_for(&descriptor.method));
        let mut renewals = 0;

        'renew: loop {
            let mut last_transport = None;

            for (attempt, candidate) in candidates.iter().enumerate() {
                let url = descriptor.url_for(candidate)?;
                let headers = descriptor.outbound_headers(&credential)?;
                let started = Instant::now();

                let sent = self
                    .client
                    .send(
                        descriptor.method.clone(),
                        candidate,
                        url,
                        headers,
                        body.clone(),
                        timeout,
                    )
                    .await;
                let elapsed = started.elapsed().as_secs_f64();

                let resp = match sent {
                    Ok(resp) => resp,
                    Err(e) => {
                        metrics::record_attempt(family, AttemptOutcome::Transport, elapsed);
                        tracing::debug!(candidate = %candidate, attempt, "candidate unreachable, trying next");
                        last_transport = Some(e);
                        continue;
                    }
                };

                let status = resp.status();
                tracing::debug!(candidate = %candidate, attempt, status = status.as_u16(), "upstream answered");

                if status == StatusCode::UNAUTHORIZED {
                    metrics::record_attempt(family, AttemptOutcome::Unauthorized, elapsed);
                    if renewals < MAX_CREDENTIAL_RENEWALS {
                        renewals += 1;
                        tracing::info!(candidate = %candidate, "credential rejected, renewing once");
                        credential = self.credentials.acquire(true).await?;
                        continue 'renew;
                    }
                    let text = resp.text().await.unwrap_or_default();
                    return Err(classify_status(status.as_u16(), &text));
                }

                let text = match resp.text().await {
                    Ok(text) => text,
                    Err(e) => {
                        metrics::record_attempt(family, AttemptOutcome::Transport, elapsed);
                        return Err(GatewayError::Connection(format!(
                            "{}: response body could not be read: {e}",
                            candidate.as_str().trim_end_matches('/')
                        )));
                    }
                };

                if !status.is_success() {
                    metrics::record_attempt(family, AttemptOutcome::Status, elapsed);
                    return Err(classify(RawFailure::Status {
                        status: status.as_u16(),
                        body: text,
                    }));
                }

                metrics::record_attempt(family, AttemptOutcome::Success, elapsed);
                return parse_payload(status, &text);
            }

            return Err(classify(RawFailure::Exhausted {
                last: last_transport,
            }));
        }
    }
}

fn parse_payload(status: StatusCode, text: &str) -> Result<Value, GatewayError> {
    if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text)
        .map_err(|e| GatewayError::Unknown(format!("upstream returned invalid JSON: {e}")))
}
