use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use zeroize::Zeroizing;

use super::{claims, Credential, LoginIdentity};
use crate::errors::GatewayError;
use crate::normalize::ensure_id;
use crate::proxy::classify::{classify, classify_status, RawFailure};
use crate::proxy::endpoints::EndpointResolver;
use crate::proxy::upstream::UpstreamClient;

const LOGIN_PATH: &str = "api/auth/login";

/// Exchanges a login identity for a bearer credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn login(&self, identity: &LoginIdentity) -> Result<Credential, GatewayError>;
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

/// `POST /api/auth/login` against the backend, trying each candidate in turn.
pub struct UpstreamLogin {
    client: Arc<UpstreamClient>,
    resolver: EndpointResolver,
    jwt_secret: Option<Zeroizing<String>>,
}

impl UpstreamLogin {
    pub fn new(
        client: Arc<UpstreamClient>,
        resolver: EndpointResolver,
        jwt_secret: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            client,
            resolver,
            jwt_secret,
        }
    }

    fn credential_from(&self, resp: LoginResponse) -> Credential {
        if let Some(kind) = resp.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                tracing::warn!(token_type = kind, "unexpected token type from login exchange");
            }
        }

        let verified = self
            .jwt_secret
            .as_ref()
            .and_then(|secret| claims::verify(&resp.access_token, secret.as_bytes()));

        let claims = claims::from_login(
            ensure_id(resp.user_id.as_ref()),
            resp.role,
            resp.username,
            resp.email,
            verified.as_ref().and_then(|c| c.exp),
        )
        .or(verified);

        Credential::new(resp.access_token, claims)
    }
}

#[async_trait]
impl TokenExchange for UpstreamLogin {
    async fn login(&self, identity: &LoginIdentity) -> Result<Credential, GatewayError> {
        let body = Zeroizing::new(
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("username", identity.email())
                .append_pair("password", identity.password())
                .finish(),
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let timeout = self.client.policy().timeout_for(&Method::POST);
        let mut last_transport = None;

        for candidate in self.resolver.resolve("auth") {
            let url = candidate
                .join(LOGIN_PATH)
                .map_err(|e| GatewayError::Unknown(format!("invalid login URL: {e}")))?;

            let resp = match self
                .client
                .send(
                    Method::POST,
                    &candidate,
                    url,
                    headers.clone(),
                    Some(Bytes::copy_from_slice(body.as_bytes())),
                    timeout,
                )
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_transport = Some(e);
                    continue;
                }
            };

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                tracing::info!(candidate = %candidate, status = status.as_u16(), "login exchange rejected");
                return Err(classify_status(status.as_u16(), &text));
            }

            let parsed: LoginResponse = serde_json::from_str(&text).map_err(|e| {
                GatewayError::Unknown(format!("malformed login response: {e}"))
            })?;
            tracing::debug!(candidate = %candidate, "login exchange succeeded");
            return Ok(self.credential_from(parsed));
        }

        Err(classify(RawFailure::Exhausted {
            last: last_transport,
        }))
    }
}
