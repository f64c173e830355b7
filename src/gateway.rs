//! Library surface used by the HTTP routes and the CLI.

use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::credential::{Claims, Credential, CredentialManager, LoginIdentity, TokenExchange, UpstreamLogin};
use crate::errors::GatewayError;
use crate::normalize::{self, Normalize};
use crate::proxy::dispatcher::{Dispatcher, RequestDescriptor};
use crate::proxy::endpoints::{resource_family, EndpointResolver};
use crate::proxy::upstream::UpstreamClient;

/// Normalized CRUD access to the backend.
///
/// Cloning is cheap. The default instance acts as the service account;
/// [`Gateway::for_session`] and [`Gateway::for_end_user`] derive instances
/// with their own credential slot over the same connection pool.
#[derive(Clone)]
pub struct Gateway {
    dispatcher: Dispatcher,
    exchange: Arc<dyn TokenExchange>,
    jwt_secret: Option<Arc<Zeroizing<String>>>,
    forwarded: HeaderMap,
}

impl Gateway {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let client = Arc::new(UpstreamClient::new(cfg.retry_policy())?);
        let resolver = cfg.resolver();
        let exchange: Arc<dyn TokenExchange> = Arc::new(UpstreamLogin::new(
            Arc::clone(&client),
            resolver.clone(),
            cfg.jwt_secret.clone(),
        ));
        let service = Arc::new(CredentialManager::service(
            cfg.service_account.clone(),
            Arc::clone(&exchange),
        ));

        Ok(Self::new(
            Dispatcher::new(client, Arc::new(resolver), service),
            exchange,
            cfg.jwt_secret.clone(),
        ))
    }

    pub fn new(
        dispatcher: Dispatcher,
        exchange: Arc<dyn TokenExchange>,
        jwt_secret: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            dispatcher,
            exchange,
            jwt_secret: jwt_secret.map(Arc::new),
            forwarded: HeaderMap::new(),
        }
    }

    /// Act with a token presented by the browser. It is never swapped for
    /// the service account.
    pub fn for_session(&self, token: &str) -> Self {
        let credential = Credential::from_session(token, self.secret());
        self.with_manager(CredentialManager::session(credential))
    }

    pub fn for_end_user(&self, identity: LoginIdentity) -> Self {
        self.with_manager(CredentialManager::end_user(identity, Arc::clone(&self.exchange)))
    }

    /// Headers forwarded on every upstream call (forbidden ones are dropped).
    pub fn with_forwarded_headers(mut self, headers: HeaderMap) -> Self {
        self.forwarded = headers;
        self
    }

    fn with_manager(&self, manager: CredentialManager) -> Self {
        Self {
            dispatcher: self.dispatcher.with_credentials(Arc::new(manager)),
            exchange: Arc::clone(&self.exchange),
            jwt_secret: self.jwt_secret.clone(),
            forwarded: self.forwarded.clone(),
        }
    }

    fn secret(&self) -> Option<&[u8]> {
        self.jwt_secret.as_deref().map(|s| s.as_bytes())
    }

    /// Exchange end-user credentials for a bearer credential.
    pub async fn login(&self, identity: LoginIdentity) -> Result<Credential, GatewayError> {
        self.for_end_user(identity).credential().await
    }

    /// The credential this gateway would use for its next call.
    pub async fn credential(&self) -> Result<Credential, GatewayError> {
        self.dispatcher.credentials().acquire(false).await
    }

    /// Verified claims of a browser token. `Ok(None)` means the token could
    /// not be checked because no signing key is configured.
    pub fn session_claims(&self, token: &str) -> Result<Option<Claims>, GatewayError> {
        let Some(secret) = self.secret() else {
            return Ok(None);
        };
        match crate::credential::claims::verify(token, secret) {
            Some(claims) if claims.is_expired() => {
                Err(GatewayError::authentication("session token has expired"))
            }
            Some(claims) => Ok(Some(claims)),
            None => Err(GatewayError::authentication("session token failed verification")),
        }
    }

    pub fn resolver(&self) -> &EndpointResolver {
        self.dispatcher.resolver()
    }

    pub async fn get<T: Normalize>(
        &self,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<T, GatewayError> {
        let descriptor = RequestDescriptor::get(resource).with_query(params.iter().copied());
        self.execute(descriptor, resource).await
    }

    pub async fn post<T: Normalize>(&self, resource: &str, body: Value) -> Result<T, GatewayError> {
        let descriptor = RequestDescriptor::post(resource, shape(resource, body));
        self.execute(descriptor, resource).await
    }

    pub async fn put<T: Normalize>(&self, resource: &str, body: Value) -> Result<T, GatewayError> {
        let descriptor = RequestDescriptor::put(resource, shape(resource, body));
        self.execute(descriptor, resource).await
    }

    pub async fn patch<T: Normalize>(&self, resource: &str, body: Value) -> Result<T, GatewayError> {
        let descriptor = RequestDescriptor::patch(resource, shape(resource, body));
        self.execute(descriptor, resource).await
    }

    pub async fn delete(&self, resource: &str) -> Result<(), GatewayError> {
        self.execute(RequestDescriptor::delete(resource), resource)
            .await
    }

    pub async fn execute<T: Normalize>(
        &self,
        descriptor: RequestDescriptor,
        resource: &str,
    ) -> Result<T, GatewayError> {
        let descriptor = descriptor.with_headers(&self.forwarded);
        self.dispatcher.execute(&descriptor, resource).await
    }
}

fn shape(resource: &str, body: Value) -> Value {
    normalize::body_to_upstream(&resource_family(resource), body)
}
