//! Bearer credential acquisition and caching.
//!
//! A [`CredentialManager`] owns one credential slot. Concurrent callers that
//! find the slot empty share a single login exchange; its result (success or
//! failure) is handed to every waiter.

pub mod claims;
pub mod exchange;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use zeroize::Zeroizing;

pub use claims::Claims;
pub use exchange::{TokenExchange, UpstreamLogin};

use crate::errors::GatewayError;
use crate::middleware::metrics;

/// Email + password pair exchanged at `/api/auth/login`.
#[derive(Clone)]
pub struct LoginIdentity {
    email: String,
    password: Zeroizing<String>,
}

impl LoginIdentity {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for LoginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginIdentity")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An opaque bearer token and, when they could be trusted, its claims.
#[derive(Clone)]
pub struct Credential {
    token: Arc<str>,
    claims: Option<Claims>,
}

impl Credential {
    pub fn new(token: impl Into<Arc<str>>, claims: Option<Claims>) -> Self {
        Self {
            token: token.into(),
            claims,
        }
    }

    /// A token presented by the browser. Claims are only attached when the
    /// signature verifies against `secret`.
    pub fn from_session(token: &str, secret: Option<&[u8]>) -> Self {
        let claims = secret.and_then(|s| claims::verify(token, s));
        Self::new(token, claims)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> Option<&Claims> {
        self.claims.as_ref()
    }

    pub fn is_expired(&self) -> bool {
        self.claims.as_ref().is_some_and(Claims::is_expired)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerKind {
    Service,
    EndUser,
    Session,
}

impl ManagerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ManagerKind::Service => "service",
            ManagerKind::EndUser => "end_user",
            ManagerKind::Session => "session",
        }
    }
}

type Acquisition = Shared<BoxFuture<'static, Result<Credential, GatewayError>>>;

#[derive(Default)]
struct Slot {
    cached: Option<Credential>,
    in_flight: Option<Acquisition>,
}

pub struct CredentialManager {
    kind: ManagerKind,
    renewal: Option<(LoginIdentity, Arc<dyn TokenExchange>)>,
    slot: Arc<Mutex<Slot>>,
}

impl CredentialManager {
    /// Process-wide manager for the configured service account. Without an
    /// identity every acquisition fails.
    pub fn service(identity: Option<LoginIdentity>, exchange: Arc<dyn TokenExchange>) -> Self {
        Self::build(ManagerKind::Service, identity.map(|i| (i, exchange)), None)
    }

    pub fn end_user(identity: LoginIdentity, exchange: Arc<dyn TokenExchange>) -> Self {
        Self::build(ManagerKind::EndUser, Some((identity, exchange)), None)
    }

    /// Seeded with a token from an inbound request. It cannot be renewed
    /// unless end-user credentials are attached with [`Self::with_renewal`].
    pub fn session(credential: Credential) -> Self {
        Self::build(ManagerKind::Session, None, Some(credential))
    }

    pub fn with_renewal(mut self, identity: LoginIdentity, exchange: Arc<dyn TokenExchange>) -> Self {
        self.renewal = Some((identity, exchange));
        self
    }

    fn build(
        kind: ManagerKind,
        renewal: Option<(LoginIdentity, Arc<dyn TokenExchange>)>,
        seed: Option<Credential>,
    ) -> Self {
        Self {
            kind,
            renewal,
            slot: Arc::new(Mutex::new(Slot {
                cached: seed,
                in_flight: None,
            })),
        }
    }

    pub fn kind(&self) -> ManagerKind {
        self.kind
    }

    /// Return a usable credential.
    ///
    /// With `force_renew == false` a cached, unexpired credential is returned
    /// without I/O. Otherwise a login exchange is started, or joined if one
    /// is already running.
    pub async fn acquire(&self, force_renew: bool) -> Result<Credential, GatewayError> {
        let acquisition = {
            let mut slot = self.lock();

            if !force_renew {
                if let Some(cached) = &slot.cached {
                    if !cached.is_expired() {
                        return Ok(cached.clone());
                    }
                    tracing::debug!(kind = self.kind.as_str(), "cached credential expired");
                }
            }

            match &slot.in_flight {
                Some(running) => running.clone(),
                None => {
                    let started = self.start_exchange()?;
                    slot.in_flight = Some(started.clone());
                    started
                }
            }
        };

        acquisition.await
    }

    /// Drop the cached credential. An in-flight exchange is left alone.
    pub fn invalidate(&self) {
        self.lock().cached = None;
    }

    /// The cached credential, if any, without triggering an exchange.
    pub fn current(&self) -> Option<Credential> {
        self.lock().cached.clone()
    }

    fn start_exchange(&self) -> Result<Acquisition, GatewayError> {
        let Some((identity, exchange)) = self.renewal.clone() else {
            return Err(match self.kind {
                ManagerKind::Service => {
                    GatewayError::authentication("service account is not configured")
                }
                _ => GatewayError::authentication("session cannot be renewed; sign in again"),
            });
        };

        let slot = Arc::clone(&self.slot);
        let kind = self.kind;

        Ok(async move {
            tracing::debug!(kind = kind.as_str(), "starting login exchange");
            let result = exchange.login(&identity).await.map_err(|e| match e {
                GatewayError::AuthenticationFailure { .. } => e,
                other => GatewayError::AuthenticationFailure {
                    upstream: Some(format!("login exchange failed: {other}")),
                },
            });
            metrics::record_acquisition(kind.as_str(), result.is_ok());

            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            guard.in_flight = None;
            match &result {
                Ok(credential) => {
                    tracing::info!(kind = kind.as_str(), "credential acquired");
                    guard.cached = Some(credential.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        kind = kind.as_str(),
                        detail = e.upstream_detail().unwrap_or("-"),
                        "credential acquisition failed"
                    );
                }
            }
            result
        }
        .boxed()
        .shared())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialManager")
            .field("kind", &self.kind)
            .field("renewable", &self.renewal.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Hands out `token-1`, `token-2`, ... after a short delay.
    struct CountingExchange {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingExchange {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenExchange for CountingExchange {
        async fn login(&self, _identity: &LoginIdentity) -> Result<Credential, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                Err(GatewayError::authentication("Incorrect email or password"))
            } else {
                Ok(Credential::new(format!("token-{n}"), None))
            }
        }
    }

    fn identity() -> LoginIdentity {
        LoginIdentity::new("svc@p0cit.com", "pw")
    }

    #[tokio::test]
    async fn test_cached_credential_is_reused() {
        let exchange = CountingExchange::new(false);
        let manager = CredentialManager::service(Some(identity()), exchange.clone());

        let first = manager.acquire(false).await.unwrap();
        let second = manager.acquire(false).await.unwrap();
        assert_eq!(first.token(), "token-1");
        assert_eq!(second.token(), "token-1");
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_acquisitions_share_one_exchange() {
        let exchange = CountingExchange::new(false);
        let manager = Arc::new(CredentialManager::service(Some(identity()), exchange.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                tokio::spawn(async move { m.acquire(false).await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().token(), "token-1");
        }
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_shared_failure_is_not_cached() {
        let exchange = CountingExchange::new(true);
        let manager = CredentialManager::service(Some(identity()), exchange.clone());

        let (a, b) = tokio::join!(manager.acquire(false), manager.acquire(false));
        assert!(a.unwrap_err().requires_reauth());
        assert!(b.unwrap_err().requires_reauth());
        assert_eq!(exchange.calls(), 1);
        assert!(manager.current().is_none());

        assert!(manager.acquire(false).await.is_err());
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_force_renew_replaces_and_joins() {
        let exchange = CountingExchange::new(false);
        let manager = CredentialManager::service(Some(identity()), exchange.clone());
        manager.acquire(false).await.unwrap();

        let (a, b) = tokio::join!(manager.acquire(true), manager.acquire(true));
        assert_eq!(a.unwrap().token(), "token-2");
        assert_eq!(b.unwrap().token(), "token-2");
        assert_eq!(manager.acquire(false).await.unwrap().token(), "token-2");
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_new_exchange() {
        let exchange = CountingExchange::new(false);
        let manager = CredentialManager::end_user(identity(), exchange.clone());
        manager.acquire(false).await.unwrap();
        manager.invalidate();
        assert_eq!(manager.acquire(false).await.unwrap().token(), "token-2");
    }

    #[tokio::test]
    async fn test_session_without_identity_cannot_renew() {
        let manager = CredentialManager::session(Credential::new("browser-token", None));
        assert_eq!(manager.acquire(false).await.unwrap().token(), "browser-token");

        let err = manager.acquire(true).await.unwrap_err();
        assert!(err.requires_reauth());
        // The session is never swapped for anything else.
        assert_eq!(manager.current().unwrap().token(), "browser-token");
    }

    #[tokio::test]
    async fn test_session_with_renewal_identity() {
        let exchange = CountingExchange::new(false);
        let manager = CredentialManager::session(Credential::new("browser-token", None))
            .with_renewal(identity(), exchange.clone());
        assert_eq!(manager.acquire(true).await.unwrap().token(), "token-1");
    }

    #[tokio::test]
    async fn test_expired_session_is_treated_as_absent() {
        let secret = b"backend-signing-key";
        let token = claims::test_tokens::sign("3", "client", 1_000_000_000, secret);
        let manager = CredentialManager::session(Credential::from_session(&token, Some(secret)));

        assert!(manager.acquire(false).await.unwrap_err().requires_reauth());
    }

    #[tokio::test]
    async fn test_unconfigured_service_account_fails_without_exchange() {
        let exchange = CountingExchange::new(false);
        let manager = CredentialManager::service(None, exchange.clone());
        assert!(manager.acquire(false).await.unwrap_err().requires_reauth());
        assert_eq!(exchange.calls(), 0);
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let rendered = format!(
            "{:?} {:?}",
            identity(),
            Credential::new("super-secret-token", None)
        );
        assert!(!rendered.contains("pw\""));
        assert!(!rendered.contains("super-secret-token"));
    }
}
