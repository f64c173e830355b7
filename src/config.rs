use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::Context;
use url::Url;
use zeroize::Zeroizing;

use crate::credential::LoginIdentity;
use crate::proxy::endpoints::EndpointResolver;
use crate::proxy::retry::RetryPolicy;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Browser origin allowed by CORS in addition to localhost.
    pub ui_origin: String,
    /// Backend address on the private service network.
    pub service_url: Url,
    pub loopback_url: Url,
    /// Externally configured backend (`API_URL` / `NEXT_PUBLIC_API_URL`).
    pub env_url: Option<Url>,
    /// Per resource family candidates tried before the defaults.
    pub endpoint_overrides: BTreeMap<String, Vec<Url>>,
    pub service_account: Option<LoginIdentity>,
    /// HS256 key used to verify session token claims. Without it, claims are
    /// only known for tokens the gateway obtained itself.
    pub jwt_secret: Option<Zeroizing<String>>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub connect_timeout: Duration,
    pub transport_retries: u32,
    pub production: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("ui_origin", &self.ui_origin)
            .field("service_url", &self.service_url.as_str())
            .field("loopback_url", &self.loopback_url.as_str())
            .field("env_url", &self.env_url.as_ref().map(Url::as_str))
            .field("endpoint_overrides", &self.endpoint_overrides.keys())
            .field("service_account", &self.service_account)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("transport_retries", &self.transport_retries)
            .field("production", &self.production)
            .finish()
    }
}

impl Config {
    pub fn resolver(&self) -> EndpointResolver {
        EndpointResolver::new(
            self.service_url.clone(),
            self.loopback_url.clone(),
            self.env_url.clone(),
            self.endpoint_overrides.clone(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            connect_timeout: self.connect_timeout,
            transport_retries: self.transport_retries,
            ..RetryPolicy::default()
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary key lookup.
pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let env_mode = var("GATEWAY_ENV").or_else(|| var("RUST_ENV")).unwrap_or_default();
    let production = env_mode.eq_ignore_ascii_case("production");

    let jwt_secret = var("GATEWAY_JWT_SECRET").map(Zeroizing::new);
    if jwt_secret.is_none() {
        if production {
            anyhow::bail!(
                "GATEWAY_JWT_SECRET is not set. Session claims cannot be verified; \
                 set the backend's signing key before running in production."
            );
        }
        tracing::warn!("GATEWAY_JWT_SECRET is not set; session claims will not be verified");
    }

    let service_account = match (var("SERVICE_ACCOUNT_EMAIL"), get("SERVICE_ACCOUNT_PASSWORD")) {
        (Some(email), Some(password)) => Some(LoginIdentity::new(email, password)),
        (Some(_), None) => {
            tracing::warn!("SERVICE_ACCOUNT_EMAIL is set without SERVICE_ACCOUNT_PASSWORD; service account disabled");
            None
        }
        _ => None,
    };

    let env_url = var("API_URL")
        .or_else(|| var("NEXT_PUBLIC_API_URL"))
        .map(|raw| parse_url("API_URL", &raw))
        .transpose()?;

    Ok(Config {
        port: var("GATEWAY_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3001),
        ui_origin: var("GATEWAY_UI_ORIGIN").unwrap_or_else(|| "http://localhost:3000".into()),
        service_url: parse_url(
            "GATEWAY_SERVICE_URL",
            &var("GATEWAY_SERVICE_URL").unwrap_or_else(|| "http://api:8001".into()),
        )?,
        loopback_url: parse_url(
            "GATEWAY_LOOPBACK_URL",
            &var("GATEWAY_LOOPBACK_URL").unwrap_or_else(|| "http://127.0.0.1:8001".into()),
        )?,
        env_url,
        endpoint_overrides: parse_overrides(&var("GATEWAY_ENDPOINT_OVERRIDES").unwrap_or_default())?,
        service_account,
        jwt_secret,
        read_timeout: millis(var("GATEWAY_READ_TIMEOUT_MS"), 5000),
        write_timeout: millis(var("GATEWAY_WRITE_TIMEOUT_MS"), 8000),
        connect_timeout: millis(var("GATEWAY_CONNECT_TIMEOUT_MS"), 2000),
        transport_retries: var("GATEWAY_TRANSPORT_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        production,
    })
}

fn millis(raw: Option<String>, default: u64) -> Duration {
    Duration::from_millis(raw.and_then(|v| v.parse().ok()).unwrap_or(default))
}

fn parse_url(key: &str, raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("{key} is not a valid URL: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("{key} must be an http(s) URL, got scheme `{}`", url.scheme());
    }
    Ok(url)
}

/// `projects=http://a:8001,http://b:8001;users=http://c:8001`
fn parse_overrides(raw: &str) -> anyhow::Result<BTreeMap<String, Vec<Url>>> {
    let mut overrides = BTreeMap::new();
    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (family, urls) = entry
            .split_once('=')
            .with_context(|| format!("GATEWAY_ENDPOINT_OVERRIDES entry `{entry}` has no `=`"))?;
        let urls = urls
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|u| parse_url("GATEWAY_ENDPOINT_OVERRIDES", u))
            .collect::<anyhow::Result<Vec<_>>>()?;
        overrides.insert(family.trim().to_lowercase(), urls);
    }
    Ok(overrides)
}
