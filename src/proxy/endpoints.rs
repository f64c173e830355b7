//! Where a logical resource can be reached.
//!
//! The backend runs in several topologies (compose network, host loopback,
//! externally published URL), so every call carries an ordered candidate
//! list rather than a single base URL.

use std::collections::BTreeMap;

use url::Url;

#[derive(Debug, Clone)]
pub struct EndpointResolver {
    service_url: Url,
    loopback_url: Url,
    env_url: Option<Url>,
    overrides: BTreeMap<String, Vec<Url>>,
}

impl EndpointResolver {
    pub fn new(
        service_url: Url,
        loopback_url: Url,
        env_url: Option<Url>,
        overrides: BTreeMap<String, Vec<Url>>,
    ) -> Self {
        Self {
            service_url: as_base(service_url),
            loopback_url: as_base(loopback_url),
            env_url: env_url.map(as_base),
            overrides: overrides
                .into_iter()
                .map(|(family, urls)| (family.to_lowercase(), urls.into_iter().map(as_base).collect()))
                .collect(),
        }
    }

    /// A resolver that only knows one base URL, used by tests and the CLI.
    pub fn single(base: Url) -> Self {
        let base = as_base(base);
        Self::new(base.clone(), base, None, BTreeMap::new())
    }

    /// Ordered, de-duplicated candidate base URLs for `resource`.
    ///
    /// Family overrides come first, then the service-network URL, the
    /// loopback URL and finally the externally configured URL. Never empty.
    pub fn resolve(&self, resource: &str) -> Vec<Url> {
        let family = resource_family(resource);
        let overrides = self.overrides.get(&family).map(Vec::as_slice).unwrap_or_default();

        let mut candidates: Vec<Url> = Vec::with_capacity(overrides.len() + 3);
        let ordered = overrides
            .iter()
            .chain([&self.service_url, &self.loopback_url])
            .chain(self.env_url.as_ref());
        for url in ordered {
            if !candidates.contains(url) {
                candidates.push(url.clone());
            }
        }
        candidates
    }
}

/// First path segment of a logical resource, lowercased.
///
/// `"projects/42/vulnerabilities"` → `"projects"`. A leading `/` or `api/`
/// prefix and any query string are ignored.
pub fn resource_family(resource: &str) -> String {
    let path = resource.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_start_matches('/');
    let path = path.strip_prefix("api/").unwrap_or(path);
    path.split('/')
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_lowercase()
}

/// Base URLs must end in `/` so that `Url::join` appends rather than
/// replacing the last path segment.
fn as_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn resolver() -> EndpointResolver {
        EndpointResolver::new(
            url("http://api:8001"),
            url("http://127.0.0.1:8001"),
            Some(url("https://pentest.example.com/backend")),
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_resource_family() {
        assert_eq!(resource_family("projects/42/vulnerabilities"), "projects");
        assert_eq!(resource_family("/api/Users?skip=0"), "users");
        assert_eq!(resource_family("vulnerabilities"), "vulnerabilities");
        assert_eq!(resource_family(""), "");
    }

    #[test]
    fn test_default_order() {
        let got: Vec<String> = resolver().resolve("projects").iter().map(|u| u.to_string()).collect();
        assert_eq!(
            got,
            vec![
                "http://api:8001/",
                "http://127.0.0.1:8001/",
                "https://pentest.example.com/backend/",
            ]
        );
    }

    #[test]
    fn test_never_empty_and_stable() {
        let r = resolver();
        for resource in ["", "users", "projects/1", "unknown/thing"] {
            let first = r.resolve(resource);
            assert!(!first.is_empty());
            assert_eq!(first, r.resolve(resource));
        }
    }

    #[test]
    fn test_duplicates_removed_keeping_first() {
        let r = EndpointResolver::new(
            url("http://127.0.0.1:8001/"),
            url("http://127.0.0.1:8001"),
            Some(url("http://api:8001")),
            BTreeMap::from([("users".to_string(), vec![url("http://api:8001")])]),
        );
        let got: Vec<String> = r.resolve("users/3").iter().map(|u| u.to_string()).collect();
        assert_eq!(got, vec!["http://api:8001/", "http://127.0.0.1:8001/"]);
    }

    #[test]
    fn test_overrides_only_apply_to_their_family() {
        let r = EndpointResolver::new(
            url("http://api:8001"),
            url("http://127.0.0.1:8001"),
            None,
            BTreeMap::from([("Projects".to_string(), vec![url("http://projects-svc:9000")])]),
        );
        assert_eq!(r.resolve("projects/1")[0].as_str(), "http://projects-svc:9000/");
        assert_eq!(r.resolve("users")[0].as_str(), "http://api:8001/");
    }
}
