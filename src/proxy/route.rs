// Resolved forwarding route
// Config values are parsed and the credential is read from the environment once, at startup

use axum::http::Method;
use std::fmt;
use std::str::FromStr;
use tokio::time::Duration;

use super::config::{normalize_mount_prefix, ForwardRouteConfig};
use crate::error::{AppError, AppResult};

/// Server-held API key. Never printed.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read from the environment; unset and blank values are both treated as missing.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(Self)
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone)]
pub struct ForwardRoute {
    pub name: String,
    pub mount_prefix: String,
    pub upstream_base: String,
    pub credential_env: String,
    pub credential: Option<Credential>,
    pub allowed_methods: Vec<Method>,
    pub allowed_paths: Vec<String>,
    pub timeout: Duration,
}

impl ForwardRoute {
    pub fn from_config(config: &ForwardRouteConfig, timeout: Duration) -> AppResult<Self> {
        let credential = Credential::from_env(&config.credential_env);
        if credential.is_none() {
            tracing::warn!(
                "[{}] {} not set in environment, requests to {} will fail with 500",
                config.name,
                config.credential_env,
                normalize_mount_prefix(&config.mount_prefix)
            );
        }
        Self::from_parts(config, credential, timeout)
    }

    /// Build a route with an explicitly supplied credential.
    pub fn from_parts(
        config: &ForwardRouteConfig,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> AppResult<Self> {
        let allowed_methods = config
            .allowed_methods
            .iter()
            .map(|m| {
                Method::from_str(&m.trim().to_ascii_uppercase()).map_err(|_| {
                    AppError::Config(format!("route '{}': invalid method '{}'", config.name, m))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self {
            name: config.name.clone(),
            mount_prefix: normalize_mount_prefix(&config.mount_prefix),
            upstream_base: config.upstream_base.clone(),
            credential_env: config.credential_env.clone(),
            credential,
            allowed_methods,
            allowed_paths: config
                .allowed_paths
                .iter()
                .map(|p| join_segments(p))
                .collect(),
            timeout,
        })
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        self.allowed_methods.contains(method)
    }

    /// Upstream path for an inbound request path, e.g.
    /// `/api/openai/threads/abc/runs` -> `threads/abc/runs`.
    pub fn upstream_path(&self, inbound_path: &str) -> String {
        let rest = inbound_path
            .strip_prefix(self.mount_prefix.as_str())
            .unwrap_or(inbound_path);
        join_segments(rest)
    }

    /// Segment-aligned prefix match against `allowed_paths`; an empty list allows everything.
    ///
    /// Paths with `.` or `..` segments are always refused: the URL parser would
    /// resolve them after this check and move the request outside the prefix,
    /// or outside the upstream base altogether.
    pub fn allows_path(&self, upstream_path: &str) -> bool {
        if has_dot_segment(upstream_path) {
            return false;
        }
        if self.allowed_paths.is_empty() {
            return true;
        }
        self.allowed_paths.iter().any(|allowed| {
            allowed.is_empty()
                || upstream_path == allowed
                || upstream_path
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Full upstream URL. An empty path maps to the base itself.
    pub fn upstream_url(&self, upstream_path: &str, query: Option<&str>) -> String {
        let mut url = if upstream_path.is_empty() {
            self.upstream_base.clone()
        } else {
            format!(
                "{}/{}",
                self.upstream_base.trim_end_matches('/'),
                upstream_path
            )
        };
        if let Some(qs) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(qs);
        }
        url
    }
}

/// True if any segment is `.` or `..`, plain or percent-encoded (`%2e`, any case).
/// Backslash counts as a separator, as it does for http(s) URLs.
fn has_dot_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| {
        let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
        decoded == "." || decoded == ".."
    })
}

/// Drop empty segments and join the rest with `/`.
fn join_segments(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_route() -> ForwardRoute {
        let mut config = ForwardRouteConfig::openai("/api/openai/");
        config.upstream_base = "https://upstream.test/v1".into();
        ForwardRoute::from_parts(
            &config,
            Some(Credential::new("sk-test")),
            Duration::from_secs(20),
        )
        .unwrap()
    }

    #[test]
    fn test_upstream_path_from_wildcard() {
        let route = test_route();
        assert_eq!(route.mount_prefix, "/api/openai");
        assert_eq!(
            route.upstream_path("/api/openai/threads/abc/runs"),
            "threads/abc/runs"
        );
        assert_eq!(route.upstream_path("/api/openai//threads/"), "threads");
        assert_eq!(route.upstream_path("/api/openai"), "");
        assert_eq!(route.upstream_path("/api/openai/"), "");
    }

    #[test]
    fn test_upstream_url() {
        let route = test_route();
        assert_eq!(
            route.upstream_url("threads/abc/runs", None),
            "https://upstream.test/v1/threads/abc/runs"
        );
        assert_eq!(route.upstream_url("", None), "https://upstream.test/v1");
        assert_eq!(
            route.upstream_url("threads/abc/messages", Some("limit=20&order=desc")),
            "https://upstream.test/v1/threads/abc/messages?limit=20&order=desc"
        );
        assert_eq!(route.upstream_url("", Some("")), "https://upstream.test/v1");
    }

    #[test]
    fn test_allowed_paths() {
        let mut route = test_route();
        assert!(route.allows_path("files/anything"));

        route.allowed_paths = vec!["threads".into()];
        assert!(route.allows_path("threads"));
        assert!(route.allows_path("threads/abc/runs"));
        assert!(!route.allows_path("threadsx"));
        assert!(!route.allows_path("files"));
        assert!(!route.allows_path(""));
    }

    #[test]
    fn test_dot_segments_never_allowed() {
        let mut route = test_route();
        for path in [
            "..",
            "threads/../files",
            "threads/%2e%2e/files",
            "threads/%2E%2e/files",
            "threads/.%2e/files",
            "threads/%2e./files",
            "threads/./abc",
            "threads/%2e/abc",
            "threads\\..\\files",
        ] {
            assert!(!route.allows_path(path), "{}", path);
        }

        route.allowed_paths = vec!["threads".into()];
        assert!(!route.allows_path("threads/../files"));
        assert!(!route.allows_path("threads/%2e%2e/files"));
        assert!(route.allows_path("threads/..abc"));
        assert!(route.allows_path("threads/v1.2"));
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut config = ForwardRouteConfig::openai("/api/openai");
        config.allowed_methods = vec!["get".into(), "NOT A METHOD".into()];
        assert!(ForwardRoute::from_parts(&config, None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let route = test_route();
        let printed = format!("{:?}", route);
        assert!(printed.contains("Credential(***)"));
        assert!(!printed.contains("sk-test"));
    }
}
