use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AppError, AppResult};

/// Upper bound for `body_limit_mb`
pub const MAX_BODY_LIMIT_MB: usize = 1024;

/// 反代服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 是否允许局域网访问
    /// - false: 仅本机访问 127.0.0.1（默认，隐私优先）
    /// - true: 允许局域网访问 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upstream request timeout in seconds, applied to every route
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Maximum inbound body size in MiB
    #[serde(default = "default_body_limit_mb")]
    pub body_limit_mb: usize,

    /// Allowed CORS origins; empty or `*` allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// 上游代理配置
    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,

    /// Forwarding routes, one per mount prefix
    #[serde(default = "default_routes")]
    pub routes: Vec<ForwardRouteConfig>,
}

/// 上游代理配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    /// 是否启用
    pub enabled: bool,
    /// 代理地址 (http://, https://, socks5://)
    pub url: String,
}

/// One mounted forwarding route.
///
/// Every inbound request under `mount_prefix` is relayed to `upstream_base`
/// with the secret read from `credential_env` attached as a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRouteConfig {
    /// Short label used in log lines
    pub name: String,
    pub mount_prefix: String,
    pub upstream_base: String,
    /// Name of the environment variable holding the API key (never the key itself)
    pub credential_env: String,
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,
    /// Upstream path prefixes this route may reach; empty allows any path
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false, // 默认仅本机访问，隐私优先
            port: default_port(),
            request_timeout: default_request_timeout(),
            body_limit_mb: default_body_limit_mb(),
            cors_origins: Vec::new(),
            upstream_proxy: UpstreamProxyConfig::default(),
            routes: default_routes(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    20
}

fn default_body_limit_mb() -> usize {
    10
}

fn default_allowed_methods() -> Vec<String> {
    ["POST", "GET", "PUT", "DELETE"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_routes() -> Vec<ForwardRouteConfig> {
    vec![ForwardRouteConfig::openai("/api/openai")]
}

impl ForwardRouteConfig {
    /// OpenAI v1 route mounted at `mount_prefix`, keyed by `OPENAI_API_KEY`.
    pub fn openai(mount_prefix: &str) -> Self {
        Self {
            name: "openai-proxy".to_string(),
            mount_prefix: mount_prefix.to_string(),
            upstream_base: "https://api.openai.com/v1".to_string(),
            credential_env: "OPENAI_API_KEY".to_string(),
            allowed_methods: default_allowed_methods(),
            allowed_paths: Vec::new(),
        }
    }
}

/// Normalize a mount prefix to `/segment[/segment...]`.
pub fn normalize_mount_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{}", trimmed)
}

impl ProxyConfig {
    /// 获取实际的监听地址
    /// - allow_lan_access = false: 返回 "127.0.0.1"（默认，隐私优先）
    /// - allow_lan_access = true: 返回 "0.0.0.0"（允许局域网访问）
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.routes.is_empty() {
            return Err(AppError::Config("no forwarding routes configured".into()));
        }
        if self.request_timeout == 0 {
            return Err(AppError::Config("request_timeout must be at least 1 second".into()));
        }
        if !(1..=MAX_BODY_LIMIT_MB).contains(&self.body_limit_mb) {
            return Err(AppError::Config(format!(
                "body_limit_mb must be between 1 and {}",
                MAX_BODY_LIMIT_MB
            )));
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            let mount = normalize_mount_prefix(&route.mount_prefix);
            if mount == "/" {
                return Err(AppError::Config(format!(
                    "route '{}' cannot be mounted at the root",
                    route.name
                )));
            }
            if !seen.insert(mount.clone()) {
                return Err(AppError::Config(format!("duplicate mount prefix {}", mount)));
            }

            let base = url::Url::parse(&route.upstream_base).map_err(|e| {
                AppError::Config(format!(
                    "route '{}' has invalid upstream_base: {}",
                    route.name, e
                ))
            })?;
            if !matches!(base.scheme(), "http" | "https") {
                return Err(AppError::Config(format!(
                    "route '{}' upstream_base must be http or https",
                    route.name
                )));
            }

            if route.allowed_methods.is_empty() {
                return Err(AppError::Config(format!(
                    "route '{}' allows no methods",
                    route.name
                )));
            }
            if route.credential_env.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "route '{}' has no credential_env",
                    route.name
                )));
            }
        }
        Ok(())
    }
}
