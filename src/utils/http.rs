use reqwest::{Client, Proxy};
use std::time::Duration;

use crate::error::AppResult;
use crate::proxy::config::UpstreamProxyConfig;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Create an HTTP client with specified proxy configuration
///
/// Only the explicit proxy config is honored; `HTTP_PROXY` and friends are ignored.
/// No overall request timeout is set here; callers bound each call themselves.
/// Redirects are never followed: a 3xx from upstream is relayed as-is.
pub fn create_client_with_proxy(proxy_config: Option<UpstreamProxyConfig>) -> AppResult<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .user_agent(concat!("chat-relay/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy();

    if let Some(config) = proxy_config {
        if config.enabled && !config.url.is_empty() {
            match Proxy::all(&config.url) {
                Ok(proxy) => {
                    builder = builder.proxy(proxy);
                    tracing::info!("HTTP client upstream proxy enabled: {}", config.url);
                }
                Err(e) => {
                    tracing::error!("Invalid proxy address: {}, error: {}", config.url, e);
                }
            }
        }
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_proxy_falls_back_to_direct() {
        let config = UpstreamProxyConfig {
            enabled: true,
            url: "::not a proxy::".to_string(),
        };
        assert!(create_client_with_proxy(Some(config)).is_ok());
    }
}
