// Upstream client implementation
// One shared reqwest client; each call is a single attempt bounded by the route timeout

use axum::http::{HeaderValue, Method, StatusCode};
use bytes::Bytes;
use reqwest::{header, Client};
use tokio::time::Duration;

use crate::error::{AppResult, ProxyError};
use crate::proxy::config::UpstreamProxyConfig;
use crate::proxy::route::Credential;

/// Everything the proxy relays back to the caller.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

/// Outbound request as assembled by the forward handler.
pub struct UpstreamRequest<'a> {
    pub method: Method,
    pub url: String,
    pub credential: &'a Credential,
    pub content_type: Option<HeaderValue>,
    pub body: Option<Bytes>,
}

pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(proxy_config: Option<UpstreamProxyConfig>) -> AppResult<Self> {
        let http_client =
            crate::utils::http::create_client_with_proxy(proxy_config)?;
        Ok(Self { http_client })
    }

    pub fn headers_for(
        credential: &Credential,
        content_type: Option<HeaderValue>,
    ) -> Result<header::HeaderMap, ProxyError> {
        let mut headers = header::HeaderMap::new();
        // Deliberately no detail here: the invalid value is the secret itself
        let mut auth = header::HeaderValue::from_str(&credential.bearer())
            .map_err(|_| ProxyError::Network("credential is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, ct);
        }
        Ok(headers)
    }

    /// Send one request upstream and read the whole response body.
    ///
    /// The timeout covers both the send and the body read. When it fires the
    /// in-flight future is dropped, which closes the upstream connection.
    pub async fn forward(
        &self,
        request: UpstreamRequest<'_>,
        timeout: Duration,
    ) -> Result<UpstreamResponse, ProxyError> {
        let headers = Self::headers_for(request.credential, request.content_type)?;

        let mut builder = self
            .http_client
            .request(request.method, &request.url)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let call = async move {
            let response = builder.send().await?;
            let status = response.status();
            let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse {
                status,
                content_type,
                body,
            })
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(ProxyError::UpstreamTimeout),
            Ok(Err(e)) => Err(ProxyError::Network(describe_error(&e))),
            Err(_) => Err(ProxyError::UpstreamTimeout),
        }
    }
}

/// Error text plus its source chain, e.g.
/// `error sending request for url (...): client error (Connect): tcp connect error: Connection refused`.
fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
