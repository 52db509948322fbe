// Forward Handler
use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{info, warn};

use crate::error::ProxyError;
use crate::proxy::server::RouteState;
use crate::proxy::upstream::client::{UpstreamRequest, UpstreamResponse};

const EMPTY_JSON_OBJECT: &[u8] = b"{}";

/// Catch-all handler mounted at `<mount>` and `<mount>/*rest`.
///
/// Emits exactly one log line per request: route, method, upstream path and
/// the resulting status. Neither headers nor the credential are logged.
pub async fn handle_forward(
    State(state): State<RouteState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let route = &state.route;
    let upstream_path = route.upstream_path(uri.path());

    match forward(&state, &method, &uri, &headers, body, &upstream_path).await {
        Ok(upstream) => {
            info!(
                "[{}] {} /{} -> {}",
                route.name, method, upstream_path, upstream.status
            );
            relay(upstream)
        }
        Err(e) => {
            warn!(
                "[{}] {} /{} -> {} ({}, retryable: {})",
                route.name,
                method,
                upstream_path,
                e.status_code(),
                e,
                e.is_retryable()
            );
            e.into_response()
        }
    }
}

async fn forward(
    state: &RouteState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
    upstream_path: &str,
) -> Result<UpstreamResponse, ProxyError> {
    let route = &state.route;

    if !route.allows_method(method) {
        return Err(ProxyError::MethodNotAllowed {
            allowed: route.allowed_methods.clone(),
        });
    }
    if !route.allows_path(upstream_path) {
        return Err(ProxyError::PathNotAllowed);
    }
    let credential = route
        .credential
        .as_ref()
        .ok_or_else(|| ProxyError::MissingCredential {
            env: route.credential_env.clone(),
        })?;

    let request = UpstreamRequest {
        method: method.clone(),
        url: route.upstream_url(upstream_path, uri.query()),
        credential,
        content_type: headers.get(header::CONTENT_TYPE).cloned(),
        body: outbound_body(method, body),
    };

    state.upstream.forward(request, route.timeout).await
}

/// Body sent upstream. GET and HEAD never carry one; everything else sends JSON
/// text, falling back to `{}` rather than failing the request.
pub fn outbound_body(method: &Method, body: Bytes) -> Option<Bytes> {
    if method == Method::GET || method == Method::HEAD {
        return None;
    }
    if body.is_empty() {
        return Some(Bytes::from_static(EMPTY_JSON_OBJECT));
    }
    if serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_ok() {
        return Some(body);
    }
    // Plain text bodies go through unchanged
    if std::str::from_utf8(&body).is_ok() {
        return Some(body);
    }
    Some(Bytes::from_static(EMPTY_JSON_OBJECT))
}

/// Status and body bytes are copied verbatim; only a missing content type is filled in.
fn relay(upstream: UpstreamResponse) -> Response {
    let content_type = upstream
        .content_type
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    (
        upstream.status,
        [(header::CONTENT_TYPE, content_type)],
        upstream.body,
    )
        .into_response()
}
