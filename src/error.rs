use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind address {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// Failures produced while forwarding a single request.
///
/// A non-2xx answer from the upstream is not represented here: it is relayed
/// to the caller as-is.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed { allowed: Vec<Method> },

    #[error("upstream path not allowed")]
    PathNotAllowed,

    #[error("{env} not set on server")]
    MissingCredential { env: String },

    #[error("upstream timeout")]
    UpstreamTimeout,

    #[error("proxy error: {0}")]
    Network(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::PathNotAllowed => StatusCode::FORBIDDEN,
            ProxyError::MissingCredential { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Network(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller can reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::UpstreamTimeout | ProxyError::Network(_))
    }
}

/// Renders the value of an `Allow` header, e.g. `GET, POST, PUT, DELETE`.
pub fn allow_header_value(methods: &[Method]) -> String {
    methods
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            ProxyError::MethodNotAllowed { allowed } => {
                let mut response =
                    (status, Json(json!({ "error": "Method not allowed" }))).into_response();
                if let Ok(value) = HeaderValue::from_str(&allow_header_value(&allowed)) {
                    response.headers_mut().insert(header::ALLOW, value);
                }
                response
            }
            ProxyError::Network(detail) => (
                status,
                Json(json!({ "error": "proxy error", "detail": detail })),
            )
                .into_response(),
            other => (status, Json(json!({ "error": other.to_string() }))).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::MethodNotAllowed { allowed: vec![] }.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(ProxyError::PathNotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ProxyError::UpstreamTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::Network("refused".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(ProxyError::UpstreamTimeout.is_retryable());
        assert!(!ProxyError::PathNotAllowed.is_retryable());
    }

    #[test]
    fn test_missing_credential_message() {
        let err = ProxyError::MissingCredential {
            env: "OPENAI_API_KEY".to_string(),
        };
        assert_eq!(err.to_string(), "OPENAI_API_KEY not set on server");
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let response = ProxyError::MethodNotAllowed {
            allowed: vec![Method::GET, Method::POST],
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET, POST");
    }
}
