use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::{any, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::error::{AppError, AppResult};
use crate::proxy::config::ProxyConfig;
use crate::proxy::route::ForwardRoute;
use crate::proxy::upstream::client::UpstreamClient;

/// Per-route axum state
#[derive(Clone)]
pub struct RouteState {
    pub route: Arc<ForwardRoute>,
    pub upstream: Arc<UpstreamClient>,
}

/// Resolve every configured route, reading each credential from the environment once.
pub fn load_routes(config: &ProxyConfig) -> AppResult<Vec<ForwardRoute>> {
    let timeout = Duration::from_secs(config.request_timeout);
    config
        .routes
        .iter()
        .map(|route| ForwardRoute::from_config(route, timeout))
        .collect()
}

/// Build the full application router.
pub fn build_router(
    routes: Vec<ForwardRoute>,
    upstream: Arc<UpstreamClient>,
    config: &ProxyConfig,
) -> Router {
    use crate::proxy::handlers;

    let mut app = Router::new()
        .route("/healthz", get(health_check_handler))
        .route("/_health", get(health_check_handler));

    for route in routes {
        let mount = route.mount_prefix.clone();
        let state = RouteState {
            route: Arc::new(route),
            upstream: upstream.clone(),
        };
        let forward = Router::new()
            .route(&mount, any(handlers::forward::handle_forward))
            .route(
                &format!("{}/*rest", mount),
                any(handlers::forward::handle_forward),
            )
            .with_state(state);
        app = app.merge(forward);
    }

    app.layer(DefaultBodyLimit::max(config.body_limit_mb.saturating_mul(1024 * 1024)))
        .layer(TraceLayer::new_for_http())
        .layer(crate::proxy::middleware::cors_layer(&config.cors_origins))
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// Start Axum server
    pub async fn start(
        host: String,
        config: &ProxyConfig,
        routes: Vec<ForwardRoute>,
    ) -> AppResult<(Self, tokio::task::JoinHandle<()>)> {
        let upstream = Arc::new(UpstreamClient::new(Some(config.upstream_proxy.clone()))?);
        let app = build_router(routes, upstream, config);

        // Bind address
        let addr = format!("{}:{}", host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| AppError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Forwarding proxy started at http://{}", local_addr);

        // Create shutdown channel
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        // Start server in new task
        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling finished or errored: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Forwarding proxy stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::config::ForwardRouteConfig;

    #[test]
    fn test_load_routes_uses_config_timeout() {
        let mut config = ProxyConfig::default();
        config.request_timeout = 7;
        config.routes = vec![ForwardRouteConfig {
            credential_env: "CHAT_RELAY_TEST_UNSET_KEY".into(),
            ..ForwardRouteConfig::openai("/api/openapi")
        }];
        let routes = load_routes(&config).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].timeout, Duration::from_secs(7));
        assert!(routes[0].credential.is_none());
    }

    #[test]
    fn test_huge_body_limit_does_not_overflow() {
        let mut config = ProxyConfig::default();
        config.body_limit_mb = usize::MAX;
        let routes = load_routes(&config).unwrap();
        let upstream = Arc::new(UpstreamClient::new(None).unwrap());
        let _router = build_router(routes, upstream, &config);
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let mut config = ProxyConfig::default();
        config.port = 0;
        let routes = load_routes(&config).unwrap();
        let (server, handle) = AxumServer::start("127.0.0.1".into(), &config, routes)
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let body = client
            .get(format!("http://{}/healthz", server.local_addr()))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, r#"{"status":"ok"}"#);

        server.stop();
        handle.await.unwrap();
    }
}
