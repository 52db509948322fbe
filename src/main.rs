use chat_relay::error::AppResult;
use chat_relay::{modules, proxy};

#[tokio::main]
async fn main() -> AppResult<()> {
    let _log_guard = modules::init_logger();

    let config_path = modules::config::config_path()?;
    let mut proxy_config = match modules::config::load_config_from(&config_path) {
        Ok(cfg) => {
            if !config_path.exists() {
                if let Err(err) = modules::config::save_config_to(&config_path, &cfg) {
                    tracing::warn!("failed to write default config: {}", err);
                }
            }
            cfg
        }
        Err(err) => {
            tracing::warn!(
                "failed to load config {}: {}. using defaults",
                config_path.display(),
                err
            );
            proxy::ProxyConfig::default()
        }
    };

    let bind_address =
        modules::config::apply_env_overrides(&mut proxy_config, |key| std::env::var(key).ok())?;
    proxy_config.validate()?;

    // Credentials are read here, once, and carried by each route from now on
    let routes = proxy::load_routes(&proxy_config)?;
    for route in &routes {
        tracing::info!(
            "[{}] {} -> {} (methods: {})",
            route.name,
            route.mount_prefix,
            route.upstream_base,
            chat_relay::error::allow_header_value(&route.allowed_methods)
        );
    }

    let (server, handle) =
        proxy::AxumServer::start(bind_address, &proxy_config, routes).await?;

    tracing::info!("chat-relay listening on http://{}", server.local_addr());

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
    }

    tracing::info!("shutting down");
    server.stop();
    let _ = handle.await;
    Ok(())
}
