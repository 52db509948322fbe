// proxy module - credential-hiding forwarding proxy

pub mod config;
pub mod route;
pub mod server;

pub mod handlers; // API endpoint handlers
pub mod middleware; // Axum middleware
pub mod upstream; // Upstream client

pub use config::{ForwardRouteConfig, ProxyConfig};
pub use route::{Credential, ForwardRoute};
pub use server::{build_router, load_routes, AxumServer};
