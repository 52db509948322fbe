pub mod error;
pub mod modules;
pub mod proxy; // Forwarding proxy service
pub mod utils;

pub use error::{AppError, AppResult, ProxyError};
