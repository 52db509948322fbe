pub mod config;
pub mod logger;

pub use logger::init_logger;
