pub mod config;
pub mod errors;

pub use config::{AppConfig, ServerConfig};
pub use errors::AppError;
