//! Infrastructure Layer
//!
//! Configuration loading and logging setup.

pub mod config;
pub mod logging;

pub use config::{ConfigError, GatewayConfig, GatewaySettings, HttpConfig, IdentityConfig, TOKEN_ENV};
pub use logging::init_tracing;
