use crate::infrastructure::ConfigError;
use muse_transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or incomplete envelope; dropped by the session
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Identify was rejected before any session existed
    #[error("Session rejected: {0}")]
    SessionRejected(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
