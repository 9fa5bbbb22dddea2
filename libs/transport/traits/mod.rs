//! # Transport Traits
//!
//! Seams between the reactor, the socket-action engine and the caller:
//!
//! - **Engine**: Socket-action engine driven by readiness and timer expiry
//! - **EngineHost**: Receives socket interest and timer requests from the engine
//! - **WriteSink**: Receives response body bytes per transfer
//! - **WsHandler**: Receives WebSocket notifications and complete messages

pub mod engine;
pub mod error;
pub mod handler;

// Re-export commonly used types
pub use engine::{
    Completion, Engine, EngineHost, Readiness, SocketAction, SocketId, TransferId, WriteSink,
};
pub use error::{Result, TransportError};
pub use handler::WsHandler;
