//! # Muse Transport
//!
//! A single-threaded, non-blocking network transport that multiplexes one
//! persistent WebSocket session and any number of one-shot HTTP requests over
//! a single readiness reactor.
//!
//! ## Features
//!
//! - **Edge-triggered reactor**: OS readiness (mio) bridged to a socket-action engine
//! - **Socket-action engine**: HTTP/1.1 and WebSocket (tungstenite framing) client transfers over plain TCP or TLS
//! - **Request lifecycle**: Response bodies accumulated per request, callback fired exactly once
//! - **WebSocket session**: Frame reassembly, connect/disconnect notifications, JSON send
//!
//! Unix only: sockets are identified by their raw file descriptors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use muse_transport::{Transport, TransportConfig, WsHandler};
//! use std::time::Duration;
//!
//! struct Printer;
//!
//! impl WsHandler for Printer {
//!     fn on_message(&mut self, _transport: &mut Transport, message: &[u8]) {
//!         println!("{}", String::from_utf8_lossy(message));
//!     }
//! }
//!
//! let mut transport = Transport::new(TransportConfig::default())?;
//! transport.ws_open("wss://echo.example.com")?;
//! transport.http_get("https://example.com", |_transport, response| {
//!     println!("status {}", response.status);
//! })?;
//!
//! loop {
//!     transport.poll(&mut Printer, Duration::from_millis(1000))?;
//! }
//! ```

pub mod core;
pub mod engine;
pub mod traits;

// Re-export all traits
pub use traits::*;

// Re-export core functionality
pub use core::{
    buffer::{AllocationFailure, GrowableBuffer, DEFAULT_CAPACITY},
    config::TransportConfig,
    reactor::Reactor,
    request::{HttpResponse, RequestId},
    transport::Transport,
    websocket::{WsEvent, WsSession, WsState},
};

pub use engine::{EngineConfig, Multi};
