//! Muse Gateway
//!
//! Keeps one gateway WebSocket alive on top of `muse-transport`: decodes
//! envelopes, answers Hello with Identify or Resume, heartbeats on a fixed
//! interval, reconnects when the link drops and forwards dispatch events to
//! a collaborator handler.
//!
//! ## Layers
//!
//! - **domain**: wire envelope, opcodes and payloads
//! - **session**: the protocol state machine and the link/handler seams
//! - **application**: the `Gateway` loop and REST helpers
//! - **infrastructure**: configuration and logging
//! - **utils**: signal-driven shutdown (Ctrl+C and SIGTERM)
//!
//! Like `muse-transport`, this crate targets unix only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use muse_gateway::{DispatchRouter, Gateway, GatewayConfig};
//! use std::sync::atomic::AtomicBool;
//!
//! let config = GatewayConfig::default().with_token("secret");
//! let router: DispatchRouter = DispatchRouter::new().on("READY", |_transport, data| {
//!     println!("ready: {}", data["session_id"]);
//! });
//!
//! let mut gateway = Gateway::new(&config, router)?;
//! gateway.run(&AtomicBool::new(true))?;
//! # Ok::<(), muse_gateway::GatewayError>(())
//! ```

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod session;
pub mod utils;

pub use application::{Gateway, RestClient};
pub use domain::{ConnectionProperties, CreateMessage, Envelope, OpCode};
pub use error::{GatewayError, Result};
pub use infrastructure::{init_tracing, ConfigError, GatewayConfig};
pub use session::{Dispatch, DispatchHandler, DispatchRouter, GatewayLink, GatewaySession};
pub use utils::ShutdownManager;

// The transport this crate drives
pub use muse_transport;
