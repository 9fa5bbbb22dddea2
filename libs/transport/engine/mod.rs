//! Socket-action engine
//!
//! [`Multi`] owns every transfer and its connection. It is driven entirely
//! from outside: the reactor reports readiness and timer expiry, and the
//! engine answers with socket interest changes, timer requests and
//! completions.

pub(crate) mod conn;
pub mod frame;
pub mod http;
pub mod multi;
pub(crate) mod ws;

pub use frame::{Data, Frame, OpCode};
pub use http::{Method, RequestSpec, ResponseHead};
pub use multi::Multi;

use std::time::Duration;

/// Limits and identity applied to every transfer.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub max_redirects: usize,
    pub max_frame_payload: usize,
}
