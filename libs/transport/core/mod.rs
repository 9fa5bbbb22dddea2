//! Core transport components
//!
//! ```text
//! Transport
//!   ├── Reactor        (mio Poll + socket registration table + engine timer)
//!   ├── Multi          (socket-action engine, see crate::engine)
//!   ├── RequestTable   (in-flight HTTP requests and their body buffers)
//!   └── WsSession      (WebSocket state, message accumulator, notifications)
//! ```

pub mod buffer;
pub mod config;
pub mod reactor;
pub mod request;
pub mod transport;
pub mod websocket;

pub use buffer::{AllocationFailure, GrowableBuffer};
pub use config::TransportConfig;
pub use reactor::Reactor;
pub use request::{HttpResponse, RequestId};
pub use transport::Transport;
pub use websocket::{WsEvent, WsSession, WsState};
