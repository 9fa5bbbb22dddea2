//! Socket-action engine contract
//!
//! The engine owns every connection and protocol state machine. It never
//! waits on sockets itself; instead it tells its host which sockets it cares
//! about and when it next needs a timer kick, and the host calls back into it
//! when a socket becomes ready or the timer expires.
//!
//! ```text
//! ┌──────────┐  socket(fd, Watch/Remove)  ┌─────────┐
//! │  Engine  │ ─────────────────────────> │ Reactor │ ── epoll/kqueue (mio)
//! │ (Multi)  │  timer(Some(d) / None)     │         │
//! │          │ <───────────────────────── │         │
//! └──────────┘  socket_action / timeout   └─────────┘
//!      │
//!      └── write(transfer, chunk) ──> WriteSink (request buffers)
//! ```

use crate::Result;
use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// OS socket handle as seen by the reactor
pub type SocketId = RawFd;

/// Identifies one transfer (an HTTP request or the WebSocket connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness directions, used both for interest and for reported events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    pub const NONE: Readiness = Readiness {
        readable: false,
        writable: false,
    };
    pub const READABLE: Readiness = Readiness {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Readiness = Readiness {
        readable: false,
        writable: true,
    };
    pub const BOTH: Readiness = Readiness {
        readable: true,
        writable: true,
    };

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }
}

/// What the engine wants done with one of its sockets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketAction {
    /// Start or keep watching with the given interest
    Watch(Readiness),
    /// Stop watching and forget the socket
    Remove,
}

/// Host side of the engine: socket registration and the single engine timer
pub trait EngineHost {
    /// Register, update or remove interest for a socket
    fn socket(&mut self, socket: SocketId, action: SocketAction);

    /// Request a timer kick after `timeout`, or cancel the timer with `None`
    fn timer(&mut self, timeout: Option<Duration>);
}

/// Destination of response body bytes
pub trait WriteSink {
    /// Accept a chunk for `transfer`; returning less than `chunk.len()` aborts it
    fn write(&mut self, transfer: TransferId, chunk: &[u8]) -> usize;
}

/// A finished transfer reported by the engine
///
/// For HTTP transfers the outcome carries the final status code. For the
/// WebSocket transfer it reports the end of the upgrade handshake; the
/// transfer itself stays alive until removed.
#[derive(Debug)]
pub struct Completion {
    pub transfer: TransferId,
    pub outcome: Result<u16>,
}

/// Socket-action engine
pub trait Engine {
    /// Drive whatever is attached to `socket` after a readiness event
    fn socket_action(
        &mut self,
        host: &mut dyn EngineHost,
        sink: &mut dyn WriteSink,
        socket: SocketId,
        readiness: Readiness,
    );

    /// Start pending transfers and expire overdue ones
    fn timeout_action(&mut self, host: &mut dyn EngineHost, sink: &mut dyn WriteSink);

    /// Pop the next finished transfer, if any
    fn next_completion(&mut self) -> Option<Completion>;
}
