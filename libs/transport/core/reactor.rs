//! I/O reactor
//!
//! Bridges OS readiness notifications to the socket-action engine.
//!
//! # Architecture
//!
//! ```text
//! Engine ── socket(fd, Watch) ──> Reactor.sockets (fd → Registration) ──> mio registry
//! Engine ── timer(d) ───────────> Reactor.timeout
//!
//! poll():
//!   wait = max(1ms, min(engine timeout, caller default))
//!   mio::Poll::poll(wait)
//!     ├─ events  → engine.socket_action(fd, readiness)   for each registered fd
//!     └─ nothing → engine.timeout_action()
//! ```
//!
//! Registration is edge-triggered: the engine drains each socket until it
//! would block before returning from `socket_action`.

use crate::traits::{Engine, EngineHost, Readiness, SocketAction, SocketId, WriteSink};
use crate::Result;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tracing::{trace, warn};

/// Maximum readiness events collected per wait
const EVENT_CAPACITY: usize = 16;

/// Floor for the wait so a zero engine timeout never spins
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Per-socket registration context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registration {
    interest: Readiness,
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    sockets: HashMap<SocketId, Registration>,
    timeout: Option<Duration>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            sockets: HashMap::new(),
            timeout: None,
        })
    }

    /// Timeout most recently requested by the engine
    pub fn engine_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Wait that the next [`poll`](Self::poll) will use
    pub fn effective_timeout(&self, default_timeout: Duration) -> Duration {
        effective_timeout(self.timeout, default_timeout)
    }

    /// Number of sockets currently watched
    pub fn registered(&self) -> usize {
        self.sockets.len()
    }

    /// Interest currently recorded for `socket`
    pub fn interest(&self, socket: SocketId) -> Option<Readiness> {
        self.sockets.get(&socket).map(|registration| registration.interest)
    }

    /// Wait for readiness and dispatch it to the engine
    ///
    /// Returns the number of ready sockets that were dispatched. An
    /// interrupted wait counts as an empty, successful iteration.
    pub fn poll<E: Engine + ?Sized>(
        &mut self,
        engine: &mut E,
        sink: &mut dyn WriteSink,
        default_timeout: Duration,
    ) -> Result<usize> {
        let wait = self.effective_timeout(default_timeout);

        if let Err(e) = self.poll.poll(&mut self.events, Some(wait)) {
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(e.into());
        }

        let ready: Vec<(SocketId, Readiness)> = self
            .events
            .iter()
            .map(|event| {
                let failed = event.is_error();
                (
                    event.token().0 as SocketId,
                    Readiness {
                        readable: event.is_readable() || event.is_read_closed() || failed,
                        writable: event.is_writable() || event.is_write_closed() || failed,
                    },
                )
            })
            .collect();

        if ready.is_empty() {
            engine.timeout_action(self, sink);
            return Ok(0);
        }

        let mut dispatched = 0;
        for (socket, readiness) in ready {
            // An earlier action in this batch may have removed it
            if !self.sockets.contains_key(&socket) {
                trace!("Skipping event for unregistered socket {}", socket);
                continue;
            }
            engine.socket_action(self, sink, socket, readiness);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    fn register(&mut self, socket: SocketId, readiness: Readiness) {
        let Some(interest) = to_interest(readiness) else {
            self.unregister(socket);
            return;
        };

        let token = Token(socket as usize);
        let registry = self.poll.registry();

        let result = match self.sockets.get(&socket) {
            Some(existing) if existing.interest == readiness => return,
            Some(_) => match registry.reregister(&mut SourceFd(&socket), token, interest) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    registry.register(&mut SourceFd(&socket), token, interest)
                }
                other => other,
            },
            None => match registry.register(&mut SourceFd(&socket), token, interest) {
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    registry.reregister(&mut SourceFd(&socket), token, interest)
                }
                other => other,
            },
        };

        match result {
            Ok(()) => {
                trace!("Watching socket {} ({:?})", socket, readiness);
                self.sockets.insert(socket, Registration { interest: readiness });
            }
            Err(e) => warn!("Failed to register socket {}: {}", socket, e),
        }
    }

    fn unregister(&mut self, socket: SocketId) {
        if self.sockets.remove(&socket).is_none() {
            return;
        }
        // The descriptor may already be closed, in which case the OS dropped it for us
        if let Err(e) = self.poll.registry().deregister(&mut SourceFd(&socket)) {
            trace!("Deregister of socket {} failed: {}", socket, e);
        } else {
            trace!("Stopped watching socket {}", socket);
        }
    }
}

impl EngineHost for Reactor {
    fn socket(&mut self, socket: SocketId, action: SocketAction) {
        match action {
            SocketAction::Watch(readiness) => self.register(socket, readiness),
            SocketAction::Remove => self.unregister(socket),
        }
    }

    fn timer(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}

/// Wait derived from the engine's requested timeout and the caller default
pub fn effective_timeout(engine_timeout: Option<Duration>, default_timeout: Duration) -> Duration {
    let wait = match engine_timeout {
        Some(timeout) => timeout.min(default_timeout),
        None => default_timeout,
    };
    wait.max(MIN_WAIT)
}

fn to_interest(readiness: Readiness) -> Option<Interest> {
    match (readiness.readable, readiness.writable) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}
