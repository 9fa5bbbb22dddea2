//! Multi-transfer engine
//!
//! # Transfer lifecycle
//!
//! ```text
//! add_http / add_websocket ──> pending ──(timeout_action)──> started
//!                                                               │
//!            socket_action(fd) ──> drive ──> reconcile interest │
//!                                    │                          │
//!          HTTP:  Finished / error ──┴──> Completion, transfer removed
//!          WS:    Upgraded / error ─────> Completion, transfer kept until remove()
//! ```
//!
//! Transfers never touch the reactor directly. After every step the engine
//! compares the socket and interest a transfer needs with what it last
//! reported, and tells the host about the difference.

use super::conn::{Conn, Endpoint};
use super::frame::Frame;
use super::http::{HttpExchange, HttpStep, RequestSpec};
use super::ws::{WsExchange, WsPhase, WsStep};
use super::EngineConfig;
use crate::traits::{
    Completion, Engine, EngineHost, Readiness, SocketAction, SocketId, TransferId, WriteSink,
};
use crate::{Result, TransportError};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use url::Url;

/// Socket and interest last reported to the host for a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registered {
    socket: SocketId,
    generation: u64,
    interest: Readiness,
}

enum Exchange {
    Http(HttpExchange),
    WebSocket(WsExchange),
}

enum Progress {
    Pending,
    Upgraded,
    Finished(u16),
    Redirect { location: Url, status: u16 },
}

struct Transfer {
    exchange: Exchange,
    conn: Option<Conn>,
    registered: Option<Registered>,
    deadline: Option<Instant>,
    connect_deadline: Option<Instant>,
}

impl Transfer {
    fn new(exchange: Exchange) -> Self {
        Self {
            exchange,
            conn: None,
            registered: None,
            deadline: None,
            connect_deadline: None,
        }
    }

    /// Open the connection and queue the request or upgrade.
    fn begin(&mut self, config: &EngineConfig, now: Instant) -> Result<()> {
        let (endpoint, request) = match &self.exchange {
            Exchange::Http(exchange) => (
                Endpoint::for_http(exchange.url())?,
                exchange.request_bytes(&config.user_agent),
            ),
            Exchange::WebSocket(ws) => (
                Endpoint::for_websocket(ws.url())?,
                ws.handshake_request(&config.user_agent),
            ),
        };

        match &self.exchange {
            Exchange::Http(_) => {
                // Redirects keep the original overall deadline
                self.deadline.get_or_insert(now + config.request_timeout);
                self.connect_deadline = Some(now + config.connect_timeout);
            }
            Exchange::WebSocket(_) => {
                self.deadline = Some(now + config.handshake_timeout);
            }
        }

        let mut conn = Conn::connect(endpoint)?;
        conn.queue(&request);
        self.conn = Some(conn);
        Ok(())
    }

    fn advance(
        &mut self,
        id: TransferId,
        sink: &mut dyn WriteSink,
        max_redirects: usize,
    ) -> Result<Progress> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(Progress::Pending);
        };

        match &mut self.exchange {
            Exchange::Http(exchange) => {
                conn.drive()?;
                if conn.is_ready() {
                    self.connect_deadline = None;
                }
                let eof = conn.is_eof();
                let mut emit = |chunk: &[u8]| -> Result<()> {
                    let accepted = sink.write(id, chunk);
                    if accepted < chunk.len() {
                        return Err(TransportError::WriteRejected {
                            rejected: chunk.len() - accepted,
                        });
                    }
                    Ok(())
                };
                Ok(
                    match exchange.advance(&mut conn.inbound, eof, max_redirects, &mut emit)? {
                        HttpStep::Pending => Progress::Pending,
                        HttpStep::Complete(status) => Progress::Finished(status),
                        HttpStep::Redirect { location, status } => {
                            Progress::Redirect { location, status }
                        }
                    },
                )
            }
            Exchange::WebSocket(ws) => match ws.advance(conn)? {
                WsStep::Pending => Ok(Progress::Pending),
                WsStep::Upgraded => {
                    self.deadline = None;
                    Ok(Progress::Upgraded)
                }
            },
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.deadline, self.connect_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn expired(&self, now: Instant) -> Option<&'static str> {
        self.conn.as_ref()?;
        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            return Some("connect timed out");
        }
        if self.deadline.is_some_and(|deadline| now >= deadline) {
            return Some(match self.exchange {
                Exchange::Http(_) => "request timed out",
                Exchange::WebSocket(_) => "WebSocket handshake timed out",
            });
        }
        None
    }

    fn ws_closed(&self) -> bool {
        matches!(&self.exchange, Exchange::WebSocket(ws) if ws.phase() == WsPhase::Closed)
    }
}

/// Stop watching a transfer's socket and drop its connection.
fn release(
    sockets: &mut HashMap<SocketId, TransferId>,
    host: &mut dyn EngineHost,
    transfer: &mut Transfer,
) {
    if let Some(registered) = transfer.registered.take() {
        host.socket(registered.socket, SocketAction::Remove);
        sockets.remove(&registered.socket);
    }
    transfer.conn = None;
    transfer.connect_deadline = None;
}

pub struct Multi {
    config: EngineConfig,
    next_id: u64,
    transfers: HashMap<TransferId, Transfer>,
    sockets: HashMap<SocketId, TransferId>,
    pending: VecDeque<TransferId>,
    completions: VecDeque<Completion>,
}

impl Multi {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            next_id: 1,
            transfers: HashMap::new(),
            sockets: HashMap::new(),
            pending: VecDeque::new(),
            completions: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of transfers attached to the engine, started or not
    pub fn active(&self) -> usize {
        self.transfers.len()
    }

    /// Add an HTTP transfer; it starts on the next timer kick.
    pub fn add_http(&mut self, host: &mut dyn EngineHost, spec: RequestSpec) -> Result<TransferId> {
        Endpoint::for_http(&spec.url)?;
        let id = self.allocate_id();
        debug!("Queued {:?} {} as transfer {}", spec.method, spec.url, id);
        self.transfers
            .insert(id, Transfer::new(Exchange::Http(HttpExchange::new(spec))));
        self.pending.push_back(id);
        host.timer(Some(Duration::ZERO));
        Ok(id)
    }

    /// Add a WebSocket transfer; it starts on the next timer kick.
    pub fn add_websocket(&mut self, host: &mut dyn EngineHost, url: Url) -> Result<TransferId> {
        Endpoint::for_websocket(&url)?;
        let id = self.allocate_id();
        debug!("Queued WebSocket {} as transfer {}", url, id);
        let exchange = WsExchange::new(url, self.config.max_frame_payload);
        self.transfers
            .insert(id, Transfer::new(Exchange::WebSocket(exchange)));
        self.pending.push_back(id);
        host.timer(Some(Duration::ZERO));
        Ok(id)
    }

    /// Detach a transfer without reporting a completion.
    ///
    /// An open WebSocket gets a best-effort Close frame first.
    pub fn remove(&mut self, host: &mut dyn EngineHost, id: TransferId) {
        let Some(mut transfer) = self.transfers.remove(&id) else {
            return;
        };
        self.pending.retain(|pending| *pending != id);
        self.completions.retain(|completion| completion.transfer != id);

        if let (Exchange::WebSocket(ws), Some(conn)) = (&transfer.exchange, transfer.conn.as_mut()) {
            if ws.phase() == WsPhase::Open {
                match ws.close_frame() {
                    Ok(bytes) => {
                        conn.queue(&bytes);
                        conn.flush_best_effort();
                    }
                    Err(e) => trace!("Skipping close frame for transfer {}: {}", id, e),
                }
            }
        }

        release(&mut self.sockets, host, &mut transfer);
        trace!("Removed transfer {}", id);
        self.update_timer(host);
    }

    /// Send one frame on an open WebSocket transfer.
    pub fn ws_send(
        &mut self,
        host: &mut dyn EngineHost,
        id: TransferId,
        frame: Frame,
    ) -> Result<()> {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return Err(TransportError::NotConnected);
        };
        let Exchange::WebSocket(ws) = &mut transfer.exchange else {
            return Err(TransportError::NotConnected);
        };
        let Some(conn) = transfer.conn.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        if ws.phase() != WsPhase::Open {
            return Err(TransportError::NotConnected);
        }

        conn.queue(&ws.encode(frame)?);
        let flushed = conn.flush();
        let result = match flushed {
            Ok(()) => Ok(()),
            Err(e) => {
                let reason = e.to_string();
                ws.fail(e);
                Err(TransportError::ConnectionClosed(reason))
            }
        };

        self.settle(host, id);
        result
    }

    /// Pull the next data frame (or the terminal error) of a WebSocket transfer.
    pub fn ws_recv(&mut self, id: TransferId) -> Option<Result<Frame>> {
        match self.transfers.get_mut(&id) {
            Some(Transfer {
                exchange: Exchange::WebSocket(ws),
                ..
            }) => ws.next_frame(),
            _ => None,
        }
    }

    fn allocate_id(&mut self) -> TransferId {
        let id = TransferId(self.next_id);
        self.next_id += 1;
        id
    }

    fn start(&mut self, host: &mut dyn EngineHost, sink: &mut dyn WriteSink, id: TransferId) {
        let now = Instant::now();
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };
        match transfer.begin(&self.config, now) {
            Ok(()) => self.drive(host, sink, id),
            Err(e) => self.fail(host, id, e),
        }
    }

    fn drive(&mut self, host: &mut dyn EngineHost, sink: &mut dyn WriteSink, id: TransferId) {
        let max_redirects = self.config.max_redirects;
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };

        match transfer.advance(id, sink, max_redirects) {
            Ok(Progress::Pending) => self.settle(host, id),
            Ok(Progress::Upgraded) => {
                self.completions.push_back(Completion {
                    transfer: id,
                    outcome: Ok(101),
                });
                self.settle(host, id);
            }
            Ok(Progress::Finished(status)) => {
                debug!("Transfer {} finished with status {}", id, status);
                self.finish(host, id, Ok(status));
            }
            Ok(Progress::Redirect { location, status }) => {
                debug!("Transfer {} redirected ({}) to {}", id, status, location);
                if let Some(transfer) = self.transfers.get_mut(&id) {
                    release(&mut self.sockets, host, transfer);
                    if let Exchange::Http(exchange) = &mut transfer.exchange {
                        exchange.follow(location, status);
                    }
                }
                self.start(host, sink, id);
            }
            Err(e) => self.fail(host, id, e),
        }
    }

    /// Bring the host's view of a transfer's socket up to date.
    fn settle(&mut self, host: &mut dyn EngineHost, id: TransferId) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };

        if transfer.ws_closed() {
            if let Some(conn) = transfer.conn.as_mut() {
                conn.flush_best_effort();
            }
            release(&mut self.sockets, host, transfer);
            return;
        }

        let desired = transfer.conn.as_ref().and_then(|conn| {
            conn.socket().map(|socket| Registered {
                socket,
                generation: conn.generation(),
                interest: conn.interest(),
            })
        });

        match (transfer.registered, desired) {
            (Some(current), Some(wanted)) if current == wanted => {}
            (Some(current), Some(wanted))
                if current.socket == wanted.socket && current.generation == wanted.generation =>
            {
                host.socket(wanted.socket, SocketAction::Watch(wanted.interest));
                transfer.registered = Some(wanted);
            }
            (current, wanted) => {
                if let Some(current) = current {
                    host.socket(current.socket, SocketAction::Remove);
                    self.sockets.remove(&current.socket);
                }
                if let Some(wanted) = wanted {
                    host.socket(wanted.socket, SocketAction::Watch(wanted.interest));
                    self.sockets.insert(wanted.socket, id);
                }
                transfer.registered = wanted;
            }
        }
    }

    fn finish(&mut self, host: &mut dyn EngineHost, id: TransferId, outcome: Result<u16>) {
        if let Some(mut transfer) = self.transfers.remove(&id) {
            release(&mut self.sockets, host, &mut transfer);
        }
        self.completions.push_back(Completion {
            transfer: id,
            outcome,
        });
    }

    fn fail(&mut self, host: &mut dyn EngineHost, id: TransferId, error: TransportError) {
        let Some(transfer) = self.transfers.get_mut(&id) else {
            return;
        };

        let ws = match &mut transfer.exchange {
            Exchange::Http(_) => None,
            Exchange::WebSocket(ws) => Some(ws),
        };

        match ws {
            None => {
                warn!("Transfer {} failed: {}", id, error);
                self.finish(host, id, Err(error));
            }
            Some(ws) if ws.phase() == WsPhase::Handshake => {
                warn!("WebSocket transfer {} failed: {}", id, error);
                ws.abandon();
                release(&mut self.sockets, host, transfer);
                self.completions.push_back(Completion {
                    transfer: id,
                    outcome: Err(error),
                });
            }
            Some(ws) => {
                ws.fail(error);
                release(&mut self.sockets, host, transfer);
            }
        }
    }

    fn update_timer(&mut self, host: &mut dyn EngineHost) {
        if !self.pending.is_empty() {
            host.timer(Some(Duration::ZERO));
            return;
        }
        let now = Instant::now();
        let timeout = self
            .transfers
            .values()
            .filter_map(Transfer::next_deadline)
            .min()
            .map(|deadline| deadline.saturating_duration_since(now));
        host.timer(timeout);
    }
}

impl Engine for Multi {
    fn socket_action(
        &mut self,
        host: &mut dyn EngineHost,
        sink: &mut dyn WriteSink,
        socket: SocketId,
        readiness: Readiness,
    ) {
        let Some(&id) = self.sockets.get(&socket) else {
            trace!("No transfer owns socket {}", socket);
            return;
        };
        trace!("Socket {} ready ({:?}) for transfer {}", socket, readiness, id);
        self.drive(host, sink, id);
        self.update_timer(host);
    }

    fn timeout_action(&mut self, host: &mut dyn EngineHost, sink: &mut dyn WriteSink) {
        let pending: Vec<TransferId> = self.pending.drain(..).collect();
        for id in pending {
            self.start(host, sink, id);
        }

        let now = Instant::now();
        let expired: Vec<(TransferId, &'static str)> = self
            .transfers
            .iter()
            .filter_map(|(id, transfer)| transfer.expired(now).map(|reason| (*id, reason)))
            .collect();
        for (id, reason) in expired {
            self.fail(host, id, TransportError::Timeout(reason.to_string()));
        }

        self.update_timer(host);
    }

    fn next_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }
}
