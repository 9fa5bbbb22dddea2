//! Non-blocking client connection (TCP, optionally wrapped in TLS).
//!
//! ```text
//! Connecting ──(writable, connected)──> Handshaking ──> Ready
//!      │                                   (TLS only)
//!      └──(connect error)──> next resolved address, or fail
//! ```
//!
//! Each call to [`Conn::drive`] advances the connection as far as it can
//! without blocking: it completes the connect, steps the TLS handshake,
//! flushes queued output and reads until the socket would block. The
//! reactor is edge-triggered, so stopping before `WouldBlock` would lose
//! readiness.

use crate::traits::{Readiness, SocketId};
use crate::{Result, TransportError};
use mio::net::TcpStream;
use native_tls::{HandshakeError, MidHandshakeTlsStream, TlsConnector, TlsStream};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use tracing::{debug, trace};
use url::{Host, Url};

const READ_CHUNK: usize = 16 * 1024;

/// Where to connect, derived from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Endpoint {
    /// Endpoint for an `http`/`https` URL.
    pub(crate) fn for_http(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" => Self::from_url(url, false),
            "https" => Self::from_url(url, true),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Endpoint for a `ws`/`wss` URL.
    pub(crate) fn for_websocket(url: &Url) -> Result<Self> {
        match url.scheme() {
            "ws" => Self::from_url(url, false),
            "wss" => Self::from_url(url, true),
            other => Err(TransportError::UnsupportedScheme(other.to_string())),
        }
    }

    fn from_url(url: &Url, tls: bool) -> Result<Self> {
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(TransportError::InvalidUrl(format!("{}: missing host", url))),
        };
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl(format!("{}: missing port", url)))?;
        Ok(Self { host, port, tls })
    }
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Stream {
    fn socket(&self) -> SocketId {
        match self {
            Stream::Plain(stream) => stream.as_raw_fd(),
            Stream::Tls(stream) => stream.get_ref().as_raw_fd(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

enum Phase {
    Connecting(TcpStream),
    Handshaking(MidHandshakeTlsStream<TcpStream>),
    Ready(Stream),
    Closed,
}

pub(crate) struct Conn {
    endpoint: Endpoint,
    addrs: VecDeque<SocketAddr>,
    phase: Phase,
    /// Bumped whenever the underlying socket is replaced
    generation: u64,
    outbound: Vec<u8>,
    pub(crate) inbound: Vec<u8>,
    eof: bool,
    last_error: Option<String>,
}

impl Conn {
    /// Resolve the endpoint and start a non-blocking connect.
    ///
    /// Resolution uses the system resolver and blocks the calling thread.
    pub(crate) fn connect(endpoint: Endpoint) -> Result<Self> {
        let addrs: VecDeque<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve {
                host: endpoint.host.clone(),
                reason: e.to_string(),
            })?
            .collect();

        if addrs.is_empty() {
            return Err(TransportError::Resolve {
                host: endpoint.host.clone(),
                reason: "no addresses found".to_string(),
            });
        }

        let mut conn = Self {
            endpoint,
            addrs,
            phase: Phase::Closed,
            generation: 0,
            outbound: Vec::new(),
            inbound: Vec::new(),
            eof: false,
            last_error: None,
        };
        conn.connect_next()?;
        Ok(conn)
    }

    fn connect_next(&mut self) -> Result<()> {
        while let Some(addr) = self.addrs.pop_front() {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    trace!("Connecting to {} ({})", addr, self.endpoint.host);
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!("Failed to set TCP_NODELAY: {}", e);
                    }
                    self.phase = Phase::Connecting(stream);
                    self.generation += 1;
                    return Ok(());
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    self.last_error = Some(format!("{}: {}", addr, e));
                }
            }
        }

        self.phase = Phase::Closed;
        Err(TransportError::Connect(format!(
            "{}:{} ({})",
            self.endpoint.host,
            self.endpoint.port,
            self.last_error
                .take()
                .unwrap_or_else(|| "no addresses left".to_string())
        )))
    }

    pub(crate) fn socket(&self) -> Option<SocketId> {
        match &self.phase {
            Phase::Connecting(stream) => Some(stream.as_raw_fd()),
            Phase::Handshaking(mid) => Some(mid.get_ref().as_raw_fd()),
            Phase::Ready(stream) => Some(stream.socket()),
            Phase::Closed => None,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Readiness the connection currently needs to make progress.
    pub(crate) fn interest(&self) -> Readiness {
        match &self.phase {
            Phase::Connecting(_) => Readiness::WRITABLE,
            Phase::Handshaking(_) => Readiness::BOTH,
            Phase::Ready(_) => Readiness {
                readable: true,
                writable: !self.outbound.is_empty(),
            },
            Phase::Closed => Readiness::NONE,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Queue bytes; they are written once the connection is ready.
    pub(crate) fn queue(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
    }

    /// Advance connect and TLS, then flush output and read available input.
    pub(crate) fn drive(&mut self) -> Result<()> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Closed) {
                Phase::Connecting(stream) => match connect_state(&stream) {
                    Ok(true) => {
                        trace!("Connected to {}", self.endpoint.host);
                        if self.endpoint.tls {
                            let connector = TlsConnector::new()
                                .map_err(|e| TransportError::Tls(e.to_string()))?;
                            let handshake = connector.connect(&self.endpoint.host, stream);
                            if !self.on_handshake(handshake)? {
                                return Ok(());
                            }
                        } else {
                            self.phase = Phase::Ready(Stream::Plain(stream));
                        }
                    }
                    Ok(false) => {
                        self.phase = Phase::Connecting(stream);
                        return Ok(());
                    }
                    Err(e) => {
                        debug!("Connect to {} failed: {}", self.endpoint.host, e);
                        self.last_error = Some(e.to_string());
                        drop(stream);
                        return self.connect_next();
                    }
                },
                Phase::Handshaking(mid) => {
                    if !self.on_handshake(mid.handshake())? {
                        return Ok(());
                    }
                }
                Phase::Ready(mut stream) => {
                    let result = self.pump(&mut stream);
                    self.phase = Phase::Ready(stream);
                    return result;
                }
                Phase::Closed => {
                    return Err(TransportError::ConnectionClosed(
                        "connection is closed".to_string(),
                    ))
                }
            }
        }
    }

    /// Write queued output without reading.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if let Phase::Ready(stream) = &mut self.phase {
            write_all_available(stream, &mut self.outbound)?;
        }
        Ok(())
    }

    /// Write queued output and ignore failures; used right before dropping.
    pub(crate) fn flush_best_effort(&mut self) {
        if let Err(e) = self.flush() {
            trace!("Final flush to {} failed: {}", self.endpoint.host, e);
        }
    }

    /// Returns true when the handshake finished and the stream is ready.
    fn on_handshake(
        &mut self,
        result: std::result::Result<TlsStream<TcpStream>, HandshakeError<TcpStream>>,
    ) -> Result<bool> {
        match result {
            Ok(stream) => {
                trace!("TLS established with {}", self.endpoint.host);
                self.phase = Phase::Ready(Stream::Tls(Box::new(stream)));
                Ok(true)
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                self.phase = Phase::Handshaking(mid);
                Ok(false)
            }
            Err(HandshakeError::Failure(e)) => Err(TransportError::Tls(e.to_string())),
        }
    }

    fn pump(&mut self, stream: &mut Stream) -> Result<()> {
        write_all_available(stream, &mut self.outbound)?;

        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match stream.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // TLS peers that skip close_notify
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => self.eof = true,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn write_all_available(stream: &mut Stream, outbound: &mut Vec<u8>) -> Result<()> {
    let mut written = 0;
    let result = loop {
        if written == outbound.len() {
            break Ok(());
        }
        match stream.write(&outbound[written..]) {
            Ok(0) => {
                break Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted no bytes",
                )))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e.into()),
        }
    };
    outbound.drain(..written);
    if result.is_ok() && outbound.is_empty() {
        if let Err(e) = stream.flush() {
            if e.kind() != io::ErrorKind::WouldBlock {
                return Err(e.into());
            }
        }
    }
    result
}

/// Whether a non-blocking connect has finished.
fn connect_state(stream: &TcpStream) -> io::Result<bool> {
    if let Some(err) = stream.take_error()? {
        return Err(err);
    }
    match stream.peer_addr() {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}
