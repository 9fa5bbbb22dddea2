//! Common test utilities for transport integration tests
//!
//! The transport is single-threaded and blocks inside `poll`, so every mock
//! server runs on its own multi-threaded tokio runtime while the test thread
//! drives the reactor.

#![allow(dead_code)]

use muse_transport::{Transport, TransportConfig, WsHandler};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

pub fn transport() -> Transport {
    Transport::new(TransportConfig::new("muse-test/1.0")).unwrap()
}

/// Poll until `done` holds or five seconds pass; returns whether it held
pub fn poll_until<H, F>(transport: &mut Transport, handler: &mut H, mut done: F) -> bool
where
    H: WsHandler,
    F: FnMut(&Transport, &H) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done(transport, handler) {
            return true;
        }
        transport
            .poll(handler, Duration::from_millis(20))
            .unwrap();
    }
    done(transport, handler)
}

/// Poll for a fixed duration
pub fn poll_for<H: WsHandler>(transport: &mut Transport, handler: &mut H, duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        transport
            .poll(handler, Duration::from_millis(10))
            .unwrap();
    }
}

/// Handler recording every notification
#[derive(Default)]
pub struct Recorder {
    pub connects: usize,
    pub disconnects: usize,
    pub messages: Vec<Vec<u8>>,
}

impl Recorder {
    pub fn texts(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| String::from_utf8_lossy(m).to_string())
            .collect()
    }
}

impl WsHandler for Recorder {
    fn on_connect(&mut self, _transport: &mut Transport) {
        verbose_println!("connected");
        self.connects += 1;
    }

    fn on_disconnect(&mut self, _transport: &mut Transport) {
        verbose_println!("disconnected");
        self.disconnects += 1;
    }

    fn on_message(&mut self, _transport: &mut Transport, message: &[u8]) {
        verbose_println!("message: {}", String::from_utf8_lossy(message));
        self.messages.push(message.to_vec());
    }
}

// ==================== WebSocket echo server ====================

/// A mock WebSocket server echoing data messages
///
/// The text message `close-me` makes the server send a Close frame instead.
pub struct MockWsServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    shutdown: Arc<Notify>,
    runtime: Runtime,
}

impl MockWsServer {
    pub fn start() -> Self {
        let runtime = runtime();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));

        let shutdown_clone = shutdown.clone();
        let received_clone = received.clone();
        let connections_clone = connections.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                *connections_clone.lock().unwrap() += 1;
                                let shutdown = shutdown_clone.clone();
                                let received = received_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown, received).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            received,
            connections,
            shutdown,
            runtime,
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        shutdown: Arc<Notify>,
        received: Arc<Mutex<Vec<String>>>,
    ) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;
        use tokio_tungstenite::tungstenite::Message;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if let Message::Text(text) = &msg {
                                received.lock().unwrap().push(text.clone());
                                if text == "close-me" {
                                    let _ = write.send(Message::Close(None)).await;
                                    continue;
                                }
                            }
                            if msg.is_text() || msg.is_binary() {
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Text messages received so far, across all connections
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ==================== Scripted WebSocket server ====================

/// Unmasked server frame
pub fn server_frame(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![if fin { 0x80 | opcode } else { opcode }];
    let len = payload.len();
    if len < 126 {
        frame.push(len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

/// Remove the client mask from a frame, returning (first byte, payload)
pub fn unmask_client_frame(bytes: &[u8]) -> Option<(u8, Vec<u8>)> {
    if bytes.len() < 2 || bytes[1] & 0x80 == 0 {
        return None;
    }
    let (len, offset) = match bytes[1] & 0x7f {
        126 if bytes.len() >= 4 => (u16::from_be_bytes([bytes[2], bytes[3]]) as usize, 4),
        127 if bytes.len() >= 10 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[2..10]);
            (u64::from_be_bytes(raw) as usize, 10)
        }
        126 | 127 => return None,
        len => (len as usize, 2),
    };
    if bytes.len() < offset + 4 + len {
        return None;
    }
    let mask = &bytes[offset..offset + 4];
    let payload = bytes[offset + 4..offset + 4 + len]
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ mask[i % 4])
        .collect();
    Some((bytes[0], payload))
}

/// Completes the upgrade by hand, writes raw chunks with short pauses,
/// then records whatever the client sends until it disconnects.
pub struct ScriptedWsServer {
    pub addr: SocketAddr,
    from_client: Arc<Mutex<Vec<u8>>>,
    runtime: Runtime,
}

impl ScriptedWsServer {
    pub fn start(script: Vec<Vec<u8>>) -> Self {
        let runtime = runtime();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let from_client = Arc::new(Mutex::new(Vec::new()));

        let recorded = from_client.clone();
        runtime.spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };

            let head = read_head(&mut stream).await;
            let key = header_value(&head, "sec-websocket-key").unwrap_or_default();
            let accept = tungstenite::handshake::derive_accept_key(key.as_bytes());
            let response = format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
                accept
            );
            if stream.write_all(response.as_bytes()).await.is_err() {
                return;
            }

            for chunk in script {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if stream.write_all(&chunk).await.is_err() {
                    return;
                }
            }

            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => recorded.lock().unwrap().extend_from_slice(&buf[..n]),
                }
            }
        });

        Self {
            addr,
            from_client,
            runtime,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Raw bytes the client sent after the upgrade
    pub fn from_client(&self) -> Vec<u8> {
        self.from_client.lock().unwrap().clone()
    }
}

// ==================== HTTP server ====================

/// A request as seen by the mock HTTP server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Responder = Arc<dyn Fn(&RecordedRequest) -> Vec<u8> + Send + Sync>;

/// Canned response with a Content-Length body
pub fn response(status: u16, reason: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

/// A mock HTTP/1.1 server answering every connection through a responder
pub struct MockHttpServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown: Arc<Notify>,
    runtime: Runtime,
}

impl MockHttpServer {
    pub fn start<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        let responder: Responder = Arc::new(responder);
        let runtime = runtime();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(Notify::new());

        let requests_clone = requests.clone();
        let shutdown_clone = shutdown.clone();
        runtime.spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        let responder = responder.clone();
                        let requests = requests_clone.clone();
                        tokio::spawn(async move {
                            Self::handle_connection(stream, responder, requests).await;
                        });
                    }
                    _ = shutdown_clone.notified() => break,
                }
            }
        });

        Self {
            addr,
            requests,
            shutdown,
            runtime,
        }
    }

    async fn handle_connection(
        mut stream: TcpStream,
        responder: Responder,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    ) {
        let head = read_head(&mut stream).await;
        if head.is_empty() {
            return;
        }

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default().to_string();
        let mut parts = request_line.split(' ');
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        if length > 0 && stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let request = RecordedRequest {
            method,
            target,
            headers,
            body,
        };
        let reply = responder(&request);
        requests.lock().unwrap().push(request);

        let _ = stream.write_all(&reply).await;
        let _ = stream.shutdown().await;
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

/// Read up to and including the blank line ending a request head
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) => head.push(byte[0]),
        }
    }
    String::from_utf8_lossy(&head).to_string()
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim().to_string())
}
