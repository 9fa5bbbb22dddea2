//! Scripted mock gateway for end-to-end tests
//!
//! Runs on its own tokio runtime; the gateway under test runs its blocking
//! loop on the test thread.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Hello, READY + MESSAGE_CREATE after Identify, acks heartbeats
    Normal,
    /// Answers Identify with a non-resumable InvalidSession
    RejectIdentify,
    /// Like Normal, then asks the first connection to reconnect
    ReconnectAfterReady,
}

/// A message the mock received, tagged with the connection it came on
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: usize,
    pub envelope: Value,
}

pub struct MockGateway {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Received>>>,
    runtime: Runtime,
}

impl MockGateway {
    pub fn start(script: Script, heartbeat_interval: u64) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));

        let recorded = received.clone();
        runtime.spawn(async move {
            let mut connection = 0;
            while let Ok((stream, _)) = listener.accept().await {
                connection += 1;
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    Self::handle_connection(stream, connection, script, heartbeat_interval, recorded)
                        .await;
                });
            }
        });

        Self {
            addr,
            received,
            runtime,
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        connection: usize,
        script: Script,
        heartbeat_interval: u64,
        received: Arc<Mutex<Vec<Received>>>,
    ) {
        let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        let hello = json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}});
        if write.send(Message::Text(hello.to_string())).await.is_err() {
            return;
        }

        while let Some(Ok(msg)) = read.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let Ok(envelope) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            verbose_println!("mock gateway <- {}", envelope);
            let op = envelope["op"].as_u64().unwrap_or(u64::MAX);
            received.lock().unwrap().push(Received {
                connection,
                envelope,
            });

            let replies = match (op, script) {
                (2, Script::RejectIdentify) => vec![json!({"op": 9, "d": false})],
                (2, _) => {
                    let mut replies = vec![
                        json!({"op": 0, "t": "READY", "s": 1, "d": {
                            "session_id": "S1",
                            "user": {"id": "bot-user"}
                        }}),
                        json!({"op": 0, "t": "MESSAGE_CREATE", "s": 2, "d": {
                            "content": "!ping",
                            "channel_id": "c1",
                            "author": {"id": "someone"}
                        }}),
                    ];
                    if script == Script::ReconnectAfterReady && connection == 1 {
                        replies.push(json!({"op": 7, "d": null}));
                    }
                    replies
                }
                (6, _) => vec![json!({"op": 0, "t": "RESUMED", "s": 3, "d": {}})],
                (1, _) => vec![json!({"op": 11, "d": null})],
                _ => Vec::new(),
            };

            for reply in replies {
                if write.send(Message::Text(reply.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/?v=10&encoding=json", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    pub fn ops(&self) -> Vec<u64> {
        self.received()
            .iter()
            .filter_map(|r| r.envelope["op"].as_u64())
            .collect()
    }
}

/// Records each request and answers 200 with an empty JSON object
pub struct MockApi {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<(String, Vec<String>, Value)>>>,
    runtime: Runtime,
}

impl MockApi {
    pub fn start() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let listener = runtime
            .block_on(TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let recorded = requests.clone();
        runtime.spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut head = Vec::new();
                    let mut byte = [0u8; 1];
                    while !head.ends_with(b"\r\n\r\n") {
                        match stream.read(&mut byte).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => head.push(byte[0]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head).to_string();
                    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
                    let request_line = lines.next().unwrap_or_default().to_string();
                    let headers: Vec<String> = lines.map(|l| l.to_string()).collect();
                    let length = headers
                        .iter()
                        .filter_map(|h| h.split_once(':'))
                        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    let mut body = vec![0u8; length];
                    if stream.read_exact(&mut body).await.is_err() {
                        return;
                    }
                    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
                    recorded.lock().unwrap().push((request_line, headers, body));

                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            runtime,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/api/v10", self.addr)
    }

    pub fn requests(&self) -> Vec<(String, Vec<String>, Value)> {
        self.requests.lock().unwrap().clone()
    }
}
