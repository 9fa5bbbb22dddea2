//! Transport: reactor + engine + requests + WebSocket session
//!
//! # One tick
//!
//! ```text
//! poll(handler, default_timeout)
//!   1. Reactor::poll          wait for readiness, drive the engine
//!   2. completions            WS upgrade result / request callbacks,
//!                             then a zero-elapsed timer kick, repeated
//!                             while callbacks keep producing work
//!   3. notifications          on_connect / on_disconnect
//!   4. WS frames              reassembled into messages → on_message
//!   5. notifications          anything queued during step 4
//! ```
//!
//! Everything runs on the calling thread. Handlers and request callbacks
//! receive `&mut Transport` and may issue requests, send frames, or open and
//! close the WebSocket from inside the tick.

use crate::core::config::TransportConfig;
use crate::core::reactor::Reactor;
use crate::core::request::{HttpResponse, Request, RequestId, RequestTable};
use crate::core::websocket::{WsEvent, WsSession, WsState};
use crate::engine::{Data, Frame, Multi, OpCode, RequestSpec};
use crate::traits::{Completion, Engine, WsHandler};
use crate::{Result, TransportError};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on completion/timer rounds within one tick
const MAX_KICK_ROUNDS: usize = 16;

pub struct Transport {
    reactor: Reactor,
    engine: Multi,
    requests: RequestTable,
    ws: WsSession,
    user_agent: String,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Result<Self> {
        Ok(Self {
            reactor: Reactor::new()?,
            engine: Multi::new(config.engine_config()),
            requests: RequestTable::default(),
            ws: WsSession::new(),
            user_agent: config.user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Run one reactor tick and deliver everything it produced.
    pub fn poll<H: WsHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        default_timeout: Duration,
    ) -> Result<()> {
        self.reactor
            .poll(&mut self.engine, &mut self.requests, default_timeout)?;

        self.process_completions();
        self.flush_ws_events(handler);
        self.drain_ws_messages(handler);
        self.flush_ws_events(handler);
        Ok(())
    }

    // ==================== HTTP ====================

    /// Issue a GET; `callback` runs once when the request finishes.
    pub fn http_get<F>(&mut self, url: &str, callback: F) -> Result<RequestId>
    where
        F: FnOnce(&mut Transport, HttpResponse<'_>) + 'static,
    {
        let spec = RequestSpec::get(parse_url(url)?);
        self.issue(spec, Box::new(callback))
    }

    /// Issue a POST with a copied body, `Content-Type` and extra headers.
    pub fn http_post<F>(
        &mut self,
        url: &str,
        body: &[u8],
        content_type: &str,
        extra_headers: &[(&str, &str)],
        callback: F,
    ) -> Result<RequestId>
    where
        F: FnOnce(&mut Transport, HttpResponse<'_>) + 'static,
    {
        let spec = RequestSpec::post(parse_url(url)?, body, content_type, extra_headers);
        self.issue(spec, Box::new(callback))
    }

    /// POST a value serialized as JSON.
    pub fn http_post_json<T, F>(
        &mut self,
        url: &str,
        value: &T,
        extra_headers: &[(&str, &str)],
        callback: F,
    ) -> Result<RequestId>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&mut Transport, HttpResponse<'_>) + 'static,
    {
        let body = serde_json::to_vec(value)?;
        self.http_post(url, &body, "application/json", extra_headers, callback)
    }

    /// Requests issued and not yet completed
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    fn issue(
        &mut self,
        spec: RequestSpec,
        callback: Box<dyn FnOnce(&mut Transport, HttpResponse<'_>)>,
    ) -> Result<RequestId> {
        let id = self.engine.add_http(&mut self.reactor, spec)?;
        self.requests.insert(id, Request::new(callback));
        Ok(id)
    }

    // ==================== WebSocket ====================

    /// Start connecting; an existing session is closed first.
    pub fn ws_open(&mut self, url: &str) -> Result<()> {
        self.ws_close();

        let parsed = parse_url(url)?;
        let id = self.engine.add_websocket(&mut self.reactor, parsed)?;
        self.ws.begin(id, url);
        info!("Opening WebSocket to {}", url);

        // Kick the engine so the connect starts without waiting for a tick
        self.engine.timeout_action(&mut self.reactor, &mut self.requests);
        Ok(())
    }

    /// Close the session; a disconnect notification is queued if it was active.
    pub fn ws_close(&mut self) {
        if let Some(id) = self.ws.close() {
            debug!("Closing WebSocket transfer {}", id);
            self.engine.remove(&mut self.reactor, id);
        }
    }

    /// Send `data` as a text message.
    pub fn ws_send(&mut self, data: &[u8]) -> Result<()> {
        self.send_frame(Data::Text, data)
    }

    /// Send `data` as a binary message.
    pub fn ws_send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send_frame(Data::Binary, data)
    }

    /// Serialize `value` and send it as a text message.
    pub fn ws_send_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        self.ws_send(&payload)
    }

    pub fn is_ws_open(&self) -> bool {
        self.ws.is_open()
    }

    pub fn ws_state(&self) -> WsState {
        self.ws.state()
    }

    fn send_frame(&mut self, kind: Data, data: &[u8]) -> Result<()> {
        let Some(id) = self.ws.transfer().filter(|_| self.ws.is_open()) else {
            return Err(TransportError::NotConnected);
        };
        let frame = Frame::message(data.to_vec(), OpCode::Data(kind), true);
        self.engine.ws_send(&mut self.reactor, id, frame)
    }

    // ==================== Teardown ====================

    /// Close the session and abandon in-flight requests without callbacks.
    pub fn shutdown(&mut self) {
        self.ws_close();
        let abandoned = self.requests.drain_ids();
        if !abandoned.is_empty() {
            debug!("Abandoning {} in-flight requests", abandoned.len());
        }
        for id in abandoned {
            self.engine.remove(&mut self.reactor, id);
        }
    }

    // ==================== Tick internals ====================

    fn process_completions(&mut self) {
        for _ in 0..MAX_KICK_ROUNDS {
            let mut handled = 0;
            while let Some(completion) = self.engine.next_completion() {
                handled += 1;
                self.complete(completion);
            }

            // Start whatever the callbacks issued before the next wait
            self.engine
                .timeout_action(&mut self.reactor, &mut self.requests);

            if handled == 0 {
                break;
            }
        }
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { transfer, outcome } = completion;

        if self.ws.transfer() == Some(transfer) {
            match outcome {
                Ok(_) => {
                    if self.ws.handshake_succeeded() {
                        info!("WebSocket connected");
                    }
                }
                Err(e) => {
                    warn!("WebSocket connection failed: {}", e);
                    self.ws_close();
                }
            }
            return;
        }

        let Some(request) = self.requests.take(transfer) else {
            debug!("Completion for unknown transfer {}", transfer);
            return;
        };

        let (outcome, status) = match outcome {
            Ok(status) => (Ok(()), status),
            Err(e) => (Err(e), 0),
        };
        debug!(
            "Request {} completed (status {}) in {:?}",
            transfer,
            status,
            request.issued_at.elapsed()
        );

        let Request {
            response, callback, ..
        } = request;
        callback(
            self,
            HttpResponse {
                outcome,
                status,
                body: response.as_slice(),
            },
        );
    }

    fn flush_ws_events<H: WsHandler + ?Sized>(&mut self, handler: &mut H) {
        while let Some(event) = self.ws.next_event() {
            match event {
                WsEvent::Connected => handler.on_connect(self),
                WsEvent::Disconnected => handler.on_disconnect(self),
            }
        }
    }

    fn drain_ws_messages<H: WsHandler + ?Sized>(&mut self, handler: &mut H) {
        while self.ws.is_open() {
            let Some(id) = self.ws.transfer() else {
                break;
            };
            let frame = match self.engine.ws_recv(id) {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("WebSocket receive failed: {}", e);
                    self.ws_close();
                    break;
                }
            };

            if let Err(e) = self.ws.accumulate(frame.payload()) {
                warn!("Dropping WebSocket session: {}", e);
                self.ws_close();
                break;
            }

            if !frame.header().is_final {
                continue;
            }
            if self.ws.message_len() == 0 {
                continue;
            }

            let message = self.ws.take_message();
            handler.on_message(self, message.as_slice());
            self.ws.restore_message(message);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{}: {}", url, e)))
}
