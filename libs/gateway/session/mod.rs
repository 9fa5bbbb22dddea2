//! Gateway protocol state machine
//!
//! State is kept as three facts rather than one enum: whether the link is
//! open (asked of the link), whether a session id is known, and whether a
//! heartbeat interval is set.
//!
//! | Opcode | Action |
//! |---|---|
//! | Hello | arm heartbeat, send Heartbeat, then Identify (no session) or Resume |
//! | HeartbeatAck | nothing |
//! | Heartbeat | send Heartbeat now |
//! | Reconnect | close the link |
//! | InvalidSession | resume, halt (never identified) or forget the session and close |
//! | Dispatch | capture READY fields, forward to the handler |
//!
//! Every envelope carrying `s` updates the last sequence before any of the
//! above runs. [`GatewaySession::tick`] reopens a dropped link at a fixed
//! interval and sends heartbeats when due. Time is always passed in so the
//! machine is deterministic under test.

mod handler;
mod link;

pub use handler::{DispatchHandler, DispatchRouter};
pub use link::GatewayLink;

use crate::domain::{ConnectionProperties, Envelope, Hello, Identify, OpCode, Ready, Resume};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Minimum spacing between connection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(5000);

/// A dispatch event to forward to the collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub event: String,
    pub data: Value,
}

pub struct GatewaySession {
    token: String,
    intents: u64,
    properties: ConnectionProperties,
    gateway_url: String,
    last_sequence: Option<u64>,
    session_id: Option<String>,
    user_id: Option<String>,
    heartbeat_interval: Option<Duration>,
    next_heartbeat: Option<Instant>,
    last_reconnect_attempt: Option<Instant>,
    reconnect_interval: Duration,
    running: bool,
}

impl GatewaySession {
    pub fn new(
        token: impl Into<String>,
        intents: u64,
        properties: ConnectionProperties,
        gateway_url: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            intents,
            properties,
            gateway_url: gateway_url.into(),
            last_sequence: None,
            session_id: None,
            user_id: None,
            heartbeat_interval: None,
            next_heartbeat: None,
            last_reconnect_attempt: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            running: true,
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    // ==================== Accessors ====================

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Our own user id, learned from READY
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    pub fn next_heartbeat_deadline(&self) -> Option<Instant> {
        self.next_heartbeat
    }

    /// False once the gateway rejected our Identify
    pub fn is_running(&self) -> bool {
        self.running
    }

    // ==================== Inbound ====================

    /// Decode and handle one WebSocket message.
    ///
    /// Undecodable messages are logged and dropped.
    pub fn handle_message<L: GatewayLink + ?Sized>(
        &mut self,
        link: &mut L,
        raw: &[u8],
        now: Instant,
    ) -> Option<Dispatch> {
        match Envelope::decode(raw) {
            Ok(envelope) => self.handle_envelope(link, envelope, now),
            Err(e) => {
                warn!("Dropping gateway message: {}", e);
                None
            }
        }
    }

    pub fn handle_envelope<L: GatewayLink + ?Sized>(
        &mut self,
        link: &mut L,
        envelope: Envelope,
        now: Instant,
    ) -> Option<Dispatch> {
        if let Some(seq) = envelope.s {
            self.last_sequence = Some(seq);
        }

        let Some(op) = envelope.opcode() else {
            warn!("Ignoring unknown gateway opcode {}", envelope.op);
            return None;
        };

        match op {
            OpCode::Hello => {
                self.on_hello(link, &envelope.d, now);
                None
            }
            OpCode::HeartbeatAck => {
                debug!("Heartbeat acknowledged");
                None
            }
            OpCode::Heartbeat => {
                debug!("Server requested a heartbeat");
                self.send_heartbeat(link);
                None
            }
            OpCode::Reconnect => {
                info!("Gateway requested reconnect");
                link.close();
                None
            }
            OpCode::InvalidSession => {
                self.on_invalid_session(link, envelope.d.as_bool().unwrap_or(false));
                None
            }
            OpCode::Dispatch => self.on_dispatch(envelope.t, envelope.d),
            OpCode::Identify | OpCode::Resume => {
                warn!("Ignoring client-only opcode {:?} from gateway", op);
                None
            }
        }
    }

    fn on_hello<L: GatewayLink + ?Sized>(&mut self, link: &mut L, data: &Value, now: Instant) {
        let hello: Hello = match serde_json::from_value(data.clone()) {
            Ok(hello) => hello,
            Err(e) => {
                warn!("Dropping malformed Hello: {}", e);
                return;
            }
        };

        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.heartbeat_interval = Some(interval);
        self.next_heartbeat = Some(now + interval);
        info!("Hello received, heartbeat every {:?}", interval);

        self.send_heartbeat(link);
        match self.session_id.clone() {
            None => self.send_identify(link),
            Some(session_id) => self.send_resume(link, session_id),
        }
    }

    fn on_invalid_session<L: GatewayLink + ?Sized>(&mut self, link: &mut L, resumable: bool) {
        match self.session_id.clone() {
            Some(session_id) if resumable => {
                info!("Session invalidated but resumable, resuming");
                self.send_resume(link, session_id);
            }
            None => {
                error!("Gateway rejected Identify, check token and intents");
                self.running = false;
                link.close();
            }
            Some(_) => {
                warn!("Session invalidated, will identify again on reconnect");
                self.session_id = None;
                self.last_sequence = None;
                link.close();
            }
        }
    }

    fn on_dispatch(&mut self, event: Option<String>, data: Value) -> Option<Dispatch> {
        let Some(event) = event else {
            warn!("Dispatch without an event type");
            return None;
        };

        if event.eq_ignore_ascii_case("READY") {
            match serde_json::from_value::<Ready>(data.clone()) {
                Ok(ready) => {
                    info!("Session ready: {}", ready.session_id);
                    self.session_id = Some(ready.session_id);
                    if let Some(url) = ready.resume_gateway_url {
                        self.gateway_url = url;
                    }
                    if let Some(user) = ready.user {
                        self.user_id = Some(user.id);
                    }
                }
                Err(e) => warn!("READY payload incomplete: {}", e),
            }
        }

        Some(Dispatch { event, data })
    }

    // ==================== Per tick ====================

    /// Reconnect when the link is down, heartbeat when one is due.
    pub fn tick<L: GatewayLink + ?Sized>(&mut self, link: &mut L, now: Instant) {
        if !self.running {
            return;
        }

        if !link.is_open() {
            let due = self
                .last_reconnect_attempt
                .map_or(true, |last| now.duration_since(last) >= self.reconnect_interval);
            if due {
                self.last_reconnect_attempt = Some(now);
                self.heartbeat_interval = None;
                self.next_heartbeat = None;
                info!("Connecting to gateway {}", self.gateway_url);
                if let Err(e) = link.open(&self.gateway_url) {
                    warn!("Gateway connect failed: {}", e);
                }
            }
            return;
        }

        if let (Some(interval), Some(deadline)) = (self.heartbeat_interval, self.next_heartbeat) {
            if now >= deadline {
                self.send_heartbeat(link);
                self.next_heartbeat = Some(deadline + interval);
            }
        }
    }

    // ==================== Outbound ====================

    fn send_heartbeat<L: GatewayLink + ?Sized>(&mut self, link: &mut L) {
        debug!("Sending heartbeat (seq {:?})", self.last_sequence);
        self.send(link, Envelope::heartbeat(self.last_sequence));
    }

    fn send_identify<L: GatewayLink + ?Sized>(&mut self, link: &mut L) {
        let identify = Identify {
            token: self.token.clone(),
            properties: self.properties.clone(),
            intents: self.intents,
        };
        info!("Identifying with intents {}", self.intents);
        match Envelope::identify(&identify) {
            Ok(envelope) => self.send(link, envelope),
            Err(e) => error!("Failed to build Identify: {}", e),
        }
    }

    fn send_resume<L: GatewayLink + ?Sized>(&mut self, link: &mut L, session_id: String) {
        let resume = Resume {
            token: self.token.clone(),
            session_id,
            seq: self.last_sequence,
        };
        info!("Resuming session {} at seq {:?}", resume.session_id, resume.seq);
        match Envelope::resume(&resume) {
            Ok(envelope) => self.send(link, envelope),
            Err(e) => error!("Failed to build Resume: {}", e),
        }
    }

    fn send<L: GatewayLink + ?Sized>(&self, link: &mut L, envelope: Envelope) {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode op {}: {}", envelope.op, e);
                return;
            }
        };
        if let Err(e) = link.send_text(&text) {
            warn!("Failed to send op {}: {}", envelope.op, e);
        }
    }
}
