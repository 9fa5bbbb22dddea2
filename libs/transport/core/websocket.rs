//! WebSocket session state
//!
//! ```text
//!            ws_open                 upgrade ok
//! Closed ─────────────> Connecting ─────────────> Open
//!   ^                        │                      │
//!   └────── ws_close / upgrade failure / receive error
//! ```
//!
//! Transitions queue [`WsEvent`]s which the transport delivers to the
//! handler during `poll`: one `Connected` per Open transition, one
//! `Disconnected` each time the session leaves Connecting or Open.

use crate::core::buffer::{AllocationFailure, GrowableBuffer};
use crate::traits::TransferId;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Closed,
    Connecting,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEvent {
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct WsSession {
    state: WsState,
    transfer: Option<TransferId>,
    url: Option<String>,
    message: GrowableBuffer,
    events: VecDeque<WsEvent>,
}

impl Default for WsSession {
    fn default() -> Self {
        Self::new()
    }
}

impl WsSession {
    pub fn new() -> Self {
        Self {
            state: WsState::Closed,
            transfer: None,
            url: None,
            message: GrowableBuffer::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> WsState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == WsState::Open
    }

    pub fn transfer(&self) -> Option<TransferId> {
        self.transfer
    }

    /// URL of the current or most recent connection attempt
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// A connection attempt has been handed to the engine
    pub fn begin(&mut self, transfer: TransferId, url: &str) {
        self.state = WsState::Connecting;
        self.transfer = Some(transfer);
        self.url = Some(url.to_string());
        self.message.clear();
    }

    /// Upgrade finished; returns false if the session was not waiting for it
    pub fn handshake_succeeded(&mut self) -> bool {
        if self.state != WsState::Connecting {
            return false;
        }
        self.state = WsState::Open;
        self.events.push_back(WsEvent::Connected);
        true
    }

    /// Move to Closed, returning the transfer the engine must release
    pub fn close(&mut self) -> Option<TransferId> {
        if self.state != WsState::Closed {
            self.events.push_back(WsEvent::Disconnected);
        }
        self.state = WsState::Closed;
        self.message.clear();
        self.transfer.take()
    }

    /// Append a data frame's payload to the message being assembled
    pub fn accumulate(&mut self, payload: &[u8]) -> Result<(), AllocationFailure> {
        self.message.append(payload)
    }

    pub fn message_len(&self) -> usize {
        self.message.len()
    }

    /// Take the assembled message out for delivery
    pub fn take_message(&mut self) -> GrowableBuffer {
        std::mem::take(&mut self.message)
    }

    /// Give the delivered message's buffer back, emptied, keeping its capacity
    pub fn restore_message(&mut self, mut buffer: GrowableBuffer) {
        buffer.clear();
        if buffer.capacity() >= self.message.capacity() {
            self.message = buffer;
        }
    }

    pub fn next_event(&mut self) -> Option<WsEvent> {
        self.events.pop_front()
    }
}
