//! Request lifecycle
//!
//! Each in-flight HTTP request owns a response buffer and a completion
//! callback. The engine writes body bytes into the buffer through
//! [`WriteSink`]; when the transfer finishes the request is taken out of the
//! table, its callback runs exactly once, and everything it owns is dropped.

use crate::core::buffer::GrowableBuffer;
use crate::traits::{TransferId, WriteSink};
use crate::{Transport, TransportError};
use std::collections::HashMap;
use std::time::Instant;
use tracing::warn;

/// Identifier returned when a request is issued
pub type RequestId = TransferId;

/// Completion callback; receives the transport so it may issue follow-ups
pub type RequestCallback = Box<dyn FnOnce(&mut Transport, HttpResponse<'_>)>;

/// Result of a finished request, valid for the duration of the callback
#[derive(Debug)]
pub struct HttpResponse<'a> {
    /// `Ok` when the exchange completed, whatever the status code
    pub outcome: Result<(), TransportError>,
    /// Final status code, 0 when no response head was received
    pub status: u16,
    /// Accumulated body of the final response
    pub body: &'a [u8],
}

impl HttpResponse<'_> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok() && (200..300).contains(&self.status)
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.body)
    }

    /// Parse the body as JSON
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_slice(self.body)?)
    }
}

pub(crate) struct Request {
    pub(crate) response: GrowableBuffer,
    pub(crate) callback: RequestCallback,
    pub(crate) issued_at: Instant,
}

impl Request {
    pub(crate) fn new(callback: RequestCallback) -> Self {
        Self {
            response: GrowableBuffer::new(),
            callback,
            issued_at: Instant::now(),
        }
    }
}

/// In-flight requests keyed by transfer
#[derive(Default)]
pub(crate) struct RequestTable {
    requests: HashMap<RequestId, Request>,
}

impl RequestTable {
    pub(crate) fn insert(&mut self, id: RequestId, request: Request) {
        self.requests.insert(id, request);
    }

    pub(crate) fn take(&mut self, id: RequestId) -> Option<Request> {
        self.requests.remove(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    /// Drop every request without running callbacks
    pub(crate) fn drain_ids(&mut self) -> Vec<RequestId> {
        let ids = self.requests.keys().copied().collect();
        self.requests.clear();
        ids
    }
}

impl WriteSink for RequestTable {
    fn write(&mut self, transfer: TransferId, chunk: &[u8]) -> usize {
        let Some(request) = self.requests.get_mut(&transfer) else {
            return 0;
        };
        match request.response.append(chunk) {
            Ok(()) => chunk.len(),
            Err(e) => {
                warn!("Request {} response buffer: {}", transfer, e);
                0
            }
        }
    }
}
