//! Gateway wire envelope
//!
//! ```text
//! {"op": <int>, "d": <any|null>, "s": <int|null>, "t": <string|null>}
//! ```
//!
//! Outbound envelopes always carry `d` (null when there is no payload) and
//! never carry `s` or `t`.

use crate::domain::opcode::OpCode;
use crate::domain::payloads::{Identify, Resume};
use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    /// Decode one WebSocket message; failures become `GatewayError::Protocol`
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    /// Compact JSON text for sending
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| GatewayError::Protocol(e.to_string()))
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_u8(self.op)
    }

    fn outbound(op: OpCode, d: Value) -> Self {
        Self {
            op: op.as_u8(),
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last sequence number, or null before any
    pub fn heartbeat(last_sequence: Option<u64>) -> Self {
        Self::outbound(
            OpCode::Heartbeat,
            last_sequence.map(Value::from).unwrap_or(Value::Null),
        )
    }

    pub fn identify(payload: &Identify) -> Result<Self> {
        let d = serde_json::to_value(payload).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        Ok(Self::outbound(OpCode::Identify, d))
    }

    pub fn resume(payload: &Resume) -> Result<Self> {
        let d = serde_json::to_value(payload).map_err(|e| GatewayError::Protocol(e.to_string()))?;
        Ok(Self::outbound(OpCode::Resume, d))
    }
}
