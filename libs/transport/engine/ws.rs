//! Client side of one WebSocket connection: upgrade, then frames.
//!
//! The upgrade completes the transfer from the engine's point of view, but
//! the exchange stays attached to its connection afterwards. Decoded data
//! frames queue up until the transport pulls them; control frames are
//! handled here (Ping is answered, Close is answered and ends the session).

use super::conn::Conn;
use super::frame::{
    close_code, close_frame, decode_frame, encode_frame, CloseCode, Control, Data, Frame, OpCode,
};
use super::http::{host_header, request_target, take_head, ResponseHead};
use crate::{Result, TransportError};
use std::collections::VecDeque;
use tracing::{debug, trace};
use tungstenite::handshake::client::generate_key;
use tungstenite::handshake::derive_accept_key;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WsPhase {
    Handshake,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WsStep {
    Pending,
    Upgraded,
}

pub(crate) struct WsExchange {
    url: Url,
    key: String,
    phase: WsPhase,
    frames: VecDeque<Frame>,
    error: Option<TransportError>,
    in_message: bool,
    max_payload: usize,
}

impl WsExchange {
    pub(crate) fn new(url: Url, max_payload: usize) -> Self {
        Self {
            url,
            key: generate_key(),
            phase: WsPhase::Handshake,
            frames: VecDeque::new(),
            error: None,
            in_message: false,
            max_payload,
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn phase(&self) -> WsPhase {
        self.phase
    }

    pub(crate) fn handshake_request(&self, user_agent: &str) -> Vec<u8> {
        format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             User-Agent: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            request_target(&self.url),
            host_header(&self.url),
            user_agent,
            self.key,
        )
        .into_bytes()
    }

    /// Drive the connection and process whatever arrived.
    ///
    /// Errors are returned only while the upgrade is in progress. Once open,
    /// failures are parked and surface through [`next_frame`](Self::next_frame).
    pub(crate) fn advance(&mut self, conn: &mut Conn) -> Result<WsStep> {
        match self.phase {
            WsPhase::Handshake => {
                conn.drive()?;
                let Some(head) = take_head(&mut conn.inbound)? else {
                    if conn.is_eof() {
                        return Err(TransportError::Handshake(
                            "connection closed during upgrade".to_string(),
                        ));
                    }
                    return Ok(WsStep::Pending);
                };
                self.validate(&head)?;
                debug!("WebSocket upgrade accepted by {}", self.url);
                self.phase = WsPhase::Open;
                // Frames may have arrived in the same read as the upgrade
                self.pump(conn);
                Ok(WsStep::Upgraded)
            }
            WsPhase::Open => {
                match conn.drive() {
                    Ok(()) => self.pump(conn),
                    Err(e) => self.fail(e),
                }
                Ok(WsStep::Pending)
            }
            WsPhase::Closed => Ok(WsStep::Pending),
        }
    }

    /// Next queued data frame, then the parked error once frames run out.
    pub(crate) fn next_frame(&mut self) -> Option<Result<Frame>> {
        match self.frames.pop_front() {
            Some(frame) => Some(Ok(frame)),
            None => self.error.take().map(Err),
        }
    }

    /// Mask and serialize an outgoing frame.
    pub(crate) fn encode(&self, frame: Frame) -> Result<Vec<u8>> {
        encode_frame(frame, random_mask())
    }

    /// Normal-closure frame sent when the client ends the session.
    pub(crate) fn close_frame(&self) -> Result<Vec<u8>> {
        self.encode(close_frame(CloseCode::Normal))
    }

    /// Park an error and stop processing input.
    pub(crate) fn fail(&mut self, error: TransportError) {
        if self.phase == WsPhase::Closed {
            return;
        }
        debug!("WebSocket to {} failed: {}", self.url, error);
        self.error = Some(error);
        self.phase = WsPhase::Closed;
    }

    /// Mark an unsuccessful upgrade; no frames or errors are parked.
    pub(crate) fn abandon(&mut self) {
        self.phase = WsPhase::Closed;
    }

    fn validate(&self, head: &ResponseHead) -> Result<()> {
        if head.status != 101 {
            return Err(TransportError::Handshake(format!(
                "server responded with {} {}",
                head.status, head.reason
            )));
        }
        let upgrade = head.header("upgrade").unwrap_or_default();
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(TransportError::Handshake(format!(
                "unexpected Upgrade header: {:?}",
                upgrade
            )));
        }
        if !head.connection_upgrade() {
            return Err(TransportError::Handshake(
                "missing Connection: Upgrade".to_string(),
            ));
        }
        let expected = derive_accept_key(self.key.as_bytes());
        if head.header("sec-websocket-accept") != Some(expected.as_str()) {
            return Err(TransportError::Handshake(
                "Sec-WebSocket-Accept mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn pump(&mut self, conn: &mut Conn) {
        let result = self.read_frames(conn);
        // Flush pongs and close replies even when the session is ending
        let flushed = conn.flush();
        if let Err(e) = result.and(flushed) {
            self.fail(e);
        }
    }

    fn read_frames(&mut self, conn: &mut Conn) -> Result<()> {
        while let Some((frame, used)) = decode_frame(&conn.inbound, self.max_payload)? {
            conn.inbound.drain(..used);
            let is_final = frame.header().is_final;
            let opcode = frame.header().opcode;
            match opcode {
                OpCode::Control(Control::Ping) => {
                    trace!("Ping from {}, replying", self.url);
                    conn.queue(&self.encode(Frame::pong(frame.into_data()))?);
                }
                OpCode::Control(Control::Pong) => trace!("Pong from {}", self.url),
                OpCode::Control(Control::Close) => {
                    let code = close_code(&frame);
                    let reply = match code {
                        Some(code) => close_frame(code),
                        None => Frame::close(None),
                    };
                    conn.queue(&self.encode(reply)?);
                    return Err(TransportError::ConnectionClosed(match code {
                        Some(code) => format!("server sent close frame ({})", code),
                        None => "server sent close frame".to_string(),
                    }));
                }
                OpCode::Data(Data::Continue) => {
                    if !self.in_message {
                        return Err(TransportError::WebSocket(
                            "continuation frame without a message in progress".to_string(),
                        ));
                    }
                    self.in_message = !is_final;
                    self.frames.push_back(frame);
                }
                OpCode::Data(Data::Text | Data::Binary) => {
                    if self.in_message {
                        return Err(TransportError::WebSocket(
                            "new message started before the previous one finished".to_string(),
                        ));
                    }
                    self.in_message = !is_final;
                    self.frames.push_back(frame);
                }
                OpCode::Control(Control::Reserved(code)) | OpCode::Data(Data::Reserved(code)) => {
                    return Err(TransportError::WebSocket(format!(
                        "unknown opcode {:#x}",
                        code
                    )));
                }
            }
        }

        if conn.is_eof() {
            return Err(TransportError::ConnectionClosed(
                "server closed the connection".to_string(),
            ));
        }
        Ok(())
    }
}

fn random_mask() -> [u8; 4] {
    rand::random::<u32>().to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> WsExchange {
        WsExchange::new(Url::parse("ws://example.com:9000/gw?v=10").unwrap(), 1 << 20)
    }

    fn head(status: u16, headers: &[(&str, &str)]) -> ResponseHead {
        ResponseHead {
            status,
            reason: "Switching Protocols".to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_handshake_request_contains_upgrade_headers() {
        let ws = exchange();
        let text = String::from_utf8(ws.handshake_request("agent/1.0")).unwrap();
        assert!(text.starts_with("GET /gw?v=10 HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com:9000\r\n"));
        assert!(text.contains("Upgrade: websocket\r\n"));
        assert!(text.contains("Connection: Upgrade\r\n"));
        assert!(text.contains(&format!("Sec-WebSocket-Key: {}\r\n", ws.key)));
        assert!(text.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_validate_accepts_matching_key() {
        let ws = exchange();
        let accept = derive_accept_key(ws.key.as_bytes());
        let response = head(
            101,
            &[
                ("Upgrade", "websocket"),
                ("Connection", "Upgrade"),
                ("Sec-WebSocket-Accept", &accept),
            ],
        );
        assert!(ws.validate(&response).is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_status_and_key() {
        let ws = exchange();
        let accept = derive_accept_key(ws.key.as_bytes());

        let forbidden = head(403, &[]);
        assert!(matches!(
            ws.validate(&forbidden),
            Err(TransportError::Handshake(_))
        ));

        let bad_key = head(
            101,
            &[
                ("Upgrade", "websocket"),
                ("Connection", "Upgrade"),
                ("Sec-WebSocket-Accept", "bogus"),
            ],
        );
        assert!(ws.validate(&bad_key).is_err());

        let no_connection = head(
            101,
            &[("Upgrade", "websocket"), ("Sec-WebSocket-Accept", &accept)],
        );
        assert!(ws.validate(&no_connection).is_err());
    }

    #[test]
    fn test_parked_error_follows_queued_frames() {
        let mut ws = exchange();
        ws.phase = WsPhase::Open;
        ws.frames.push_back(Frame::message(
            b"last".to_vec(),
            OpCode::Data(Data::Text),
            true,
        ));
        ws.fail(TransportError::ConnectionClosed("gone".to_string()));

        assert_eq!(ws.phase(), WsPhase::Closed);
        assert_eq!(ws.next_frame().unwrap().unwrap().into_data(), b"last");
        assert!(matches!(
            ws.next_frame(),
            Some(Err(TransportError::ConnectionClosed(_)))
        ));
        assert!(ws.next_frame().is_none());
    }
}
