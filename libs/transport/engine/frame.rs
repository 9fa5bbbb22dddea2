//! WebSocket framing over `tungstenite`'s frame codec.
//!
//! `tungstenite` parses and formats frame headers; this module adds the
//! client-side rules its codec leaves to `WebSocketContext`: no reserved bits
//! without an extension, unmasked server frames, short final control frames
//! and a payload ceiling. Client frames are always masked.

use crate::{Result, TransportError};
use std::io::Cursor;
use tungstenite::protocol::frame::{CloseFrame, FrameHeader};

pub use tungstenite::protocol::frame::coding::{CloseCode, Control, Data, OpCode};
pub use tungstenite::protocol::frame::Frame;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: u64 = 125;

fn codec_error(e: tungstenite::Error) -> TransportError {
    TransportError::WebSocket(e.to_string())
}

/// Decode one server frame from the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the frame and the
/// number of bytes it occupied.
pub fn decode_frame(buf: &[u8], max_payload: usize) -> Result<Option<(Frame, usize)>> {
    let mut cursor = Cursor::new(buf);
    let Some((header, length)) = FrameHeader::parse(&mut cursor).map_err(codec_error)? else {
        return Ok(None);
    };
    check_server_header(&header, length, max_payload)?;

    // Bounded by max_payload above
    let length = length as usize;
    let start = cursor.position() as usize;
    match start.checked_add(length) {
        Some(end) if end <= buf.len() => {
            let frame = Frame::from_payload(header, buf[start..end].to_vec());
            Ok(Some((frame, end)))
        }
        _ => Ok(None),
    }
}

fn check_server_header(header: &FrameHeader, length: u64, max_payload: usize) -> Result<()> {
    if header.rsv1 || header.rsv2 || header.rsv3 {
        return Err(TransportError::WebSocket(
            "reserved bits set without a negotiated extension".to_string(),
        ));
    }
    if header.mask.is_some() {
        return Err(TransportError::WebSocket(
            "server sent a masked frame".to_string(),
        ));
    }
    if let OpCode::Control(_) = header.opcode {
        if !header.is_final {
            return Err(TransportError::WebSocket(
                "fragmented control frame".to_string(),
            ));
        }
        if length > MAX_CONTROL_PAYLOAD {
            return Err(TransportError::WebSocket(format!(
                "control frame payload of {} bytes",
                length
            )));
        }
    }
    if length > max_payload as u64 {
        return Err(TransportError::WebSocket(format!(
            "frame payload of {} bytes exceeds limit of {}",
            length, max_payload
        )));
    }
    Ok(())
}

/// Mask `frame` with `mask` and serialize it.
pub fn encode_frame(mut frame: Frame, mask: [u8; 4]) -> Result<Vec<u8>> {
    frame.header_mut().mask = Some(mask);
    let mut out = Vec::with_capacity(frame.len());
    frame.format(&mut out).map_err(codec_error)?;
    Ok(out)
}

/// Close frame carrying `code` and no reason.
pub fn close_frame(code: CloseCode) -> Frame {
    Frame::close(Some(CloseFrame {
        code,
        reason: "".into(),
    }))
}

/// Status code carried by a received close frame, if any.
pub fn close_code(frame: &Frame) -> Option<CloseCode> {
    match frame.payload().as_slice() {
        [high, low, ..] => Some(CloseCode::from(u16::from_be_bytes([*high, *low]))),
        _ => None,
    }
}
