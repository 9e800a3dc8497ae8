//! Byte framing for long-lived drive responses. Every streaming
//! response goes through this module; there is deliberately no "raw bytes"
//! variant, so the keep-alive sentinel `0x20` can never collide with an
//! unframed text response the way a hand-rolled byte-level reader would
//! risk.
//!
//! Two framings, both terminator-symmetric so a receiver can uniformly
//! skip `0x20`, stop on `0x00`, error on `0x01`, or accumulate `0x02`
//! blocks:
//! - keep-alive wrapper: `0x20`* then `0x00 <payload>` or `0x01 <text>`
//! - streaming wrapper: `0x20`* then interleaved `0x02 <u32le len> <block>`
//!   frames, terminated by a final `0x00`

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::TransportError;

pub const BYTE_KEEPALIVE: u8 = 0x20;
pub const BYTE_EOF: u8 = 0x00;
pub const BYTE_ERROR: u8 = 0x01;
pub const BYTE_DATA: u8 = 0x02;

pub const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    KeepAlive,
    /// Terminal success payload (keep-alive wrapper) or end-of-stream
    /// marker with no payload (streaming wrapper).
    Eof(Bytes),
    Error(String),
    /// One interleaved block (streaming wrapper only).
    Data(Bytes),
}

pub fn encode_keepalive() -> Bytes {
    Bytes::from_static(&[BYTE_KEEPALIVE])
}

pub fn encode_eof(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + payload.len());
    out.extend_from_slice(&[BYTE_EOF]);
    out.extend_from_slice(payload);
    out.freeze()
}

pub fn encode_error(message: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(1 + message.len());
    out.extend_from_slice(&[BYTE_ERROR]);
    out.extend_from_slice(message.as_bytes());
    out.freeze()
}

pub fn encode_data(block: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(5 + block.len());
    out.extend_from_slice(&[BYTE_DATA]);
    out.extend_from_slice(&(block.len() as u32).to_le_bytes());
    out.extend_from_slice(block);
    out.freeze()
}

/// Incremental decoder fed raw bytes as they arrive off the wire (an axum
/// body stream chunk on the server, a `reqwest` byte stream chunk on the
/// client); buffers a partial `Data` frame header/body across chunk
/// boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> std::result::Result<Vec<Frame>, TransportError> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.buf.is_empty() {
                break;
            }
            match self.buf[0] {
                BYTE_KEEPALIVE => {
                    self.buf.advance(1);
                    frames.push(Frame::KeepAlive);
                }
                BYTE_EOF => {
                    let payload = self.buf[1..].to_vec();
                    self.buf.clear();
                    frames.push(Frame::Eof(Bytes::from(payload)));
                    break;
                }
                BYTE_ERROR => {
                    let text = String::from_utf8_lossy(&self.buf[1..]).into_owned();
                    self.buf.clear();
                    frames.push(Frame::Error(text));
                    break;
                }
                BYTE_DATA => {
                    if self.buf.len() < 5 {
                        break;
                    }
                    let len = u32::from_le_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
                    if self.buf.len() < 5 + len {
                        break;
                    }
                    let block = self.buf[5..5 + len].to_vec();
                    self.buf.advance(5 + len);
                    frames.push(Frame::Data(Bytes::from(block)));
                }
                other => {
                    return Err(TransportError::Framing(format!(
                        "unknown frame tag byte: {other:#x}"
                    )));
                }
            }
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_keepalives_then_success_payload() {
        let mut decoder = FrameDecoder::new();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&encode_keepalive());
        wire.extend_from_slice(&encode_keepalive());
        wire.extend_from_slice(&encode_eof(b"hello"));

        let frames = decoder.feed(&wire).unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::KeepAlive,
                Frame::KeepAlive,
                Frame::Eof(Bytes::from_static(b"hello")),
            ]
        );
    }

    #[test]
    fn decodes_interleaved_data_blocks_split_across_chunks() {
        let mut decoder = FrameDecoder::new();
        let block_a = encode_data(b"abc");
        let block_b = encode_data(b"defg");
        let eof = encode_eof(b"");

        let mut first = decoder.feed(&block_a[..3]).unwrap();
        let mut second = decoder.feed(&block_a[3..]).unwrap();
        first.append(&mut second);
        assert_eq!(first, vec![Frame::Data(Bytes::from_static(b"abc"))]);

        let mut rest = decoder.feed(&block_b).unwrap();
        let mut tail = decoder.feed(&eof).unwrap();
        rest.append(&mut tail);
        assert_eq!(
            rest,
            vec![Frame::Data(Bytes::from_static(b"defg")), Frame::Eof(Bytes::new())]
        );
    }

    #[test]
    fn surfaces_error_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&encode_error("disk full")).unwrap();
        assert_eq!(frames, vec![Frame::Error("disk full".to_string())]);
    }
}
