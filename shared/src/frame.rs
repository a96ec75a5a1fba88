//! WebSocket frame codec for the subset of RFC 6455 the arena speaks
//!
//! Only single-frame text messages and the control opcodes are supported.
//! Payloads are capped at the 16-bit extended length form; the 64-bit form is
//! treated as a protocol violation.

use thiserror::Error;

/// Largest payload representable without the 64-bit length form
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Bare pong reply to a ping, no application data
pub const PONG_FRAME: [u8; 2] = [0x8A, 0x00];

/// Empty close frame sent back when a peer closes
pub const CLOSE_FRAME: [u8; 2] = [0x88, 0x00];

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the 16-bit length limit")]
    PayloadTooLarge(usize),
    #[error("64-bit extended payload length is not supported")]
    UnsupportedLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    Other(u8),
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Self {
        match byte & 0x0F {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            other => Opcode::Other(other),
        }
    }
}

/// One decoded frame with its payload already unmasked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Interprets the payload as UTF-8 text
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Which side of the connection the decoder sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Reads client frames: a masking key always follows the length
    Server,
    /// Reads server frames: masking key only when the mask bit is set
    Client,
}

/// Incremental decoder over an arbitrary byte stream
///
/// The transport hands over chunks that may hold several frames back to back,
/// or only part of one. Bytes are buffered until a whole frame is available,
/// and each call to [`FrameDecoder::next_frame`] consumes exactly one frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    role: Role,
}

impl FrameDecoder {
    /// Decoder for frames sent by a client to this server
    pub fn server() -> Self {
        Self {
            buffer: Vec::new(),
            role: Role::Server,
        }
    }

    /// Decoder for frames sent by a server to a client
    pub fn client() -> Self {
        Self {
            buffer: Vec::new(),
            role: Role::Client,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete frame, or `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let first = self.buffer[0];
        let second = self.buffer[1];
        let mut header_len = 2;

        let payload_len = match second & 0x7F {
            LEN_64 => return Err(FrameError::UnsupportedLength),
            LEN_16 => {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }
                header_len = 4;
                u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize
            }
            len => len as usize,
        };

        let masked = match self.role {
            Role::Server => true,
            Role::Client => second & MASK_BIT != 0,
        };
        if masked {
            header_len += 4;
        }

        let frame_len = header_len + payload_len;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        let mut payload = self.buffer[header_len..frame_len].to_vec();
        if masked {
            let key_start = header_len - 4;
            let mut key = [0u8; 4];
            key.copy_from_slice(&self.buffer[key_start..header_len]);
            apply_mask(&mut payload, key);
        }
        self.buffer.drain(..frame_len);

        Ok(Some(Frame {
            fin: first & FIN_BIT != 0,
            opcode: Opcode::from_byte(first),
            payload,
        }))
    }
}

/// XORs `payload` with the four-byte key in place; applying it twice restores the input
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

fn write_header(frame: &mut Vec<u8>, len: usize, mask_bit: u8) -> Result<(), FrameError> {
    frame.push(FIN_BIT | 0x1);
    if len < LEN_16 as usize {
        frame.push(mask_bit | len as u8);
    } else if len <= MAX_PAYLOAD_LEN {
        frame.push(mask_bit | LEN_16);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        return Err(FrameError::PayloadTooLarge(len));
    }
    Ok(())
}

/// Encodes a server-to-client text frame (never masked)
pub fn encode_text(text: &str) -> Result<Vec<u8>, FrameError> {
    let payload = text.as_bytes();
    let mut frame = Vec::with_capacity(payload.len() + 4);
    write_header(&mut frame, payload.len(), 0)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Encodes a client-to-server text frame masked with `key`
pub fn encode_masked_text(text: &str, key: [u8; 4]) -> Result<Vec<u8>, FrameError> {
    let mut payload = text.as_bytes().to_vec();
    let mut frame = Vec::with_capacity(payload.len() + 8);
    write_header(&mut frame, payload.len(), MASK_BIT)?;
    frame.extend_from_slice(&key);
    apply_mask(&mut payload, key);
    frame.extend_from_slice(&payload);
    Ok(frame)
}
