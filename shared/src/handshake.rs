//! HTTP upgrade handshake, computed by hand from the client's key

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of a request head
pub const MAX_REQUEST_LEN: usize = 8 * 1024;

/// Sent when an upgrade request carries no key
pub const BAD_REQUEST_RESPONSE: &str = "HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("request head exceeds the size limit")]
    TooLarge,
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("unexpected upgrade response: {0}")]
    Rejected(String),
}

/// The parts of an upgrade request the server cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub request_line: String,
    pub key: String,
}

/// Computes `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the `101 Switching Protocols` response for a client key
pub fn response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(key)
    )
}

fn find_head_end(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (field, value) = line.split_once(':')?;
        field
            .trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Parses an upgrade request out of the bytes read so far
///
/// Returns `Ok(None)` while the head is incomplete. On success the second
/// element is the length of the head, so any bytes after it can be handed
/// to the frame decoder.
pub fn parse_request(bytes: &[u8]) -> Result<Option<(UpgradeRequest, usize)>, HandshakeError> {
    let Some(head_len) = find_head_end(bytes) else {
        if bytes.len() > MAX_REQUEST_LEN {
            return Err(HandshakeError::TooLarge);
        }
        return Ok(None);
    };
    if head_len > MAX_REQUEST_LEN {
        return Err(HandshakeError::TooLarge);
    }

    let head = std::str::from_utf8(&bytes[..head_len]).map_err(|_| HandshakeError::InvalidEncoding)?;
    let request_line = head.lines().next().unwrap_or_default().to_string();
    let key = header_value(head, "Sec-WebSocket-Key")
        .filter(|key| !key.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    Ok(Some((
        UpgradeRequest {
            request_line,
            key: key.to_string(),
        },
        head_len,
    )))
}

/// Encodes a 16-byte nonce as a `Sec-WebSocket-Key`
pub fn client_key(nonce: &[u8; 16]) -> String {
    STANDARD.encode(nonce)
}

/// Builds the upgrade request a client sends
pub fn client_request(host: &str, key: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

/// Checks a server's upgrade response against the key the client sent
///
/// Returns `Ok(None)` while the head is incomplete, otherwise the length of
/// the response head.
pub fn verify_response(bytes: &[u8], key: &str) -> Result<Option<usize>, HandshakeError> {
    let Some(head_len) = find_head_end(bytes) else {
        if bytes.len() > MAX_REQUEST_LEN {
            return Err(HandshakeError::TooLarge);
        }
        return Ok(None);
    };

    let head = std::str::from_utf8(&bytes[..head_len]).map_err(|_| HandshakeError::InvalidEncoding)?;
    let status = head.lines().next().unwrap_or_default();
    if !status.starts_with("HTTP/1.1 101") {
        return Err(HandshakeError::Rejected(status.to_string()));
    }

    let expected = accept_key(key);
    match header_value(head, "Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(Some(head_len)),
        Some(accept) => Err(HandshakeError::Rejected(format!("accept value {accept}"))),
        None => Err(HandshakeError::Rejected("no accept header".to_string())),
    }
}
