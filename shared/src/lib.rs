//! Wire-level pieces shared by the arena server and its clients
//!
//! Nothing in this crate performs I/O. It holds the WebSocket frame codec,
//! the upgrade handshake arithmetic, the deterministic map generator and the
//! JSON message catalogue, so that a server and any number of clients agree
//! on every byte that crosses the wire.

pub mod frame;
pub mod handshake;
pub mod map;
pub mod protocol;

pub use frame::{
    apply_mask, encode_masked_text, encode_text, Frame, FrameDecoder, FrameError, Opcode,
    CLOSE_FRAME, PONG_FRAME,
};
pub use handshake::{accept_key, client_key, HandshakeError, UpgradeRequest};
pub use map::{generate_grid, spawn_point, Grid, Lcg, Tile, TileKind};
pub use protocol::{
    ClientMessage, Direction, LobbyMember, LobbyPhase, LobbyState, PlayerState, PowerUp,
    PowerUpKind, ServerMessage, Stats,
};

pub const DEFAULT_MAP_SIZE: usize = 15;
pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = 4;
pub const FILL_SECONDS: u32 = 20;
pub const READY_SECONDS: u32 = 10;
pub const STARTING_LIVES: u32 = 3;
pub const MAX_NICKNAME_CHARS: usize = 20;
pub const MAX_CHAT_CHARS: usize = 200;

/// Truncates to at most `max` characters without splitting a code point
pub fn clamp_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
