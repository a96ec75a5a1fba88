//! # Arena Server Library
//!
//! Lobby and match server for a grid-based bomb arena game. Browsers connect
//! over WebSocket, gather in a shared lobby, and once enough of them have
//! joined a countdown starts a match that every connection observes.
//!
//! ## Core Responsibilities
//!
//! ### Lobby
//! Tracks who is connected and what they call themselves, runs the
//! fill and ready countdowns, and starts at most one match at a time.
//!
//! ### Match Referee
//! Hands out the map seed and spawn corners, keeps lives and power-up
//! ownership consistent, and announces the winner. Bomb timing and blast
//! geometry are left to the clients; the server relays those events.
//!
//! ### Chat
//! Relays trimmed, length-limited lobby chat to everyone.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! All mutable state lives in [`state::Server`] and is touched by one task
//! only. Connection tasks report frames and disconnects over a channel and
//! the countdown timer is selected on the same loop, so every message is
//! handled to completion before the next one.
//!
//! ### WebSocket Transport
//! The upgrade handshake and framing are implemented in the `shared` crate.
//! Each connection has a reader task and a writer task draining a bounded
//! outbound queue; a full queue drops frames for that peer only.
//!
//! ## Module Organization
//!
//! - `client_manager`: connection registry and outbound fan-out
//! - `lobby`: the `waiting -> fill -> ready -> playing` state machine
//! - `game`: roster, lives, power-ups and win detection for one match
//! - `state`: message dispatch tying the above together
//! - `network`: TCP accept, upgrade, per-connection tasks and the main loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{NetworkServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = NetworkServer::bind("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod game;
pub mod lobby;
pub mod network;
pub mod state;
