//! Connection registry for upgraded WebSocket clients
//!
//! This module tracks every socket that completed the upgrade handshake:
//! - Id assignment (monotonic, never reused within a process)
//! - Nickname bookkeeping for the lobby roster
//! - Outbound fan-out through per-connection bounded queues
//!
//! Writes never block the caller. Each connection owns a writer task that
//! drains its queue onto the socket; when a queue is full the frame is
//! dropped for that peer only, so one slow client cannot stall a broadcast.

use log::{debug, error, info, warn};
use shared::{clamp_chars, encode_text, LobbyMember, ServerMessage, MAX_NICKNAME_CHARS};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Outbound queue feeding a connection's writer task
pub type FrameSender = mpsc::Sender<Vec<u8>>;

/// A connected client and its lobby identity
#[derive(Debug)]
pub struct Connection {
    /// Unique id assigned at admission, reused as the player id in a match
    pub id: u32,
    /// Set by `join`; `None` until the client names itself
    pub nickname: Option<String>,
    /// Peer address, for logging
    pub addr: SocketAddr,
    sender: FrameSender,
}

impl Connection {
    pub fn new(id: u32, addr: SocketAddr, sender: FrameSender) -> Self {
        Self {
            id,
            nickname: None,
            addr,
            sender,
        }
    }

    fn send_frame(&self, frame: Vec<u8>) {
        match self.sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for client {}, dropping frame", self.id);
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Client {} writer already closed", self.id);
            }
        }
    }
}

/// Serializes and frames a message once so it can be cloned per recipient
fn encode_message(message: &ServerMessage) -> Option<Vec<u8>> {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return None;
        }
    };
    match encode_text(&json) {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to frame message: {}", e);
            None
        }
    }
}

/// Manages all live connections
///
/// Connections are kept ordered by id so roster broadcasts and spawn slot
/// assignment follow admission order.
pub struct ClientManager {
    clients: BTreeMap<u32, Connection>,
    next_client_id: u32,
}

impl ClientManager {
    /// Creates an empty registry; ids start at 1
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 1,
        }
    }

    /// Admits an upgraded socket and returns its id
    pub fn add_client(&mut self, addr: SocketAddr, sender: FrameSender) -> u32 {
        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Connection::new(client_id, addr, sender));
        client_id
    }

    /// Removes a client, dropping its outbound queue
    ///
    /// Returns the removed connection, or `None` if it was already gone.
    pub fn remove_client(&mut self, client_id: u32) -> Option<Connection> {
        let removed = self.clients.remove(&client_id);
        if let Some(client) = &removed {
            info!("Client {} ({}) disconnected", client.id, client.addr);
        }
        removed
    }

    /// Sets a nickname, trimmed and clamped; the last `join` wins
    ///
    /// A nickname that is blank after trimming is stored as an empty string.
    pub fn set_nickname(&mut self, client_id: u32, raw: &str) -> bool {
        let Some(client) = self.clients.get_mut(&client_id) else {
            return false;
        };
        let nickname = clamp_chars(raw.trim(), MAX_NICKNAME_CHARS).to_string();
        info!("Client {} joined as {:?}", client_id, nickname);
        client.nickname = Some(nickname);
        true
    }

    /// Returns the nickname set by the client's last `join`, if any
    pub fn nickname(&self, client_id: u32) -> Option<String> {
        self.clients
            .get(&client_id)
            .and_then(|client| client.nickname.clone())
    }

    /// True while the client is registered
    pub fn contains(&self, client_id: u32) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Roster snapshot in admission order
    pub fn members(&self) -> Vec<LobbyMember> {
        self.clients
            .values()
            .map(|client| LobbyMember {
                id: client.id,
                nickname: client.nickname.clone(),
            })
            .collect()
    }

    /// Sends a message to one client
    pub fn send_to(&self, client_id: u32, message: &ServerMessage) {
        let Some(client) = self.clients.get(&client_id) else {
            return;
        };
        if let Some(frame) = encode_message(message) {
            client.send_frame(frame);
        }
    }

    /// Sends a message to every client, optionally skipping one
    pub fn broadcast(&self, message: &ServerMessage, exclude: Option<u32>) {
        let Some(frame) = encode_message(message) else {
            return;
        };
        for (client_id, client) in &self.clients {
            if Some(*client_id) == exclude {
                continue;
            }
            client.send_frame(frame.clone());
        }
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::new()
    }
}
