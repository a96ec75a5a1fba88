//! Process-wide server state and message dispatch
//!
//! [`Server`] owns the connection registry, the lobby phase and the optional
//! running match. It is driven by exactly one task, so every handler below
//! runs to completion before the next event is looked at and no locking is
//! needed. All outbound traffic goes through the registry's non-blocking
//! queues.

use crate::client_manager::{ClientManager, FrameSender};
use crate::game::{GameSession, Outcome};
use crate::lobby::{Lobby, Tick};
use log::{debug, info};
use shared::protocol::{
    BombPlaced, ChatLine, Connected, GameOver, PlayerHit, PlayerLeft, PowerUpCollected,
};
use shared::{
    clamp_chars, ClientMessage, LobbyPhase, ServerMessage, DEFAULT_MAP_SIZE, MAX_CHAT_CHARS,
};
use std::net::SocketAddr;

/// All mutable server state, owned by the network loop
///
/// Handlers take `&mut self` and broadcast their effects before returning.
/// The session exists only while the lobby is `Playing`.
pub struct Server {
    clients: ClientManager,
    lobby: Lobby,
    session: Option<GameSession>,
    map_size: usize,
}

impl Server {
    /// Creates an empty server whose matches use a `map_size` arena
    pub fn new(map_size: usize) -> Self {
        Self {
            clients: ClientManager::new(),
            lobby: Lobby::new(),
            session: None,
            map_size,
        }
    }

    /// Connection registry
    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    /// Lobby phase and countdowns
    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    /// The running match, if any
    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    fn broadcast_lobby_state(&self) {
        self.clients
            .broadcast(&ServerMessage::LobbyState(self.lobby.snapshot()), None);
    }

    fn broadcast_members(&self) {
        self.clients
            .broadcast(&ServerMessage::LobbyUpdate(self.clients.members()), None);
    }

    /// Admits an upgraded connection and returns its id
    pub fn connect(&mut self, addr: SocketAddr, sender: FrameSender) -> u32 {
        let id = self.clients.add_client(addr, sender);

        self.clients
            .send_to(id, &ServerMessage::Connected(Connected { id }));
        self.broadcast_members();
        self.clients
            .send_to(id, &ServerMessage::LobbyState(self.lobby.snapshot()));

        // Late arrivals watch the running match
        if let Some(session) = &self.session {
            self.clients
                .send_to(id, &ServerMessage::GameStart(session.start_message()));
        }
        id
    }

    /// Removes a connection after close, error or protocol violation
    pub fn disconnect(&mut self, id: u32) {
        if self.clients.remove_client(id).is_none() {
            return;
        }
        self.broadcast_members();

        if let Some(session) = self.session.as_mut() {
            if session.remove_player(id) {
                self.clients
                    .broadcast(&ServerMessage::PlayerLeft(PlayerLeft { id }), None);
                self.check_outcome();
            }
        } else if self.lobby.on_leave(self.clients.len()) {
            self.broadcast_lobby_state();
        }
    }

    /// Handles one decoded text payload from client `id`
    pub fn handle_text(&mut self, id: u32, text: &str) {
        match ClientMessage::parse(text) {
            Ok(message) => self.handle_message(id, message),
            Err(e) => debug!("Dropping malformed message from {}: {}", id, e),
        }
    }

    /// Dispatches one parsed message from client `id`
    ///
    /// Lobby messages are accepted in any phase; gameplay messages only
    /// during a match and only from a living player.
    pub fn handle_message(&mut self, id: u32, message: ClientMessage) {
        if !self.clients.contains(id) {
            return;
        }

        match message {
            ClientMessage::Join(join) => {
                self.clients.set_nickname(id, &join.nick);
                self.broadcast_members();
                if self.lobby.on_join(self.clients.len()) {
                    self.broadcast_lobby_state();
                }
            }
            // Chat is trimmed; a line that is blank after trimming is dropped
            ClientMessage::Chat(chat) => {
                let text = chat.text.trim();
                if text.is_empty() {
                    return;
                }
                let line = ChatLine {
                    id,
                    nickname: self.clients.nickname(id),
                    text: clamp_chars(text, MAX_CHAT_CHARS).to_string(),
                };
                self.clients.broadcast(&ServerMessage::Chat(line), None);
            }
            other => self.handle_game_message(id, other),
        }
    }

    fn handle_game_message(&mut self, id: u32, message: ClientMessage) {
        let Some(session) = self.session.as_mut() else {
            debug!("Ignoring game message from {} outside a match", id);
            return;
        };
        if !session.is_alive(id) {
            debug!("Ignoring game message from non-playing client {}", id);
            return;
        }

        match message {
            ClientMessage::Move(step) => {
                if let Some(moved) = session.apply_move(id, step.x, step.y, step.dir) {
                    self.clients
                        .broadcast(&ServerMessage::PlayerMove(moved), None);
                }
            }
            ClientMessage::Bomb(bomb) => {
                let placed = BombPlaced {
                    player_id: id,
                    bomb,
                };
                self.clients
                    .broadcast(&ServerMessage::BombPlaced(placed), Some(id));
            }
            ClientMessage::BlockDestroyed(position) => {
                self.clients
                    .broadcast(&ServerMessage::BlockDestroyed(position), Some(id));
            }
            ClientMessage::PowerupSpawned(powerup) => {
                if session.spawn_powerup(powerup) {
                    self.clients
                        .broadcast(&ServerMessage::PowerupSpawned(powerup), None);
                }
            }
            ClientMessage::PowerupCollected(collect) => {
                if let Some(new_stats) = session.collect_powerup(id, collect.powerup_id) {
                    let collected = PowerUpCollected {
                        powerup_id: collect.powerup_id,
                        player_id: id,
                        new_stats,
                    };
                    self.clients
                        .broadcast(&ServerMessage::PowerupCollected(collected), None);
                }
            }
            ClientMessage::Hit(hit) => {
                if let Some(lives) = session.apply_hit(id, hit.lives) {
                    self.clients
                        .broadcast(&ServerMessage::PlayerHit(PlayerHit { id, lives }), None);
                    self.check_outcome();
                }
            }
            ClientMessage::Join(_) | ClientMessage::Chat(_) => {}
        }
    }

    /// Ends the match if one or no players are left alive
    fn check_outcome(&mut self) {
        let Some(session) = &self.session else {
            return;
        };

        let over = match session.outcome() {
            Outcome::Running => return,
            Outcome::Winner(winner_id) => {
                let winner = session.player(winner_id).and_then(|p| p.nickname.clone());
                info!("Player {} wins the match", winner_id);
                GameOver {
                    winner,
                    winner_id: Some(winner_id),
                }
            }
            Outcome::Draw => {
                info!("Match ended with no survivors");
                GameOver {
                    winner: None,
                    winner_id: None,
                }
            }
        };

        self.clients.broadcast(&ServerMessage::GameOver(over), None);
        self.session = None;
        self.lobby.end_match();
        self.broadcast_lobby_state();
    }

    /// Advances the lobby countdown by one second
    pub fn tick(&mut self) {
        match self.lobby.tick(self.clients.len()) {
            Tick::Idle => {}
            Tick::Counted | Tick::PhaseChanged => self.broadcast_lobby_state(),
            Tick::MatchStarted => {
                self.broadcast_lobby_state();
                self.start_match();
            }
        }
    }

    fn start_match(&mut self) {
        let roster: Vec<(u32, Option<String>)> = self
            .clients
            .members()
            .into_iter()
            .map(|member| (member.id, member.nickname))
            .collect();
        let session = GameSession::new(rand::random(), self.map_size, &roster);

        self.clients
            .broadcast(&ServerMessage::GameStart(session.start_message()), None);
        self.session = Some(session);
    }

    /// Phase whose countdown timer should currently be running, if any
    pub fn countdown_phase(&self) -> Option<LobbyPhase> {
        let phase = self.lobby.phase();
        phase.is_counting_down().then_some(phase)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(DEFAULT_MAP_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{Bomb, ChatText, CollectPowerUp, Hit, Join, Move, Position};
    use shared::{Direction, FrameDecoder, PowerUp, PowerUpKind};
    use tokio::sync::mpsc;

    struct TestClient {
        id: u32,
        rx: mpsc::Receiver<Vec<u8>>,
        decoder: FrameDecoder,
    }

    impl TestClient {
        fn messages(&mut self) -> Vec<ServerMessage> {
            while let Ok(bytes) = self.rx.try_recv() {
                self.decoder.push(&bytes);
            }
            let mut messages = Vec::new();
            while let Some(frame) = self.decoder.next_frame().unwrap() {
                messages.push(ServerMessage::parse(frame.text().unwrap()).unwrap());
            }
            messages
        }
    }

    fn connect(server: &mut Server) -> TestClient {
        let (tx, rx) = mpsc::channel(256);
        let id = server.connect("127.0.0.1:9000".parse().unwrap(), tx);
        TestClient {
            id,
            rx,
            decoder: FrameDecoder::client(),
        }
    }

    fn join(server: &mut Server, client: &TestClient, nick: &str) {
        server.handle_message(
            client.id,
            ClientMessage::Join(Join {
                nick: nick.to_string(),
            }),
        );
    }

    fn count<F: Fn(&ServerMessage) -> bool>(messages: &[ServerMessage], pred: F) -> usize {
        messages.iter().filter(|m| pred(*m)).count()
    }

    /// Joins `nicks` and runs the countdowns until the match starts
    fn playing(nicks: &[&str]) -> (Server, Vec<TestClient>) {
        let mut server = Server::default();
        let mut clients = Vec::new();
        for nick in nicks {
            let client = connect(&mut server);
            join(&mut server, &client, nick);
            clients.push(client);
        }
        while server.lobby().phase() != LobbyPhase::Playing {
            server.tick();
        }
        for client in &mut clients {
            client.messages();
        }
        (server, clients)
    }

    #[test]
    fn test_connect_greets_new_client() {
        let mut server = Server::default();
        let mut client = connect(&mut server);

        let messages = client.messages();
        assert_eq!(messages[0], ServerMessage::Connected(Connected { id: client.id }));
        assert!(matches!(messages[1], ServerMessage::LobbyUpdate(ref m) if m.len() == 1));
        assert!(
            matches!(messages[2], ServerMessage::LobbyState(s) if s.phase == LobbyPhase::Waiting)
        );
    }

    #[test]
    fn test_two_joins_start_fill() {
        let mut server = Server::default();
        let mut a = connect(&mut server);
        let b = connect(&mut server);

        join(&mut server, &a, "alice");
        assert_eq!(server.lobby().phase(), LobbyPhase::Waiting);

        join(&mut server, &b, "bob");
        assert_eq!(server.lobby().phase(), LobbyPhase::Fill);
        assert_eq!(server.lobby().snapshot().fill_remaining, 20);
        assert_eq!(server.countdown_phase(), Some(LobbyPhase::Fill));

        let messages = a.messages();
        let last_roster = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ServerMessage::LobbyUpdate(members) => Some(members.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_roster[1].nickname.as_deref(), Some("bob"));
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::LobbyState(s)) if s.phase == LobbyPhase::Fill
        ));
    }

    #[test]
    fn test_countdowns_lead_to_exactly_one_game_start() {
        let mut server = Server::default();
        let mut a = connect(&mut server);
        let b = connect(&mut server);
        join(&mut server, &a, "alice");
        join(&mut server, &b, "bob");

        for _ in 0..20 {
            server.tick();
        }
        assert_eq!(server.lobby().phase(), LobbyPhase::Ready);
        assert_eq!(server.lobby().snapshot().ready_remaining, 10);

        for _ in 0..10 {
            server.tick();
        }
        assert_eq!(server.lobby().phase(), LobbyPhase::Playing);
        assert_eq!(server.countdown_phase(), None);

        // Extra ticks while playing change nothing
        server.tick();

        let messages = a.messages();
        assert_eq!(
            count(&messages, |m| matches!(m, ServerMessage::GameStart(_))),
            1
        );
        match messages.last() {
            Some(ServerMessage::GameStart(start)) => {
                assert_eq!(start.players.len(), 2);
                assert_eq!(start.map_size, DEFAULT_MAP_SIZE);
                assert_eq!(start.players[0].1.nickname.as_deref(), Some("alice"));
            }
            other => panic!("Expected gameStart last, got {:?}", other),
        }
        assert_eq!(server.session().unwrap().alive_count(), 2);
    }

    #[test]
    fn test_full_lobby_goes_ready_early() {
        let mut server = Server::default();
        let clients: Vec<TestClient> = (0..4).map(|_| connect(&mut server)).collect();
        for client in &clients {
            join(&mut server, client, "p");
        }

        server.tick();
        assert_eq!(server.lobby().phase(), LobbyPhase::Ready);
    }

    #[test]
    fn test_leaving_during_ready_reverts_to_waiting() {
        let mut server = Server::default();
        let a = connect(&mut server);
        let b = connect(&mut server);
        join(&mut server, &a, "alice");
        join(&mut server, &b, "bob");
        while server.lobby().phase() != LobbyPhase::Ready {
            server.tick();
        }

        server.disconnect(b.id);
        assert_eq!(server.lobby().phase(), LobbyPhase::Waiting);
        assert_eq!(server.lobby().snapshot().ready_remaining, 0);
        assert_eq!(server.countdown_phase(), None);
    }

    #[test]
    fn test_win_detection_three_players() {
        let (mut server, mut clients) = playing(&["ann", "ben", "cat"]);
        let (a, b) = (clients[0].id, clients[1].id);

        server.handle_message(a, ClientMessage::Hit(Hit { lives: 0 }));
        assert_eq!(server.lobby().phase(), LobbyPhase::Playing);

        server.handle_message(b, ClientMessage::Hit(Hit { lives: 0 }));
        assert_eq!(server.lobby().phase(), LobbyPhase::Waiting);
        assert!(server.session().is_none());

        let messages = clients[2].messages();
        let game_overs: Vec<&GameOver> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::GameOver(over) => Some(over),
                _ => None,
            })
            .collect();
        assert_eq!(game_overs.len(), 1);
        assert_eq!(game_overs[0].winner.as_deref(), Some("cat"));
        assert_eq!(game_overs[0].winner_id, Some(clients[2].id));
        assert_eq!(
            count(&messages, |m| matches!(m, ServerMessage::PlayerHit(_))),
            2
        );
    }

    #[test]
    fn test_powerup_collected_twice_applies_once() {
        let (mut server, mut clients) = playing(&["ann", "ben"]);
        let a = clients[0].id;
        let powerup = PowerUp {
            id: 11,
            x: 1,
            y: 3,
            kind: PowerUpKind::Bomb,
        };

        server.handle_message(a, ClientMessage::PowerupSpawned(powerup));
        server.handle_message(a, ClientMessage::PowerupSpawned(powerup));
        let collect = ClientMessage::PowerupCollected(CollectPowerUp { powerup_id: 11 });
        server.handle_message(a, collect.clone());
        server.handle_message(a, collect);

        assert_eq!(server.session().unwrap().player(a).unwrap().bomb_count, 2);

        let messages = clients[1].messages();
        assert_eq!(
            count(&messages, |m| matches!(m, ServerMessage::PowerupSpawned(_))),
            1
        );
        let collected: Vec<&PowerUpCollected> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::PowerupCollected(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].player_id, a);
        assert_eq!(collected[0].new_stats.bomb_count, 2);
    }

    #[test]
    fn test_move_broadcast_and_bounds() {
        let (mut server, mut clients) = playing(&["ann", "ben"]);
        let a = clients[0].id;

        server.handle_message(
            a,
            ClientMessage::Move(Move {
                x: 2,
                y: 1,
                dir: Direction::Right,
            }),
        );
        server.handle_message(
            a,
            ClientMessage::Move(Move {
                x: 15,
                y: 1,
                dir: Direction::Right,
            }),
        );

        for client in &mut clients {
            let moves: Vec<ServerMessage> = client
                .messages()
                .into_iter()
                .filter(|m| matches!(m, ServerMessage::PlayerMove(_)))
                .collect();
            assert_eq!(moves.len(), 1);
        }
        let player = server.session().unwrap().player(a).unwrap();
        assert_eq!((player.x, player.y), (2, 1));
    }

    #[test]
    fn test_relay_excludes_sender() {
        let (mut server, mut clients) = playing(&["ann", "ben", "cat"]);
        let a = clients[0].id;

        server.handle_message(
            a,
            ClientMessage::Bomb(Bomb {
                id: 5,
                x: 1,
                y: 1,
                ..Bomb::default()
            }),
        );
        server.handle_message(a, ClientMessage::BlockDestroyed(Position { x: 3, y: 1 }));

        assert!(clients[0].messages().is_empty());
        for client in &mut clients[1..] {
            let messages = client.messages();
            assert!(matches!(
                messages[0],
                ServerMessage::BombPlaced(placed) if placed.player_id == a && placed.bomb.id == 5
            ));
            assert_eq!(
                messages[1],
                ServerMessage::BlockDestroyed(Position { x: 3, y: 1 })
            );
        }
    }

    #[test]
    fn test_game_messages_ignored_outside_match() {
        let mut server = Server::default();
        let mut a = connect(&mut server);
        a.messages();

        server.handle_message(a.id, ClientMessage::Hit(Hit { lives: 0 }));
        server.handle_message(
            a.id,
            ClientMessage::Move(Move {
                x: 1,
                y: 1,
                dir: Direction::Up,
            }),
        );
        server.handle_text(a.id, "{ not json");
        server.handle_text(a.id, r#"{"type":"dance","payload":{}}"#);

        assert!(a.messages().is_empty());
    }

    #[test]
    fn test_chat_clamped_and_named() {
        let mut server = Server::default();
        let mut a = connect(&mut server);
        join(&mut server, &a, "ann");
        a.messages();

        server.handle_message(
            a.id,
            ClientMessage::Chat(ChatText {
                text: "x".repeat(250),
            }),
        );
        server.handle_message(
            a.id,
            ClientMessage::Chat(ChatText {
                text: "   ".to_string(),
            }),
        );

        let messages = a.messages();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Chat(line) => {
                assert_eq!(line.id, a.id);
                assert_eq!(line.nickname.as_deref(), Some("ann"));
                assert_eq!(line.text.chars().count(), MAX_CHAT_CHARS);
            }
            other => panic!("Expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_trimmed_and_blank_dropped() {
        let mut server = Server::default();
        let mut a = connect(&mut server);
        let mut b = connect(&mut server);
        a.messages();
        b.messages();

        for text in ["", " \t ", "\n"] {
            server.handle_message(
                a.id,
                ClientMessage::Chat(ChatText {
                    text: text.to_string(),
                }),
            );
        }
        server.handle_message(
            a.id,
            ClientMessage::Chat(ChatText {
                text: "  gg  ".to_string(),
            }),
        );

        for client in [&mut a, &mut b] {
            let messages = client.messages();
            assert_eq!(messages.len(), 1);
            match &messages[0] {
                ServerMessage::Chat(line) => {
                    assert_eq!(line.text, "gg");
                    assert_eq!(line.nickname, None);
                }
                other => panic!("Expected chat, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_disconnect_during_match_decides_winner() {
        let (mut server, mut clients) = playing(&["ann", "ben"]);
        let (a, b) = (clients[0].id, clients[1].id);

        server.disconnect(b);

        let messages = clients[0].messages();
        assert!(messages.contains(&ServerMessage::PlayerLeft(PlayerLeft { id: b })));
        assert!(messages.contains(&ServerMessage::GameOver(GameOver {
            winner: Some("ann".to_string()),
            winner_id: Some(a),
        })));
        assert_eq!(server.lobby().phase(), LobbyPhase::Waiting);
    }

    #[test]
    fn test_dead_player_retained_and_silenced() {
        let (mut server, mut clients) = playing(&["ann", "ben", "cat"]);
        let a = clients[0].id;

        server.handle_message(a, ClientMessage::Hit(Hit { lives: 0 }));
        server.handle_message(a, ClientMessage::Hit(Hit { lives: 3 }));
        clients[1].messages();

        server.handle_message(
            a,
            ClientMessage::Move(Move {
                x: 2,
                y: 1,
                dir: Direction::Right,
            }),
        );
        assert!(clients[1].messages().is_empty());
        assert_eq!(server.session().unwrap().player(a).unwrap().lives, 0);
    }

    #[test]
    fn test_late_joiner_observes_match() {
        let (mut server, _clients) = playing(&["ann", "ben"]);
        let mut late = connect(&mut server);

        let messages = late.messages();
        assert!(matches!(
            messages.last(),
            Some(ServerMessage::GameStart(start)) if start.players.len() == 2
        ));
        assert!(server.session().unwrap().player(late.id).is_none());
    }

    #[test]
    fn test_rejoin_after_match_starts_new_fill() {
        let (mut server, clients) = playing(&["ann", "ben"]);
        server.handle_message(clients[0].id, ClientMessage::Hit(Hit { lives: 0 }));
        assert_eq!(server.lobby().phase(), LobbyPhase::Waiting);

        join(&mut server, &clients[0], "ann again");
        assert_eq!(server.lobby().phase(), LobbyPhase::Fill);
        assert_eq!(
            server.clients().nickname(clients[0].id).as_deref(),
            Some("ann again")
        );
    }
}
