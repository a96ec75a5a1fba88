//! Match state for a running game
//!
//! The server is authoritative only for what it can check cheaply: movement
//! stays inside the map, lives and the win condition, and power-up ownership.
//! Bomb timing, explosion geometry and block destruction are computed by the
//! clients and merely relayed, so a desynchronised or cheating client that
//! computes a different blast cannot be detected here.

use log::{debug, info};
use shared::protocol::{GameStart, PlayerMove};
use shared::{
    generate_grid, spawn_point, Direction, Grid, PlayerState, PowerUp, PowerUpKind, Stats,
    TileKind, STARTING_LIVES,
};
use std::collections::{BTreeMap, HashMap};

/// Win-condition evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Two or more players still have lives
    Running,
    /// Exactly one player is left alive
    Winner(u32),
    /// Nobody is left alive
    Draw,
}

/// One running match
///
/// Created when the ready countdown elapses and dropped as soon as the
/// outcome is decided. Players are keyed by connection id; power-ups by the
/// id the reporting client chose.
#[derive(Debug, Clone)]
pub struct GameSession {
    seed: u32,
    grid: Grid,
    players: BTreeMap<u32, PlayerState>,
    powerups: HashMap<u64, PowerUp>,
}

impl GameSession {
    /// Starts a match for `roster`, in admission order
    ///
    /// Spawn corners are handed out by roster position, cycling after four.
    pub fn new(seed: u32, map_size: usize, roster: &[(u32, Option<String>)]) -> Self {
        let stats = Stats::default();
        let players = roster
            .iter()
            .enumerate()
            .map(|(slot, (id, nickname))| {
                let (x, y) = spawn_point(slot, map_size);
                let player = PlayerState {
                    id: *id,
                    nickname: nickname.clone(),
                    x: x as i32,
                    y: y as i32,
                    direction: Direction::Down,
                    lives: STARTING_LIVES,
                    bomb_count: stats.bomb_count,
                    bomb_range: stats.bomb_range,
                    speed: stats.speed,
                };
                (*id, player)
            })
            .collect();

        info!(
            "Match started with {} players (seed {}, map {}x{})",
            roster.len(),
            seed,
            map_size,
            map_size
        );

        Self {
            seed,
            grid: generate_grid(map_size, seed),
            players,
            powerups: HashMap::new(),
        }
    }

    /// Seed every client feeds to the map generator
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Side length of the arena
    pub fn map_size(&self) -> usize {
        self.grid.size()
    }

    /// Looks up a roster entry, dead or alive
    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Looks up a power-up still lying on the map
    pub fn powerup(&self, id: u64) -> Option<&PowerUp> {
        self.powerups.get(&id)
    }

    /// True if `id` is on the roster with lives left
    pub fn is_alive(&self, id: u32) -> bool {
        self.players.get(&id).is_some_and(PlayerState::is_alive)
    }

    /// The `gameStart` payload for the current roster
    pub fn start_message(&self) -> GameStart {
        GameStart {
            seed: self.seed,
            map_size: self.grid.size(),
            players: self
                .players
                .iter()
                .map(|(id, player)| (*id, player.clone()))
                .collect(),
        }
    }

    /// Moves a living player; positions outside the map are rejected
    pub fn apply_move(&mut self, id: u32, x: i32, y: i32, dir: Direction) -> Option<PlayerMove> {
        if !self.grid.in_bounds(x, y) {
            debug!("Rejected out-of-bounds move ({}, {}) from {}", x, y, id);
            return None;
        }
        let player = self.players.get_mut(&id).filter(|p| p.is_alive())?;
        player.x = x;
        player.y = y;
        player.direction = dir;
        Some(PlayerMove { id, x, y, dir })
    }

    /// Registers a power-up a client saw drop from a destroyed block
    ///
    /// Returns false for a repeated id, a wall cell or a cell off the map.
    pub fn spawn_powerup(&mut self, powerup: PowerUp) -> bool {
        let on_floor = self
            .grid
            .get(powerup.x, powerup.y)
            .is_some_and(|tile| tile.kind != TileKind::Wall);
        if !on_floor || self.powerups.contains_key(&powerup.id) {
            return false;
        }
        self.powerups.insert(powerup.id, powerup);
        true
    }

    /// Applies a power-up to a living player and removes it
    ///
    /// Returns the player's resulting stats, or `None` if the power-up is
    /// already gone, which makes repeated collection reports harmless.
    pub fn collect_powerup(&mut self, player_id: u32, powerup_id: u64) -> Option<Stats> {
        if !self.powerups.contains_key(&powerup_id) {
            return None;
        }
        let player = self
            .players
            .get_mut(&player_id)
            .filter(|p| p.is_alive())?;
        let powerup = self.powerups.remove(&powerup_id)?;

        match powerup.kind {
            PowerUpKind::Bomb => player.bomb_count += 1,
            PowerUpKind::Flame => player.bomb_range += 1,
            PowerUpKind::Speed => player.speed += 1,
        }
        Some(player.stats())
    }

    /// Overwrites a player's lives with the reported count
    ///
    /// A player already out of lives stays out; dead records are kept so
    /// observers can still see them but no longer count towards the win.
    pub fn apply_hit(&mut self, id: u32, lives: i64) -> Option<u32> {
        let player = self.players.get_mut(&id).filter(|p| p.is_alive())?;
        player.lives = lives.clamp(0, i64::from(u32::MAX)) as u32;
        if player.lives == 0 {
            info!("Player {} is out", id);
        }
        Some(player.lives)
    }

    /// Drops a player from the roster entirely
    pub fn remove_player(&mut self, id: u32) -> bool {
        self.players.remove(&id).is_some()
    }

    /// Number of players with lives left
    pub fn alive_count(&self) -> usize {
        self.players.values().filter(|p| p.is_alive()).count()
    }

    /// Evaluates the win condition over living players only
    pub fn outcome(&self) -> Outcome {
        let mut alive = self.players.values().filter(|p| p.is_alive());
        match (alive.next(), alive.next()) {
            (Some(winner), None) => Outcome::Winner(winner.id),
            (None, _) => Outcome::Draw,
            _ => Outcome::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ids: &[u32]) -> Vec<(u32, Option<String>)> {
        ids.iter()
            .map(|id| (*id, Some(format!("p{}", id))))
            .collect()
    }

    fn session(ids: &[u32]) -> GameSession {
        GameSession::new(42, 15, &roster(ids))
    }

    #[test]
    fn test_players_spawn_in_corners() {
        let game = session(&[3, 7, 9, 12, 20]);

        let corners: Vec<(i32, i32)> = [3, 7, 9, 12, 20]
            .iter()
            .map(|id| {
                let p = game.player(*id).unwrap();
                (p.x, p.y)
            })
            .collect();
        assert_eq!(corners, vec![(1, 1), (1, 13), (13, 1), (13, 13), (1, 1)]);

        let player = game.player(3).unwrap();
        assert_eq!(player.lives, 3);
        assert_eq!(player.stats(), Stats::default());
        assert_eq!(player.nickname.as_deref(), Some("p3"));
    }

    #[test]
    fn test_start_message() {
        let game = session(&[1, 2]);
        let start = game.start_message();

        assert_eq!(start.seed, 42);
        assert_eq!(start.map_size, 15);
        assert_eq!(start.players.len(), 2);
        assert_eq!(start.players[0].0, 1);
        assert_eq!(start.players[1].1.id, 2);
    }

    #[test]
    fn test_move_within_bounds() {
        let mut game = session(&[1, 2]);

        let moved = game.apply_move(1, 2, 1, Direction::Right).unwrap();
        assert_eq!(
            moved,
            PlayerMove {
                id: 1,
                x: 2,
                y: 1,
                dir: Direction::Right
            }
        );
        assert_eq!(game.player(1).unwrap().direction, Direction::Right);
    }

    #[test]
    fn test_move_out_of_bounds_rejected() {
        let mut game = session(&[1, 2]);

        assert!(game.apply_move(1, 15, 1, Direction::Right).is_none());
        assert!(game.apply_move(1, -1, 1, Direction::Left).is_none());
        assert!(game.apply_move(99, 2, 2, Direction::Up).is_none());
        assert_eq!((game.player(1).unwrap().x, game.player(1).unwrap().y), (1, 1));
    }

    #[test]
    fn test_dead_player_cannot_move() {
        let mut game = session(&[1, 2, 3]);
        game.apply_hit(1, 0);
        assert!(game.apply_move(1, 2, 1, Direction::Right).is_none());
    }

    #[test]
    fn test_spawn_powerup_idempotent() {
        let mut game = session(&[1, 2]);
        let powerup = PowerUp {
            id: 5,
            x: 3,
            y: 1,
            kind: PowerUpKind::Bomb,
        };

        assert!(game.spawn_powerup(powerup));
        assert!(!game.spawn_powerup(PowerUp {
            kind: PowerUpKind::Speed,
            ..powerup
        }));
        assert_eq!(game.powerup(5).unwrap().kind, PowerUpKind::Bomb);
    }

    #[test]
    fn test_spawn_powerup_rejects_walls_and_off_map() {
        let mut game = session(&[1, 2]);
        let wall = PowerUp {
            id: 1,
            x: 2,
            y: 2,
            kind: PowerUpKind::Flame,
        };
        let off_map = PowerUp {
            id: 2,
            x: 40,
            y: 1,
            kind: PowerUpKind::Flame,
        };

        assert!(!game.spawn_powerup(wall));
        assert!(!game.spawn_powerup(off_map));
    }

    #[test]
    fn test_collect_powerup_once() {
        let mut game = session(&[1, 2]);
        game.spawn_powerup(PowerUp {
            id: 8,
            x: 1,
            y: 3,
            kind: PowerUpKind::Flame,
        });

        let stats = game.collect_powerup(2, 8).unwrap();
        assert_eq!(stats.bomb_range, 2);
        assert!(game.powerup(8).is_none());

        assert!(game.collect_powerup(2, 8).is_none());
        assert!(game.collect_powerup(1, 8).is_none());
        assert_eq!(game.player(2).unwrap().bomb_range, 2);
        assert_eq!(game.player(1).unwrap().bomb_range, 1);
    }

    #[test]
    fn test_collect_each_kind() {
        let mut game = session(&[1, 2]);
        for (id, kind) in [
            (1, PowerUpKind::Bomb),
            (2, PowerUpKind::Flame),
            (3, PowerUpKind::Speed),
        ] {
            game.spawn_powerup(PowerUp { id, x: 1, y: 3, kind });
            game.collect_powerup(1, id);
        }

        assert_eq!(
            game.player(1).unwrap().stats(),
            Stats {
                bomb_count: 2,
                bomb_range: 2,
                speed: 2
            }
        );
    }

    #[test]
    fn test_unknown_player_does_not_consume_powerup() {
        let mut game = session(&[1, 2]);
        game.spawn_powerup(PowerUp {
            id: 4,
            x: 1,
            y: 3,
            kind: PowerUpKind::Speed,
        });

        assert!(game.collect_powerup(77, 4).is_none());
        assert!(game.powerup(4).is_some());
    }

    #[test]
    fn test_hit_overwrites_lives() {
        let mut game = session(&[1, 2]);

        assert_eq!(game.apply_hit(1, 2), Some(2));
        assert_eq!(game.apply_hit(1, -4), Some(0));
        assert_eq!(game.apply_hit(1, 3), None);
        assert_eq!(game.player(1).unwrap().lives, 0);
    }

    #[test]
    fn test_outcome() {
        let mut game = session(&[1, 2, 3]);
        assert_eq!(game.outcome(), Outcome::Running);

        game.apply_hit(1, 0);
        assert_eq!(game.outcome(), Outcome::Running);
        assert_eq!(game.alive_count(), 2);

        game.apply_hit(2, 0);
        assert_eq!(game.outcome(), Outcome::Winner(3));

        game.apply_hit(3, 0);
        assert_eq!(game.outcome(), Outcome::Draw);
        assert!(game.player(1).is_some());
    }

    #[test]
    fn test_remove_player_can_decide_match() {
        let mut game = session(&[1, 2]);
        assert!(game.remove_player(2));
        assert!(!game.remove_player(2));
        assert_eq!(game.outcome(), Outcome::Winner(1));
    }
}
