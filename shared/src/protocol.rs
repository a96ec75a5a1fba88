//! Application messages carried inside text frames
//!
//! Every message is a JSON envelope `{"type": ..., "payload": ...}`. Both
//! directions are closed enums: a frame whose `type` is unknown or whose
//! payload is missing a required field fails to parse and is dropped.
//!
//! Ids are JSON integers throughout. Power-up and bomb ids are chosen by the
//! client and must fit a `u64`; a string id does not parse.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerUpKind {
    Bomb,
    Flame,
    Speed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyPhase {
    Waiting,
    Fill,
    Ready,
    Playing,
}

impl LobbyPhase {
    /// Phases driven by a one-second countdown
    pub fn is_counting_down(self) -> bool {
        matches!(self, LobbyPhase::Fill | LobbyPhase::Ready)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyMember {
    pub id: u32,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyState {
    pub phase: LobbyPhase,
    pub fill_remaining: u32,
    pub ready_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub bomb_count: u32,
    pub bomb_range: u32,
    pub speed: u32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            bomb_count: 1,
            bomb_range: 1,
            speed: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: u32,
    pub nickname: Option<String>,
    pub x: i32,
    pub y: i32,
    pub direction: Direction,
    pub lives: u32,
    pub bomb_count: u32,
    pub bomb_range: u32,
    pub speed: u32,
}

impl PlayerState {
    pub fn is_alive(&self) -> bool {
        self.lives > 0
    }

    pub fn stats(&self) -> Stats {
        Stats {
            bomb_count: self.bomb_count,
            bomb_range: self.bomb_range,
            speed: self.speed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerUp {
    pub id: u64,
    pub x: i32,
    pub y: i32,
    #[serde(rename = "type")]
    pub kind: PowerUpKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

// Client -> server payloads

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    pub nick: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatText {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub dir: Direction,
}

/// Bomb placement as reported by the owning client
///
/// Every field falls back to a default when it is missing or `null`, so a
/// sparse report still relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BombReport")]
pub struct Bomb {
    pub id: u64,
    pub x: i32,
    pub y: i32,
    pub range: u32,
    pub timer: u64,
    pub countdown: u32,
    pub stage: u32,
}

impl Default for Bomb {
    fn default() -> Self {
        Self {
            id: 0,
            x: 0,
            y: 0,
            range: 1,
            timer: 3000,
            countdown: 3,
            stage: 0,
        }
    }
}

/// Wire shape of a bomb report before defaults are filled in
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BombReport {
    id: Option<u64>,
    x: Option<i32>,
    y: Option<i32>,
    range: Option<u32>,
    timer: Option<u64>,
    countdown: Option<u32>,
    stage: Option<u32>,
}

impl From<BombReport> for Bomb {
    fn from(report: BombReport) -> Self {
        let defaults = Bomb::default();
        Self {
            id: report.id.unwrap_or(defaults.id),
            x: report.x.unwrap_or(defaults.x),
            y: report.y.unwrap_or(defaults.y),
            range: report.range.unwrap_or(defaults.range),
            timer: report.timer.unwrap_or(defaults.timer),
            countdown: report.countdown.unwrap_or(defaults.countdown),
            stage: report.stage.unwrap_or(defaults.stage),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectPowerUp {
    pub powerup_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub lives: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientMessage {
    Join(Join),
    Chat(ChatText),
    Move(Move),
    Bomb(Bomb),
    BlockDestroyed(Position),
    PowerupSpawned(PowerUp),
    PowerupCollected(CollectPowerUp),
    Hit(Hit),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// Server -> client payloads

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connected {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub id: u32,
    pub nickname: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    pub seed: u32,
    pub map_size: usize,
    pub players: Vec<(u32, PlayerState)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerMove {
    pub id: u32,
    pub x: i32,
    pub y: i32,
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BombPlaced {
    pub player_id: u32,
    #[serde(flatten)]
    pub bomb: Bomb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerUpCollected {
    pub powerup_id: u64,
    pub player_id: u32,
    pub new_stats: Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerHit {
    pub id: u32,
    pub lives: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOver {
    /// Winner's nickname; `None` when the match ended without survivors
    pub winner: Option<String>,
    pub winner_id: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerLeft {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected(Connected),
    LobbyUpdate(Vec<LobbyMember>),
    LobbyState(LobbyState),
    Chat(ChatLine),
    GameStart(GameStart),
    PlayerMove(PlayerMove),
    BombPlaced(BombPlaced),
    BlockDestroyed(Position),
    PowerupSpawned(PowerUp),
    PowerupCollected(PowerUpCollected),
    PlayerHit(PlayerHit),
    GameOver(GameOver),
    PlayerLeft(PlayerLeft),
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
