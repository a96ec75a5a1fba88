//! Deterministic arena map generation
//!
//! Only the seed travels over the wire, so every implementation must produce
//! the exact same grid for the same `(size, seed)` pair. The generator is a
//! 32-bit linear congruential generator and tiles are visited row-major.

use serde::{Deserialize, Serialize};

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;
const BLOCK_CHANCE: f64 = 0.3;

/// 32-bit linear congruential generator shared with the browser client
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Advances the state and returns it scaled into `[0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        f64::from(self.state) / 4_294_967_296.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileKind {
    Empty,
    Wall,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub x: usize,
    pub y: usize,
    #[serde(rename = "type")]
    pub kind: TileKind,
}

/// Square tile grid indexed as `tiles[y][x]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: usize,
    tiles: Vec<Vec<Tile>>,
}

impl Grid {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn rows(&self) -> &[Vec<Tile>] {
        &self.tiles
    }

    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.size && (y as usize) < self.size
    }

    pub fn get(&self, x: i32, y: i32) -> Option<&Tile> {
        if !self.in_bounds(x, y) {
            return None;
        }
        Some(&self.tiles[y as usize][x as usize])
    }

    fn clear(&mut self, x: usize, y: usize) {
        if let Some(tile) = self.tiles.get_mut(y).and_then(|row| row.get_mut(x)) {
            tile.kind = TileKind::Empty;
        }
    }
}

/// The four corner spawn cells, in slot order
pub fn spawn_points(size: usize) -> [(usize, usize); 4] {
    let far = size.saturating_sub(2);
    [(1, 1), (1, far), (far, 1), (far, far)]
}

/// Spawn cell for a roster slot, cycling over the four corners
pub fn spawn_point(slot: usize, size: usize) -> (usize, usize) {
    spawn_points(size)[slot % 4]
}

/// Generates the arena for `(size, seed)`
///
/// Walls sit on every cell where both coordinates are even. Every other cell
/// draws once from the generator and becomes a destructible block with
/// probability 0.3. The corner spawn cell and its right and down neighbours
/// are then cleared so no player starts boxed in.
pub fn generate_grid(size: usize, seed: u32) -> Grid {
    let mut rng = Lcg::new(seed);
    let mut tiles = Vec::with_capacity(size);

    for y in 0..size {
        let mut row = Vec::with_capacity(size);
        for x in 0..size {
            let kind = if x % 2 == 0 && y % 2 == 0 {
                TileKind::Wall
            } else if rng.next_f64() < BLOCK_CHANCE {
                TileKind::Block
            } else {
                TileKind::Empty
            };
            row.push(Tile { x, y, kind });
        }
        tiles.push(row);
    }

    let mut grid = Grid { size, tiles };
    if size >= 4 {
        for (x, y) in spawn_points(size) {
            grid.clear(x, y);
            grid.clear(x + 1, y);
            grid.clear(x, y + 1);
        }
    }
    grid
}
