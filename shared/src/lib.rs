use serde::{Deserialize, Serialize};

pub const DEFAULT_GRID_WIDTH: i32 = 40;
pub const DEFAULT_GRID_HEIGHT: i32 = 30;
pub const DEFAULT_TICK_MS: u64 = 150;
pub const DEFAULT_APPLE_COUNT: usize = 5;
pub const DEFAULT_SNAKE_LENGTH: usize = 4;
pub const DEFAULT_PORT: u16 = 12345;

/// One of the four cardinal headings a snake can take.
///
/// The discriminant order (Up=0, Right=1, Down=2, Left=3) matters: the
/// opposite of a heading is always two steps away, which is what the
/// reversal-rejection rule relies on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Right,
    Down,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Right,
        Direction::Down,
        Direction::Left,
    ];

    /// Unit offset of this heading on the grid. Y grows downwards.
    pub fn offset(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Right => (1, 0),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Right => Direction::Left,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
        }
    }

    /// True iff `other` points exactly 180 degrees away from `self`.
    pub fn is_opposite(self, other: Direction) -> bool {
        self.opposite() == other
    }
}

/// A cell on the grid. Always normalized into `[0, width) x [0, height)`;
/// there is no off-grid state.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Fixed-size toroidal grid: movement past any edge reappears on the
/// opposite edge via modular arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub width: i32,
    pub height: i32,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// Moves one cell in the given direction, wrapping at the edges.
    /// `rem_euclid` keeps negative intermediates in range.
    pub fn advance(&self, from: Coord, direction: Direction) -> Coord {
        let (dx, dy) = direction.offset();
        Coord {
            x: (from.x + dx).rem_euclid(self.width),
            y: (from.y + dy).rem_euclid(self.height),
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

/// Messages a client sends to the server over its connection.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientMessage {
    /// Sent exactly once, immediately after connecting, before anything else.
    Identity { name: String },
    /// Requests a heading change. `client_time` is the sender's clock in
    /// millis, kept for ping display and ordering diagnostics only.
    DirectionChange {
        direction: Direction,
        client_time: u64,
    },
}

/// Messages the server sends to every connected client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServerMessage {
    Snapshot(Snapshot),
}

/// Per-snake view inside a snapshot, body ordered head-first.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SnakeView {
    pub id: String,
    pub body: Vec<Coord>,
    pub direction: Direction,
    pub alive: bool,
    pub score: u32,
}

/// An immutable deep copy of the world, produced once per tick and
/// broadcast to all sessions. `snakes` is the identity-to-snake mapping
/// flattened into a sequence so join order survives serialization.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub width: i32,
    pub height: i32,
    pub apples: Vec<Coord>,
    pub snakes: Vec<SnakeView>,
    pub server_time: u64,
}

impl Snapshot {
    pub fn snake(&self, id: &str) -> Option<&SnakeView> {
        self.snakes.iter().find(|s| s.id == id)
    }
}
