//! Authoritative world state: snakes, apples, and the per-tick step rules.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{Coord, Direction, Grid, SnakeView, Snapshot};
use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("player identity '{0}' is already taken")]
    DuplicateIdentity(String),
}

/// World parameters, fixed for the server lifetime.
#[derive(Debug, Clone, Copy)]
pub struct WorldConfig {
    pub width: i32,
    pub height: i32,
    pub apple_count: usize,
    pub snake_length: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: shared::DEFAULT_GRID_WIDTH,
            height: shared::DEFAULT_GRID_HEIGHT,
            apple_count: shared::DEFAULT_APPLE_COUNT,
            snake_length: shared::DEFAULT_SNAKE_LENGTH,
        }
    }
}

/// A single player's snake. The body is ordered head-first and is never
/// empty while the snake exists. A dead snake keeps its body and score for
/// display but is no longer moved, and no longer blocks other snakes.
#[derive(Debug, Clone)]
pub struct Snake {
    pub id: String,
    pub body: VecDeque<Coord>,
    pub direction: Direction,
    pub alive: bool,
    pub score: u32,
}

/// The authoritative game world. All mutation goes through the methods
/// below; the tick loop is the only caller of `tick()`, so one exclusive
/// lock around the whole struct is the entire concurrency story.
///
/// Snakes are kept in a `Vec` in join order: the tick and snapshot
/// iteration order is part of the observable behavior and a hash map
/// would not preserve it.
pub struct World {
    grid: Grid,
    snake_length: usize,
    apple_count: usize,
    snakes: Vec<Snake>,
    apples: Vec<Coord>,
    rng: StdRng,
}

impl World {
    pub fn new(config: WorldConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Seedable constructor so tests can pin spawn placement.
    pub fn with_rng(config: WorldConfig, rng: StdRng) -> Self {
        let mut world = Self {
            grid: Grid::new(config.width, config.height),
            snake_length: config.snake_length.max(1),
            apple_count: config.apple_count,
            snakes: Vec::new(),
            apples: Vec::new(),
            rng,
        };
        for _ in 0..world.apple_count {
            world.spawn_apple();
        }
        world
    }

    /// Registers a new player at a random cell with a random heading.
    /// Spawns do not avoid existing snake bodies; a brief overlap at join
    /// is accepted.
    pub fn add_player(&mut self, id: &str) -> Result<(), WorldError> {
        let head = self.random_cell();
        let direction = *Direction::ALL.choose(&mut self.rng).unwrap_or(&Direction::Right);
        self.spawn_snake(id, head, direction, self.snake_length)
    }

    /// Inserts a snake with an explicit placement. The body is laid out
    /// contiguously behind the head along the spawn heading, wrapped onto
    /// the grid like any other movement.
    pub fn spawn_snake(
        &mut self,
        id: &str,
        head: Coord,
        direction: Direction,
        length: usize,
    ) -> Result<(), WorldError> {
        if self.snakes.iter().any(|s| s.id == id) {
            return Err(WorldError::DuplicateIdentity(id.to_string()));
        }

        let length = length.max(1);
        let mut body = VecDeque::with_capacity(length);
        let mut cell = head;
        body.push_back(cell);
        for _ in 1..length {
            cell = self.grid.advance(cell, direction.opposite());
            body.push_back(cell);
        }

        info!(
            "player '{}' spawned at ({}, {}) heading {:?}",
            id, head.x, head.y, direction
        );
        self.snakes.push(Snake {
            id: id.to_string(),
            body,
            direction,
            alive: true,
            score: 0,
        });
        Ok(())
    }

    /// Removes a player's snake. No-op if the identity is unknown.
    pub fn remove_player(&mut self, id: &str) {
        if let Some(pos) = self.snakes.iter().position(|s| s.id == id) {
            self.snakes.remove(pos);
            info!("player '{}' removed", id);
        }
    }

    /// Applies a heading change from a session. Silently ignored when the
    /// snake is missing, dead, or the request is a 180-degree reversal
    /// that would drive the head into its own neck.
    pub fn set_direction(&mut self, id: &str, direction: Direction) {
        if let Some(snake) = self.snakes.iter_mut().find(|s| s.id == id) {
            if snake.alive && !snake.direction.is_opposite(direction) {
                snake.direction = direction;
            }
        }
    }

    /// Advances the world by exactly one step and returns the resulting
    /// snapshot. Every snake's move is evaluated against the pre-tick
    /// world (bodies and apples cloned up front), so iteration order does
    /// not change the outcome. Two heads landing on the same cell in the
    /// same tick are each checked only against the other's pre-tick body;
    /// such a meeting is not automatically a mutual collision.
    pub fn tick(&mut self) -> Snapshot {
        let pre_bodies: Vec<(bool, VecDeque<Coord>)> = self
            .snakes
            .iter()
            .map(|s| (s.alive, s.body.clone()))
            .collect();
        let pre_apples = self.apples.clone();

        for i in 0..self.snakes.len() {
            if !self.snakes[i].alive {
                continue;
            }
            let direction = self.snakes[i].direction;
            let Some(&head) = self.snakes[i].body.front() else {
                continue;
            };
            let next = self.grid.advance(head, direction);

            // An eating move does not vacate the tail, so the usual
            // own-tail exemption does not apply.
            let will_eat = pre_apples.contains(&next);

            let mut collided = false;
            'others: for (j, (was_alive, body)) in pre_bodies.iter().enumerate() {
                if !was_alive {
                    continue;
                }
                for (seg_idx, seg) in body.iter().enumerate() {
                    if i == j && seg_idx == body.len() - 1 && !will_eat {
                        continue; // tail vacates this same step
                    }
                    if *seg == next {
                        collided = true;
                        break 'others;
                    }
                }
            }

            if collided {
                self.snakes[i].alive = false;
                info!(
                    "snake '{}' collided at ({}, {})",
                    self.snakes[i].id, next.x, next.y
                );
                continue;
            }

            self.snakes[i].body.push_front(next);

            // Score, growth, and the replacement spawn all follow the
            // actual removal: an earlier snake this tick may have taken
            // the apple already, and then this move is an ordinary one.
            let mut ate = false;
            if will_eat {
                if let Some(pos) = self.apples.iter().position(|a| *a == next) {
                    self.apples.remove(pos);
                    ate = true;
                }
            }
            if ate {
                self.snakes[i].score += 1;
                self.spawn_apple();
            } else {
                self.snakes[i].body.pop_back();
            }
        }

        self.snapshot()
    }

    /// Deep copy of the current world for broadcast. The copy shares no
    /// storage with the live state; later ticks cannot tear it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            width: self.grid.width,
            height: self.grid.height,
            apples: self.apples.clone(),
            snakes: self
                .snakes
                .iter()
                .map(|s| SnakeView {
                    id: s.id.clone(),
                    body: s.body.iter().copied().collect(),
                    direction: s.direction,
                    alive: s.alive,
                    score: s.score,
                })
                .collect(),
            server_time: now_millis(),
        }
    }

    fn random_cell(&mut self) -> Coord {
        Coord {
            x: self.rng.gen_range(0..self.grid.width),
            y: self.rng.gen_range(0..self.grid.height),
        }
    }

    fn is_occupied(&self, cell: Coord) -> bool {
        self.snakes.iter().any(|s| s.body.contains(&cell)) || self.apples.contains(&cell)
    }

    /// Places one apple on a cell free of snake segments and other apples.
    /// The retry count is bounded so a pathologically full grid skips the
    /// respawn instead of spinning forever.
    fn spawn_apple(&mut self) {
        let attempts = (self.grid.cell_count() * 8).max(64);
        for _ in 0..attempts {
            let cell = self.random_cell();
            if !self.is_occupied(cell) {
                self.apples.push(cell);
                return;
            }
        }
        warn!("no free cell found for apple spawn, skipping");
    }
}

fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    elapsed.min(u64::MAX as u128) as u64
}
