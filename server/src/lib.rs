//! # Snake Game Server Library
//!
//! Authoritative server for a multiplayer snake game on a fixed-size
//! toroidal grid. The server owns the canonical world state, advances it
//! at a fixed tick rate, and streams a deep-copy snapshot of the world to
//! every connected client after each tick.
//!
//! ## Architecture
//!
//! ### Single Writer World
//! All world mutation goes through [`game::World`] behind one coarse
//! exclusive lock. The tick loop is the only caller of `tick()`; session
//! tasks touch the world only through short serialized operations
//! (join, leave, direction change), so the simulation never observes a
//! torn snake or apple collection.
//!
//! ### Session per Connection
//! Each TCP connection runs as an independent reader task plus a writer
//! task joined by an unbounded channel. The reader enforces the session
//! state machine (the first frame must identify the player), the writer
//! drains outbound snapshots. Neither can block the tick loop: broadcast
//! is a channel send, and a failed send just prunes that one session.
//!
//! ### Fixed-Period Scheduler
//! A tokio interval with skip-missed-tick semantics drives the
//! simulation: if a tick overruns its period, the next boundary fires a
//! single tick rather than catching up in a burst. Every tick pairs with
//! exactly one broadcast of the snapshot it produced.
//!
//! ## Module Organization
//!
//! - [`game`]: world state, snakes in join order, apples, spawn and
//!   removal, direction validation, the per-tick movement/collision/
//!   eating rules, and snapshot production.
//! - [`network`]: the length-prefixed bincode frame codec, connection
//!   acceptance, session lifecycle, the tick loop, and snapshot fan-out.

pub mod game;
pub mod network;
