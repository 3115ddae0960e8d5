//! # Tag Arena
//!
//! Real-time multiplayer tag: one simulation authority per instance, a
//! stateless relay between instances, and best-effort profile persistence.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TAG ARENA                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── vec3.rs     - World-space vector, arena bounds          │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                  │
//! │                                                              │
//! │  game/           - Simulation (single owner)                 │
//! │  ├── state.rs    - Entity registry                           │
//! │  ├── tick.rs     - Command drain, timers, ordered steps      │
//! │  ├── round.rs    - Round lifecycle                           │
//! │  ├── tagging.rs  - Tag evaluation                            │
//! │  ├── powerup.rs  - Pickup pool and effects                   │
//! │  ├── bot.rs      - Bot synthesis and steering                │
//! │  └── replay.rs   - Recorded command scripts                  │
//! │                                                              │
//! │  network/        - Transport (fire-and-forget)               │
//! │  ├── protocol.rs - Relay event payloads                      │
//! │  ├── server.rs   - Room relay                                │
//! │  ├── client.rs   - Relay connection                          │
//! │  └── session.rs  - Tick loop task                            │
//! │                                                              │
//! │  persistence/    - Profiles, sessions, round records         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism
//!
//! Given the same config, command script and tick lengths, the simulation
//! produces the same events. All randomness comes from the seeded RNG and
//! all collections iterate in id order.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;
pub mod persistence;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use core::vec3::Vec3;
pub use game::{Command, GameConfig, GameEvent, GameState, MovementIntent, PlayerId, PlayerKind};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const DEFAULT_TICK_RATE: u32 = 10;

/// Default relay port
pub const DEFAULT_RELAY_PORT: u16 = 3000;
