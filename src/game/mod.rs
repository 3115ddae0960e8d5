//! Game Logic Module
//!
//! The tag simulation. Single-owner state, advanced only by [`tick::tick`].
//!
//! ## Module Structure
//!
//! - `config`: Tunable constants
//! - `state`: Entity registry (players, pickups)
//! - `input`: Movement intents and the command queue
//! - `tick`: Simulation loop
//! - `round`: Round lifecycle
//! - `tagging`: Tag collision and role transitions
//! - `powerup`: Pickup pool and power-up effects
//! - `bot`: Bot synthesis and steering
//! - `timer`: Generation-stamped deferred tasks
//! - `events`: Events for observers
//! - `replay`: Recorded command scripts

pub mod config;
pub mod state;
pub mod input;
pub mod tick;
pub mod round;
pub mod tagging;
pub mod powerup;
pub mod bot;
pub mod timer;
pub mod events;
pub mod replay;

// Re-export key types
pub use config::{GameConfig, ConfigError};
pub use state::{GameState, PlayerState, PlayerSnapshot, PlayerId, PlayerKind, Role, Origin, PowerUpId, PowerUpKind, PowerUpState, HeldPowerUp};
pub use input::{Command, MovementIntent};
pub use round::{RoundPhase, RoundEndReason, SurvivalOutcome};
pub use tick::{tick, TickResult};
pub use events::{GameEvent, GameEventData};
pub use replay::ReplayScript;
