//! Game Configuration
//!
//! Every tunable constant of the simulation. Collision radii in particular
//! are tuning values, not load-bearing precision.

use std::path::Path;
use serde::{Serialize, Deserialize};

/// Top-level simulation configuration.
///
/// Missing fields in a config file fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Arena seed; each round derives its own stream from it
    pub seed: u64,
    /// Simulation tick rate (Hz)
    pub tick_rate: u32,
    /// Round lifecycle timing
    pub round: RoundConfig,
    /// Tag collision tuning
    pub tagging: TagConfig,
    /// Power-up pool and effect tuning
    pub power_ups: PowerUpConfig,
    /// Bot behaviour tuning
    pub bots: BotConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            seed: 0x7A6_A4E4A,
            tick_rate: crate::DEFAULT_TICK_RATE,
            round: RoundConfig::default(),
            tagging: TagConfig::default(),
            power_ups: PowerUpConfig::default(),
            bots: BotConfig::default(),
        }
    }
}

impl GameConfig {
    /// Nominal tick length in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        1000 / u64::from(self.tick_rate.max(1))
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Round lifecycle timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Maximum round length
    pub duration_budget_ms: u64,
    /// Pause between a round ending and the next one starting
    pub intermission_ms: u64,
    /// Delay between the last tag and the round ending
    pub end_grace_ms: u64,
    /// Population a round starts with; bots fill the gap
    pub min_population: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            duration_budget_ms: 180_000,
            intermission_ms: 10_000,
            end_grace_ms: 1_000,
            min_population: 5,
        }
    }
}

/// Tag collision tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    /// Collision radius at scale 1.0
    pub base_collision_radius: f32,
    /// Scale given to a freshly tagged player
    pub fresh_it_scale: f32,
    /// Scale growth per tag made
    pub scale_per_tag: f32,
    /// Scale cap
    pub max_scale: f32,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            base_collision_radius: 2.0,
            fresh_it_scale: 1.1,
            scale_per_tag: 0.1,
            max_scale: 2.0,
        }
    }
}

/// Power-up pool and effect tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerUpConfig {
    /// Concurrent pickups kept on the field
    pub pool_size: usize,
    /// Active window after activation
    pub effect_duration_ms: u64,
    /// Pickup collection radius
    pub pickup_radius: f32,
    /// Minimum distance between a spawned pickup and the arena edge
    pub spawn_padding: f32,
    /// Displacement multiplier while `Speed` is active
    pub speed_multiplier: f32,
    /// Displacement multiplier while `Flight` is active
    pub flight_multiplier: f32,
    /// How often the pool is topped back up to `pool_size`
    pub top_up_interval_ms: u64,
}

impl Default for PowerUpConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            effect_duration_ms: 5_000,
            pickup_radius: 3.0,
            spawn_padding: 2.0,
            speed_multiplier: 1.5,
            flight_multiplier: 2.0,
            top_up_interval_ms: 5_000,
        }
    }
}

/// Bot behaviour tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Movement speed (units per second)
    pub speed: f32,
    /// Distance at which an untagged bot notices an "it" player
    pub detection_radius: f32,
    /// Distance from the edge at which bots turn back toward the center
    pub edge_buffer: f32,
    /// How long a random-walk heading is kept
    pub wander_interval_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            speed: 6.0,
            detection_radius: 5.0,
            edge_buffer: 3.0,
            wander_interval_ms: 1_500,
        }
    }
}

/// Config loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for `GameConfig`.
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}
