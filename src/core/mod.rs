//! Core primitives.
//!
//! World-space vector math and the seeded PRNG every random choice in the
//! simulation draws from.

pub mod vec3;
pub mod rng;

// Re-export core types
pub use vec3::{Vec3, ARENA_HALF_EXTENT, GROUND_HEIGHT, FLIGHT_HEIGHT};
pub use rng::{DeterministicRng, derive_round_seed};
