//! Deterministic Random Number Generator
//!
//! Uses Xorshift128+ algorithm for fast, high-quality, deterministic randomness.
//! Given the same seed, the simulation picks the same "it", the same bot
//! names and the same pickup positions.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::vec3::{Vec3, ARENA_HALF_EXTENT};

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use tag_arena::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a uniformly distributed index in `[0, len)`.
    ///
    /// Uses rejection sampling so every index is equally likely.
    pub fn next_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        let len = len as u64;
        let zone = u64::MAX - (u64::MAX % len);
        loop {
            let v = self.next_u64();
            if v < zone {
                return (v % len) as usize;
            }
        }
    }

    /// Generate a float in `[0, 1)`.
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        // 24 high bits fill the f32 mantissa exactly
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Generate a float in `[min, max)`.
    #[inline]
    pub fn next_f32_range(&mut self, min: f32, max: f32) -> f32 {
        if min >= max {
            return min;
        }
        min + self.next_f32() * (max - min)
    }

    /// Generate a random floor position at least `padding` away from every edge.
    pub fn random_position(&mut self, padding: f32) -> Vec3 {
        let extent = (ARENA_HALF_EXTENT - padding).max(0.0);
        let x = self.next_f32_range(-extent, extent);
        let z = self.next_f32_range(-extent, extent);
        Vec3::planar(x, z)
    }

    /// Generate a random unit direction on the floor plane.
    pub fn random_direction(&mut self) -> Vec3 {
        let angle = self.next_f32() * std::f32::consts::TAU;
        Vec3::from_heading(angle)
    }

    /// Generate a random boolean with given probability in `[0, 1]`.
    #[inline]
    pub fn next_bool(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_index(slice.len());
            Some(&slice[idx])
        }
    }

    /// Generate 16 random bytes (used for synthesized participant ids).
    pub fn next_bytes16(&mut self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&self.next_u64().to_le_bytes());
        out[8..].copy_from_slice(&self.next_u64().to_le_bytes());
        out
    }
}

/// SplitMix64 for seed initialization.
/// Produces well-distributed values from sequential seeds.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the seed for one round from the arena seed and round number.
///
/// Each round gets an independent stream, so replaying round N does not
/// require replaying rounds 1..N-1 draw for draw.
pub fn derive_round_seed(arena_seed: u64, round_number: u32) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"TAG_ARENA_ROUND_V1");
    hasher.update(arena_seed.to_le_bytes());
    hasher.update(round_number.to_le_bytes());

    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_streams() {
        let draw = |seed| {
            let mut rng = DeterministicRng::new(seed);
            (rng.random_position(0.0), rng.next_bytes16(), rng.next_index(8))
        };

        assert_eq!(draw(0x7A6), draw(0x7A6));
        assert_ne!(draw(0x7A6).1, draw(0x7A7).1);
    }

    #[test]
    fn test_zero_seed_is_usable() {
        let mut rng = DeterministicRng::default();
        let first = rng.next_u64();
        assert!((0..16).any(|_| rng.next_u64() != first));
    }

    #[test]
    fn test_next_index_bounds() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_index(5) < 5);
        }

        assert_eq!(rng.next_index(0), 0);
        assert_eq!(rng.next_index(1), 0);
    }

    #[test]
    fn test_next_index_is_roughly_uniform() {
        let mut rng = DeterministicRng::new(42);
        let mut counts = [0u32; 5];

        for _ in 0..50_000 {
            counts[rng.next_index(5)] += 1;
        }

        // Expected 10_000 each
        for count in counts {
            assert!((9_000..11_000).contains(&count), "skewed bucket: {}", count);
        }
    }

    #[test]
    fn test_next_f32_range() {
        let mut rng = DeterministicRng::new(9999);

        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));

            let r = rng.next_f32_range(-3.0, 3.0);
            assert!((-3.0..3.0).contains(&r));
        }

        assert_eq!(rng.next_f32_range(2.0, 2.0), 2.0);
    }

    #[test]
    fn test_random_position_respects_padding() {
        let mut rng = DeterministicRng::new(7777);

        for _ in 0..500 {
            let pos = rng.random_position(2.0);
            assert!(pos.x.abs() <= ARENA_HALF_EXTENT - 2.0);
            assert!(pos.z.abs() <= ARENA_HALF_EXTENT - 2.0);
            assert_eq!(pos.y, 0.0);
        }
    }

    #[test]
    fn test_derive_round_seed() {
        let a = derive_round_seed(99, 1);
        let b = derive_round_seed(99, 1);
        let c = derive_round_seed(99, 2);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
