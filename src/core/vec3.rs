//! 3D Vector
//!
//! World-space vector for positions and movement deltas.
//! `y` is the vertical axis; the arena floor is the `x`/`z` plane.

use std::fmt;
use std::ops::{Add, Sub, Neg, Mul};
use serde::{Serialize, Deserialize};

// =============================================================================
// ARENA CONSTANTS
// =============================================================================

/// Half-extent of the square arena on both horizontal axes (40-unit arena).
pub const ARENA_HALF_EXTENT: f32 = 20.0;

/// Vertical offset of a grounded player.
pub const GROUND_HEIGHT: f32 = 0.0;

/// Vertical offset of a player with an active flight effect.
pub const FLIGHT_HEIGHT: f32 = 3.0;

/// 3D vector with `f32` components.
#[derive(Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component (horizontal)
    pub x: f32,
    /// Y component (vertical)
    pub y: f32,
    /// Z component (horizontal)
    pub z: f32,
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    /// Unit vector along +Z
    pub const FORWARD: Self = Self { x: 0.0, y: 0.0, z: 1.0 };

    /// Create a new vector.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Create a vector on the floor plane (`y = 0`).
    #[inline]
    pub const fn planar(x: f32, z: f32) -> Self {
        Self { x, y: 0.0, z }
    }

    /// Scale by a scalar.
    #[inline]
    pub fn scale(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    /// Squared length (prefer this for comparisons).
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance(self, other: Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Distance on the floor plane, ignoring altitude.
    #[inline]
    pub fn planar_distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Drop the vertical component.
    #[inline]
    pub fn flatten(self) -> Self {
        Self { x: self.x, y: 0.0, z: self.z }
    }

    /// Normalize to unit length.
    /// Returns ZERO if length is zero or not finite.
    #[inline]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= f32::EPSILON || !len.is_finite() {
            return Self::ZERO;
        }
        self.scale(1.0 / len)
    }

    /// Dot product with another vector.
    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// True if every component is finite.
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Rotate 90 degrees counter-clockwise on the floor plane.
    #[inline]
    pub fn perpendicular(self) -> Self {
        Self { x: -self.z, y: self.y, z: self.x }
    }

    /// Clamp the horizontal components to arena bounds.
    #[inline]
    pub fn clamp_to_arena(self) -> Self {
        Self {
            x: self.x.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT),
            y: self.y,
            z: self.z.clamp(-ARENA_HALF_EXTENT, ARENA_HALF_EXTENT),
        }
    }

    /// Check if the horizontal position is within arena bounds.
    #[inline]
    pub fn is_in_arena(self) -> bool {
        self.x >= -ARENA_HALF_EXTENT
            && self.x <= ARENA_HALF_EXTENT
            && self.z >= -ARENA_HALF_EXTENT
            && self.z <= ARENA_HALF_EXTENT
    }

    /// Heading (radians) of a floor-plane direction, measured from +Z toward +X.
    #[inline]
    pub fn heading(self) -> f32 {
        self.x.atan2(self.z)
    }

    /// Unit floor-plane direction for a heading.
    #[inline]
    pub fn from_heading(heading: f32) -> Self {
        Self::planar(heading.sin(), heading.cos())
    }

    /// Components as an array (wire format).
    #[inline]
    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Build from an array (wire format).
    #[inline]
    pub fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }
}

impl Add for Vec3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: f32) -> Self {
        self.scale(rhs)
    }
}

impl fmt::Debug for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vec3({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

// =============================================================================
// TESTS
// =============================================================================
