//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics.
//!
//! Axes follow the Source-style convention used across the workspace:
//! z is up, the x/y plane is the ground plane, and yaw is a rotation
//! about z in radians.

use serde::{Deserialize, Serialize};

/// Magnitudes below this are treated as zero intent.
pub const INTENT_EPSILON: f32 = 1e-4;

/// 2D vector for planar intent and axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Returns the normalized vector, or zero when below `INTENT_EPSILON`.
    pub fn normalized_or_zero(self) -> Self {
        let len = self.len();
        if len <= INTENT_EPSILON {
            Self::ZERO
        } else {
            Self::new(self.x / len, self.y / len)
        }
    }

    /// Clamps the magnitude to `max`, preserving direction.
    pub fn clamp_len(self, max: f32) -> Self {
        let len = self.len();
        if len <= max || len <= INTENT_EPSILON {
            self
        } else {
            let scale = max / len;
            Self::new(self.x * scale, self.y * scale)
        }
    }

    /// Rotates counter-clockwise by `angle` radians.
    pub fn rotated(self, angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    /// Heading of this vector as a yaw angle (atan2).
    pub fn heading(self) -> f32 {
        self.y.atan2(self.x)
    }
}

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    /// Planar (x/y) part as a `Vec2`, discarding z.
    pub fn planar(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

/// Wraps an angle to the `(-PI, PI]` range.
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    } else if a <= -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    }
    a
}

/// Turns `current` toward `target` by at most `max_delta` radians.
///
/// Never overshoots; with a large enough `max_delta` the result is exactly
/// `target` (wrapped). This is the smoothing primitive for yaw so that every
/// peer reproduces the same turn.
pub fn turn_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    let diff = wrap_angle(target - current);
    if diff.abs() <= max_delta {
        wrap_angle(target)
    } else {
        wrap_angle(current + max_delta.copysign(diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn vec2_clamp_len_preserves_short_vectors() {
        let v = Vec2::new(0.3, 0.4);
        assert_eq!(v.clamp_len(1.0), v);
        let long = Vec2::new(3.0, 4.0).clamp_len(1.0);
        assert!((long.len() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn vec2_rotated_quarter_turn() {
        let v = Vec2::new(1.0, 0.0).rotated(FRAC_PI_2);
        assert!(v.x.abs() < 1e-6);
        assert!((v.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn turn_towards_is_bounded_and_exact() {
        // Bounded step.
        let stepped = turn_towards(0.0, PI, 0.1);
        assert!((stepped - 0.1).abs() < 1e-6);
        // Reaches the target without overshoot.
        let reached = turn_towards(0.0, 0.05, 0.1);
        assert!((reached - 0.05).abs() < 1e-6);
    }

    #[test]
    fn turn_towards_takes_shortest_path_across_wrap() {
        // From just below +PI to just above -PI: shortest path crosses the seam.
        let cur = PI - 0.05;
        let target = -PI + 0.05;
        let next = turn_towards(cur, target, 0.06);
        assert!(wrap_angle(next - target).abs() < 0.05);
    }
}
