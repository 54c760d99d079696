//! Authoritative state types.
//!
//! [`PoseState`] is the single-writer transform replica: only the authority
//! simulator mutates it, every other peer holds a read-only copy.

use serde::{Deserialize, Serialize};

use crate::field::FieldValue;
use crate::math::Vec3;

/// Opaque entity id, unique per simulated avatar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Authoritative transform of one avatar.
///
/// z is up; `yaw` is radians about z. `vertical_velocity` carries across
/// ticks while airborne and is clamped to a small negative stick value while
/// grounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PoseState {
    pub position: Vec3,
    pub yaw: f32,
    pub vertical_velocity: f32,
    pub grounded: bool,
}

impl PoseState {
    /// Pose at a spawn point: resting on the ground, facing `yaw`.
    pub fn at_spawn(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw,
            vertical_velocity: 0.0,
            grounded: true,
        }
    }
}

impl FieldValue for PoseState {}
