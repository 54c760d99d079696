//! Intent commands.
//!
//! An [`InputCommand`] is the per-tick desired-movement message an owning
//! peer sends to the authority. It is intent only: the owner never moves
//! itself, and the authority never fabricates commands.

use serde::{Deserialize, Serialize};

use crate::math::Vec2;

/// Per-tick movement intent from the owning peer.
///
/// `move_intent` is a world-space planar direction with magnitude <= 1
/// (already rotated out of the camera basis by the sampler). `jump_requested`
/// is edge-triggered: sent once per press and consumed once by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InputCommand {
    pub move_intent: Vec2,
    pub sprint_held: bool,
    pub crouch_held: bool,
    pub jump_requested: bool,
}

impl InputCommand {
    /// Builds a command, clamping `move_intent` magnitude to 1.
    pub fn new(move_intent: Vec2, sprint_held: bool, crouch_held: bool, jump_requested: bool) -> Self {
        Self {
            move_intent: move_intent.clamp_len(1.0),
            sprint_held,
            crouch_held,
            jump_requested,
        }
    }

    /// True when the planar intent is effectively zero.
    pub fn has_move_intent(&self) -> bool {
        self.move_intent.len_sq() > crate::math::INTENT_EPSILON * crate::math::INTENT_EPSILON
    }

    /// Copy with the edge-triggered jump flag cleared.
    ///
    /// Used for change comparisons: the jump edge must not keep a command
    /// "different" forever once it has been consumed.
    pub fn without_jump(mut self) -> Self {
        self.jump_requested = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clamps_intent_magnitude() {
        let cmd = InputCommand::new(Vec2::new(3.0, 4.0), false, false, false);
        assert!((cmd.move_intent.len() - 1.0).abs() < 1e-6);
        // Direction preserved.
        assert!(cmd.move_intent.x > 0.0 && cmd.move_intent.y > 0.0);
    }

    #[test]
    fn zero_intent_is_detected() {
        let cmd = InputCommand::default();
        assert!(!cmd.has_move_intent());
        let cmd = InputCommand::new(Vec2::new(0.5, 0.0), false, false, false);
        assert!(cmd.has_move_intent());
    }
}
