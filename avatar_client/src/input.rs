//! Input command sampling.
//!
//! Runs once per presentation frame on the owning peer only. Raw device
//! axes/buttons are rotated into the camera's yaw-only basis and clamped
//! into an [`InputCommand`]; the sampler sends a command only when a field
//! changed from the previous sent command, except the edge-triggered jump
//! which always forces a send and is never re-sent until consumed.
//!
//! The camera is an explicit [`CameraBasis`] passed in by the caller; there
//! is no process-wide "current camera".

use avatar_shared::{
    command::InputCommand,
    math::{Vec2, Vec3},
};

/// Raw device sample for one presentation frame.
///
/// "No input device" is simply the default (all-zero) sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawInput {
    /// Stick/keys: x = strafe right, y = forward.
    pub move_axes: Vec2,
    pub sprint_held: bool,
    pub crouch_held: bool,
    /// Pressed-this-frame edge.
    pub jump_pressed: bool,
    pub aim_held: bool,
    pub block_held: bool,
}

/// Yaw-only (gravity-projected) camera basis for resolving world-space
/// move direction.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraBasis {
    yaw: f32,
}

impl CameraBasis {
    pub fn from_yaw(yaw: f32) -> Self {
        Self { yaw }
    }

    /// Projects a camera forward vector onto the ground plane. A camera
    /// looking straight down degenerates to yaw 0.
    pub fn from_forward(forward: Vec3) -> Self {
        let planar = forward.planar();
        if planar.len_sq() <= f32::EPSILON {
            Self { yaw: 0.0 }
        } else {
            Self {
                yaw: planar.heading(),
            }
        }
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Rotates device axes into world space and clamps magnitude to 1.
    pub fn world_move_intent(&self, axes: Vec2) -> Vec2 {
        let (sin, cos) = self.yaw.sin_cos();
        let forward = Vec2::new(cos, sin);
        let right = Vec2::new(sin, -cos);
        Vec2::new(
            forward.x * axes.y + right.x * axes.x,
            forward.y * axes.y + right.y * axes.x,
        )
        .clamp_len(1.0)
    }
}

/// Per-frame sampler with change-only sending and jump edge latching.
#[derive(Debug, Default)]
pub struct CommandSampler {
    last_sent: InputCommand,
    jump_latched: bool,
}

impl CommandSampler {
    /// Samples one frame. Returns the command to send, or `None` when
    /// nothing changed and no jump edge is pending.
    pub fn sample(&mut self, raw: &RawInput, camera: &CameraBasis) -> Option<InputCommand> {
        if raw.jump_pressed {
            self.jump_latched = true;
        }

        let base = InputCommand::new(
            camera.world_move_intent(raw.move_axes),
            raw.sprint_held,
            raw.crouch_held,
            false,
        );

        if !self.jump_latched && self.last_sent.without_jump() == base {
            return None;
        }

        let command = InputCommand {
            jump_requested: self.jump_latched,
            ..base
        };
        self.jump_latched = false;
        self.last_sent = command;
        Some(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn camera_basis_rotates_forward_axis() {
        // Camera looking along +x: pushing forward moves +x.
        let cam = CameraBasis::from_yaw(0.0);
        let intent = cam.world_move_intent(Vec2::new(0.0, 1.0));
        assert!((intent.x - 1.0).abs() < 1e-6);
        assert!(intent.y.abs() < 1e-6);

        // Camera looking along +y: pushing forward moves +y.
        let cam = CameraBasis::from_yaw(FRAC_PI_2);
        let intent = cam.world_move_intent(Vec2::new(0.0, 1.0));
        assert!(intent.x.abs() < 1e-6);
        assert!((intent.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn diagonal_input_is_clamped_to_unit() {
        let cam = CameraBasis::from_yaw(0.0);
        let intent = cam.world_move_intent(Vec2::new(1.0, 1.0));
        assert!(intent.len() <= 1.0 + 1e-6);
    }

    #[test]
    fn camera_from_forward_projects_out_pitch() {
        let cam = CameraBasis::from_forward(Vec3::new(0.0, 3.0, -5.0));
        assert!((cam.yaw() - FRAC_PI_2).abs() < 1e-6);
        // Straight down has no planar heading.
        let degenerate = CameraBasis::from_forward(Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(degenerate.yaw(), 0.0);
    }

    #[test]
    fn unchanged_input_is_not_resent() {
        let cam = CameraBasis::from_yaw(0.0);
        let mut sampler = CommandSampler::default();

        // All-zero first frame matches the initial state: nothing to send.
        assert!(sampler.sample(&RawInput::default(), &cam).is_none());

        let moving = RawInput {
            move_axes: Vec2::new(0.0, 1.0),
            ..Default::default()
        };
        assert!(sampler.sample(&moving, &cam).is_some());
        // Same input next frame: deduped.
        assert!(sampler.sample(&moving, &cam).is_none());

        // A modifier change sends again.
        let sprinting = RawInput {
            sprint_held: true,
            ..moving
        };
        assert!(sampler.sample(&sprinting, &cam).is_some());
    }

    #[test]
    fn jump_edge_forces_one_send_and_clears() {
        let cam = CameraBasis::from_yaw(0.0);
        let mut sampler = CommandSampler::default();

        let jump = RawInput {
            jump_pressed: true,
            ..Default::default()
        };
        let cmd = sampler.sample(&jump, &cam).unwrap();
        assert!(cmd.jump_requested);

        // Edge consumed: identical held state sends nothing more.
        assert!(sampler.sample(&RawInput::default(), &cam).is_none());

        // A second press latches again even while other fields are stable.
        let cmd = sampler.sample(&jump, &cam).unwrap();
        assert!(cmd.jump_requested);
    }

    #[test]
    fn jump_latch_survives_until_next_sample() {
        let cam = CameraBasis::from_yaw(0.0);
        let mut sampler = CommandSampler::default();

        // Press and hold movement in the same frame.
        let frame = RawInput {
            move_axes: Vec2::new(0.0, 1.0),
            jump_pressed: true,
            ..Default::default()
        };
        let cmd = sampler.sample(&frame, &cam).unwrap();
        assert!(cmd.jump_requested);
        assert!(cmd.has_move_intent());
    }
}
