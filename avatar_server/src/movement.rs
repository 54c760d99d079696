//! Authority movement simulation.
//!
//! Runs only on the authority, on a fixed timestep independent of any
//! presentation frame rate. One [`MovementSimulator::step`] consumes the
//! latest intent command and produces the next authoritative pose:
//!
//! 1. speed tier selection (crouch takes precedence over sprint),
//! 2. planar displacement + bounded yaw turn toward the intent heading,
//! 3. jump consumption and gravity integration,
//! 4. downward ground probe, snap and stick.
//!
//! The step is a pure function of `(pose, command, jump_pending, ground,
//! dt)` so the integration properties are testable without sockets.

use avatar_shared::{
    command::InputCommand,
    config::MovementTuning,
    math::{turn_towards, Vec3},
    state::PoseState,
};

/// Downward collision probe against the external world.
///
/// Returns the surface height under `position`, or `None` over a void.
/// World geometry is not owned by this core; the server injects an
/// implementation at construction.
pub trait GroundQuery: Send {
    fn ground_height(&self, position: Vec3) -> Option<f32>;
}

/// Infinite flat ground at a fixed height.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatGround {
    pub height: f32,
}

impl GroundQuery for FlatGround {
    fn ground_height(&self, _position: Vec3) -> Option<f32> {
        Some(self.height)
    }
}

/// Result of one fixed tick.
#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub pose: PoseState,
    /// True when a pending jump was consumed this tick.
    pub jump_consumed: bool,
}

/// Fixed-timestep integrator for one avatar.
#[derive(Debug, Clone)]
pub struct MovementSimulator {
    tuning: MovementTuning,
}

impl MovementSimulator {
    pub fn new(tuning: MovementTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &MovementTuning {
        &self.tuning
    }

    /// Planar speed for the command's held modifiers. Always exactly one of
    /// the three tier values; crouch wins over sprint.
    pub fn speed_tier(&self, command: &InputCommand) -> f32 {
        if command.crouch_held {
            self.tuning.crouch_speed
        } else if command.sprint_held {
            self.tuning.sprint_speed
        } else {
            self.tuning.run_speed
        }
    }

    /// Advances one fixed tick.
    pub fn step(
        &self,
        pose: &PoseState,
        command: &InputCommand,
        jump_pending: bool,
        ground: &dyn GroundQuery,
        dt: f32,
    ) -> StepOutcome {
        let mut next = *pose;
        let mut jump_consumed = false;

        // Planar displacement and yaw smoothing.
        if command.has_move_intent() {
            let dir = command.move_intent.normalized_or_zero();
            let speed = self.speed_tier(command);
            next.position.x += dir.x * speed * dt;
            next.position.y += dir.y * speed * dt;
            next.yaw = turn_towards(next.yaw, dir.heading(), self.tuning.turn_rate_rad() * dt);
        }

        // Jump is consumed only while grounded at this very tick.
        if jump_pending && next.grounded {
            next.vertical_velocity = self.tuning.jump_velocity();
            next.grounded = false;
            jump_consumed = true;
        }

        // Gravity always integrates, grounded or not.
        next.vertical_velocity += self.tuning.gravity * dt;
        next.position.z += next.vertical_velocity * dt;

        // Ground resolution: snap within tolerance while descending.
        match ground.ground_height(next.position) {
            Some(surface)
                if next.vertical_velocity <= 0.0
                    && next.position.z - surface <= self.tuning.ground_tolerance =>
            {
                next.position.z = surface;
                next.grounded = true;
                next.vertical_velocity = next.vertical_velocity.max(self.tuning.ground_stick);
            }
            _ => next.grounded = false,
        }

        StepOutcome {
            pose: next,
            jump_consumed,
        }
    }
}
