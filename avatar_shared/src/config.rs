//! Configuration system.
//!
//! Loads simulation configuration from JSON strings/files (file IO left to
//! the binaries). Movement tuning lives here so client and server agree on
//! the constants observers will see reproduced.

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Server listen address, e.g. `127.0.0.1:41000`.
    pub server_addr: String,
    /// Fixed authority tick rate.
    pub tick_hz: u32,
    /// Maximum connected peers; also the number of spawn-ring slots.
    #[serde(default = "default_max_peers")]
    pub max_peers: u32,
    /// Path to a JSON weapon catalog; empty string = built-in catalog.
    #[serde(default)]
    pub catalog_path: String,
    #[serde(default)]
    pub movement: MovementTuning,
}

fn default_max_peers() -> u32 {
    8
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:41000".to_string(),
            tick_hz: 64,
            max_peers: default_max_peers(),
            catalog_path: String::new(),
            movement: MovementTuning::default(),
        }
    }
}

impl SimConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Fixed tick duration in seconds.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_hz as f32
    }
}

/// Movement constants consumed by the authority simulator.
///
/// Speed tiers must stay strictly ordered: crouch < run < sprint. Simulated
/// planar speed is always exactly one of the three.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MovementTuning {
    pub crouch_speed: f32,
    pub run_speed: f32,
    pub sprint_speed: f32,
    /// Max yaw turn rate, degrees per second.
    pub turn_rate_deg: f32,
    /// Negative, meters per second squared.
    pub gravity: f32,
    /// Apex height of a jump from rest, meters.
    pub jump_apex_height: f32,
    /// Snap-to-surface distance for the downward ground probe.
    pub ground_tolerance: f32,
    /// Small negative velocity held while grounded so the probe keeps
    /// contact on the next tick.
    pub ground_stick: f32,
    /// A queued jump not consumed within this many ticks expires. The
    /// default of 1 means a request gets exactly one grounded check at the
    /// next tick and is dropped if the avatar is airborne then.
    pub jump_buffer_ticks: u32,
    /// Radius of the spawn ring.
    pub spawn_ring_radius: f32,
}

impl Default for MovementTuning {
    fn default() -> Self {
        Self {
            crouch_speed: 1.4,
            run_speed: 5.0,
            sprint_speed: 7.0,
            turn_rate_deg: 360.0,
            gravity: -9.81,
            jump_apex_height: 1.2,
            ground_tolerance: 0.1,
            ground_stick: -0.2,
            jump_buffer_ticks: 1,
            spawn_ring_radius: 2.0,
        }
    }
}

impl MovementTuning {
    /// Max yaw turn rate in radians per second.
    pub fn turn_rate_rad(&self) -> f32 {
        self.turn_rate_deg.to_radians()
    }

    /// Initial vertical velocity for a jump reaching `jump_apex_height`.
    pub fn jump_velocity(&self) -> f32 {
        (2.0 * self.gravity.abs() * self.jump_apex_height).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_speed_tiers_ordered() {
        let m = MovementTuning::default();
        assert!(m.crouch_speed < m.run_speed);
        assert!(m.run_speed < m.sprint_speed);
        assert!(m.gravity < 0.0);
        assert!(m.ground_stick < 0.0);
    }

    #[test]
    fn config_parses_with_partial_json() {
        let cfg = SimConfig::from_json_str(r#"{"server_addr":"0.0.0.0:5000","tick_hz":32}"#).unwrap();
        assert_eq!(cfg.tick_hz, 32);
        assert_eq!(cfg.max_peers, 8);
        assert!((cfg.tick_dt() - 1.0 / 32.0).abs() < 1e-9);
    }
}
