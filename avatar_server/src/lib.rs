//! `avatar_server`
//!
//! Authority-side systems:
//! - Fixed timestep movement simulation (single writer of `PoseState`)
//! - Combat arbitration against the weapon catalog
//! - Avatar lifecycle with deterministic ring spawn slots
//! - Replication fan-out of dirty fields, filtered by read policy
//!
//! Networking model:
//! - TCP: handshake/control plane (welcome, spawn notifications)
//! - UDP: gameplay plane (commands, requests, state updates)

pub mod combat;
pub mod entity;
pub mod movement;
pub mod server;

pub use server::AvatarServer;
