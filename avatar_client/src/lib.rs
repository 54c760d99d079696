//! `avatar_client`
//!
//! Owner-peer systems:
//! - Connection management (reliable + unreliable channels)
//! - Per-frame input sampling into intent commands (change-only sending)
//! - Replica store mirroring every known avatar, with change notifications
//!   for presentation consumers
//!
//! No local simulation happens here: movement and combat outcomes only ever
//! arrive as replicated state from the authority.

pub mod client;
pub mod input;
pub mod replica;

pub use client::AvatarClient;
