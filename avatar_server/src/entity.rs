//! Server-side avatar entities.
//!
//! One [`AvatarEntity`] per connected player: the replicated field set, the
//! latest intent command, the queued jump, and the combat phase machine.
//! Spawn placement is deterministic: peers are distributed around a ring so
//! avatars never overlap at spawn.

use avatar_shared::{
    combat::{AttackEvent, UNARMED_WEAPON_ID},
    command::InputCommand,
    config::MovementTuning,
    field::{ReadPolicy, ReplicatedField, WritePolicy},
    math::Vec3,
    net::{FieldUpdate, OutboundField, PeerId},
    state::{EntityId, PoseState},
};

use crate::combat::CombatState;

/// Authoritative state of one player avatar.
pub struct AvatarEntity {
    pub id: EntityId,
    pub owner: PeerId,

    pub pose: ReplicatedField<PoseState>,
    pub equipped_weapon: ReplicatedField<u32>,
    pub crouching: ReplicatedField<bool>,
    pub aiming: ReplicatedField<bool>,
    pub blocking: ReplicatedField<bool>,
    pub last_attack: ReplicatedField<AttackEvent>,

    /// Latest intent from the owner, jump edge stripped.
    pub latest_command: InputCommand,
    /// Tick at which a jump was last queued, if unconsumed.
    jump_queued_at: Option<u32>,
    pub combat: CombatState,
}

impl AvatarEntity {
    /// Spawns an avatar on its ring slot with the default loadout.
    pub fn spawn(
        id: EntityId,
        owner: PeerId,
        slot: u32,
        max_slots: u32,
        tuning: &MovementTuning,
    ) -> Self {
        let pose = Self::spawn_slot_pose(slot, max_slots, tuning.spawn_ring_radius);
        Self {
            id,
            owner,
            pose: ReplicatedField::new(pose, WritePolicy::AuthorityOnly, ReadPolicy::Everyone, owner),
            equipped_weapon: ReplicatedField::new(
                UNARMED_WEAPON_ID,
                WritePolicy::AuthorityOnly,
                ReadPolicy::Everyone,
                owner,
            ),
            crouching: ReplicatedField::new(
                false,
                WritePolicy::AuthorityOnly,
                ReadPolicy::Everyone,
                owner,
            ),
            aiming: ReplicatedField::new(false, WritePolicy::OwnerOnly, ReadPolicy::Everyone, owner),
            blocking: ReplicatedField::new(false, WritePolicy::OwnerOnly, ReadPolicy::Everyone, owner),
            last_attack: ReplicatedField::new(
                AttackEvent::default(),
                WritePolicy::AuthorityOnly,
                ReadPolicy::Everyone,
                owner,
            ),
            latest_command: InputCommand::default(),
            jump_queued_at: None,
            combat: CombatState::default(),
        }
    }

    /// Deterministic spawn placement: slot index -> angle on a ground-level
    /// ring, facing the ring center.
    pub fn spawn_slot_pose(slot: u32, max_slots: u32, radius: f32) -> PoseState {
        let slots = max_slots.max(1);
        let angle = (slot % slots) as f32 * (std::f32::consts::TAU / slots as f32);
        let position = Vec3::new(radius * angle.cos(), radius * angle.sin(), 0.0);
        let yaw = avatar_shared::math::wrap_angle(angle + std::f32::consts::PI);
        PoseState::at_spawn(position, yaw)
    }

    /// Stores the latest command; a set jump edge (re)queues the jump.
    /// Multiple jump requests between ticks collapse into one.
    pub fn submit_command(&mut self, command: InputCommand, tick: u32) {
        if command.jump_requested {
            self.jump_queued_at = Some(tick);
        }
        self.latest_command = command.without_jump();
    }

    /// Expires a queued jump older than `buffer_ticks`. Returns true when a
    /// stale request was dropped.
    pub fn expire_stale_jump(&mut self, tick: u32, buffer_ticks: u32) -> bool {
        if let Some(since) = self.jump_queued_at {
            if tick.saturating_sub(since) >= buffer_ticks {
                self.jump_queued_at = None;
                return true;
            }
        }
        false
    }

    pub fn jump_pending(&self) -> bool {
        self.jump_queued_at.is_some()
    }

    pub fn clear_jump(&mut self) {
        self.jump_queued_at = None;
    }

    /// Drains all dirty fields into replication updates, paired with their
    /// read policies for per-peer filtering.
    pub fn drain_dirty(&mut self) -> Vec<OutboundField> {
        let mut out = Vec::new();
        if let Some(pose) = self.pose.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::Pose(pose),
                read_policy: self.pose.read_policy(),
            });
        }
        if let Some(weapon) = self.equipped_weapon.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::EquippedWeapon(weapon),
                read_policy: self.equipped_weapon.read_policy(),
            });
        }
        if let Some(crouching) = self.crouching.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::Crouching(crouching),
                read_policy: self.crouching.read_policy(),
            });
        }
        if let Some(aiming) = self.aiming.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::Aiming(aiming),
                read_policy: self.aiming.read_policy(),
            });
        }
        if let Some(blocking) = self.blocking.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::Blocking(blocking),
                read_policy: self.blocking.read_policy(),
            });
        }
        if let Some(attack) = self.last_attack.take_dirty() {
            out.push(OutboundField {
                update: FieldUpdate::Attack(attack),
                read_policy: self.last_attack.read_policy(),
            });
        }
        out
    }

    /// Full field set for a keyframe, regardless of dirtiness.
    ///
    /// Replicas suppress already-applied values through transition equality,
    /// so resending heals datagram loss without double-firing observers.
    pub fn snapshot_fields(&self) -> Vec<OutboundField> {
        vec![
            OutboundField {
                update: FieldUpdate::Pose(*self.pose.get()),
                read_policy: self.pose.read_policy(),
            },
            OutboundField {
                update: FieldUpdate::EquippedWeapon(*self.equipped_weapon.get()),
                read_policy: self.equipped_weapon.read_policy(),
            },
            OutboundField {
                update: FieldUpdate::Crouching(*self.crouching.get()),
                read_policy: self.crouching.read_policy(),
            },
            OutboundField {
                update: FieldUpdate::Aiming(*self.aiming.get()),
                read_policy: self.aiming.read_policy(),
            },
            OutboundField {
                update: FieldUpdate::Blocking(*self.blocking.get()),
                read_policy: self.blocking.read_policy(),
            },
            OutboundField {
                update: FieldUpdate::Attack(*self.last_attack.get()),
                read_policy: self.last_attack.read_policy(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::field::WriteSource;
    use avatar_shared::math::Vec2;

    fn entity() -> AvatarEntity {
        AvatarEntity::spawn(EntityId(1), PeerId(1), 0, 8, &MovementTuning::default())
    }

    #[test]
    fn spawn_slots_are_distinct_on_the_ring() {
        let tuning = MovementTuning::default();
        let a = AvatarEntity::spawn_slot_pose(0, 8, tuning.spawn_ring_radius);
        let b = AvatarEntity::spawn_slot_pose(1, 8, tuning.spawn_ring_radius);
        let dx = a.position.x - b.position.x;
        let dy = a.position.y - b.position.y;
        assert!(dx * dx + dy * dy > 0.5);
        assert!(a.grounded && b.grounded);
        // Same slot is reproducible.
        assert_eq!(a, AvatarEntity::spawn_slot_pose(0, 8, tuning.spawn_ring_radius));
    }

    #[test]
    fn jump_edge_queues_once_and_collapses() {
        let mut entity = entity();
        let jump = InputCommand::new(Vec2::ZERO, false, false, true);
        entity.submit_command(jump, 5);
        entity.submit_command(jump, 5);
        assert!(entity.jump_pending());
        // The stored command never carries the edge.
        assert!(!entity.latest_command.jump_requested);

        entity.clear_jump();
        assert!(!entity.jump_pending());
    }

    #[test]
    fn queued_jump_expires_after_buffer() {
        let mut entity = entity();
        entity.submit_command(InputCommand::new(Vec2::ZERO, false, false, true), 10);

        // Fresh at the queueing tick.
        assert!(!entity.expire_stale_jump(10, 1));
        assert!(entity.jump_pending());
        // One tick later it is stale and dropped.
        assert!(entity.expire_stale_jump(11, 1));
        assert!(!entity.jump_pending());
    }

    #[test]
    fn drain_dirty_reports_each_transition_once() {
        let mut entity = entity();
        assert!(entity.drain_dirty().is_empty());

        let mut pose = *entity.pose.get();
        pose.position.x += 1.0;
        entity.pose.try_set(pose, WriteSource::Authority).unwrap();
        entity.crouching.try_set(true, WriteSource::Authority).unwrap();

        let drained = entity.drain_dirty();
        assert_eq!(drained.len(), 2);
        assert!(entity.drain_dirty().is_empty());
    }
}
