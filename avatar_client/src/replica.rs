//! Client-side replica store.
//!
//! Each known avatar is mirrored as an [`AvatarReplica`]: the same field
//! set as the authority, with matching write/read policies, fed by incoming
//! `StateUpdate`s. Presentation layers (camera, animation driver, foot
//! placement) subscribe on the fields and receive `(previous, current)`
//! pairs at apply time; this core has no dependency on them.

use avatar_shared::{
    combat::{AttackEvent, UNARMED_WEAPON_ID},
    field::{ReadPolicy, ReplicatedField, WritePolicy, WriteSource},
    net::{EntityUpdate, FieldUpdate, PeerId},
    state::{EntityId, PoseState},
};

/// Read-only mirror of one avatar's replicated fields.
pub struct AvatarReplica {
    pub entity: EntityId,
    pub owner: PeerId,

    pub pose: ReplicatedField<PoseState>,
    pub equipped_weapon: ReplicatedField<u32>,
    pub crouching: ReplicatedField<bool>,
    pub aiming: ReplicatedField<bool>,
    pub blocking: ReplicatedField<bool>,
    pub last_attack: ReplicatedField<AttackEvent>,
}

impl AvatarReplica {
    /// Builds the mirror from a spawn notification.
    pub fn new(entity: EntityId, owner: PeerId, pose: PoseState, equipped_weapon: u32) -> Self {
        Self {
            entity,
            owner,
            pose: ReplicatedField::new(pose, WritePolicy::AuthorityOnly, ReadPolicy::Everyone, owner),
            equipped_weapon: ReplicatedField::new(
                equipped_weapon,
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
        }
    }

    /// A freshly spawned replica with the default loadout at `pose`.
    pub fn at_spawn(entity: EntityId, owner: PeerId, pose: PoseState) -> Self {
        Self::new(entity, owner, pose, UNARMED_WEAPON_ID)
    }

    /// Applies one entity's worth of replicated transitions, firing
    /// subscribed observers per committed field.
    ///
    /// Incoming values are relayed commits: authority-written fields apply
    /// as the authority, owner-written fields as the owner on whose behalf
    /// the server relayed them. Policy rejections cannot occur for
    /// well-formed updates and are silently dropped otherwise.
    pub fn apply(&mut self, update: &EntityUpdate) {
        for field in &update.fields {
            match *field {
                FieldUpdate::Pose(pose) => {
                    let _ = self.pose.try_set(pose, WriteSource::Authority);
                }
                FieldUpdate::EquippedWeapon(weapon) => {
                    let _ = self.equipped_weapon.try_set(weapon, WriteSource::Authority);
                }
                FieldUpdate::Crouching(crouching) => {
                    let _ = self.crouching.try_set(crouching, WriteSource::Authority);
                }
                FieldUpdate::Aiming(aiming) => {
                    let _ = self.aiming.try_set(aiming, WriteSource::Peer(self.owner));
                }
                FieldUpdate::Blocking(blocking) => {
                    let _ = self.blocking.try_set(blocking, WriteSource::Peer(self.owner));
                }
                FieldUpdate::Attack(attack) => {
                    let _ = self.last_attack.try_set(attack, WriteSource::Authority);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::math::Vec3;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn replica() -> AvatarReplica {
        AvatarReplica::at_spawn(
            EntityId(1),
            PeerId(1),
            PoseState::at_spawn(Vec3::ZERO, 0.0),
        )
    }

    #[test]
    fn apply_fires_pose_observers_with_transition_pair() {
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        let mut replica = replica();
        replica.pose.subscribe(move |prev, cur| {
            assert_eq!(prev.position.x, 0.0);
            assert_eq!(cur.position.x, 3.0);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut pose = *replica.pose.get();
        pose.position.x = 3.0;
        replica.apply(&EntityUpdate {
            entity: EntityId(1),
            fields: vec![FieldUpdate::Pose(pose)],
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(replica.pose.get().position.x, 3.0);
    }

    #[test]
    fn duplicate_attack_push_is_suppressed() {
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        let mut replica = replica();
        replica.last_attack.subscribe(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let attack = AttackEvent {
            attack_id: 100,
            server_time: 2.0,
        };
        let update = EntityUpdate {
            entity: EntityId(1),
            fields: vec![FieldUpdate::Attack(attack)],
        };
        // A re-delivered datagram with the identical event must not re-fire.
        replica.apply(&update);
        replica.apply(&update);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // The same attack id at a later authority time is a new occurrence.
        replica.apply(&EntityUpdate {
            entity: EntityId(1),
            fields: vec![FieldUpdate::Attack(AttackEvent {
                attack_id: 100,
                server_time: 2.5,
            })],
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn relayed_owner_fields_apply() {
        let mut replica = replica();
        replica.apply(&EntityUpdate {
            entity: EntityId(1),
            fields: vec![FieldUpdate::Aiming(true), FieldUpdate::Blocking(true)],
        });
        assert!(*replica.aiming.get());
        assert!(*replica.blocking.get());
    }
}
