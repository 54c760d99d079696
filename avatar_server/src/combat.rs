//! Combat arbitration.
//!
//! The authority validates attack requests against the external weapon
//! catalog and a per-avatar attack phase machine, and publishes at most one
//! [`AttackEvent`] per accepted request. Every rejection is a silent no-op
//! toward the requesting peer; invalid requests are ignored, not diagnosed.
//!
//! Hit detection, projectiles and animation are external: they subscribe to
//! the replicated attack event and act on it.

use avatar_shared::{
    combat::{AttackDefinition, AttackEvent, AttackInputKind, WeaponCatalog},
    net::PeerId,
};

/// Phase of the avatar's current attack, derived from the definition's
/// timing triad. Idle is both the initial and the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackPhase {
    Idle,
    Windup,
    Active,
    Recover,
}

/// The attack currently blocking new requests.
#[derive(Debug, Clone, Copy)]
struct RunningAttack {
    started_at: f64,
    windup: f32,
    active: f32,
    recover: f32,
}

/// Per-avatar combat bookkeeping, advanced lazily by the authority clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct CombatState {
    current: Option<RunningAttack>,
}

impl CombatState {
    /// Phase at authority time `now`.
    pub fn phase_at(&self, now: f64) -> AttackPhase {
        let Some(attack) = self.current else {
            return AttackPhase::Idle;
        };
        let elapsed = now - attack.started_at;
        if elapsed < attack.windup as f64 {
            AttackPhase::Windup
        } else if elapsed < (attack.windup + attack.active) as f64 {
            AttackPhase::Active
        } else if elapsed < (attack.windup + attack.active + attack.recover) as f64 {
            AttackPhase::Recover
        } else {
            AttackPhase::Idle
        }
    }

    fn begin(&mut self, def: &AttackDefinition, now: f64) {
        self.current = Some(RunningAttack {
            started_at: now,
            windup: def.windup,
            active: def.active,
            recover: def.recover,
        });
    }
}

/// Why a request was dropped. Logged at debug on the authority, never sent
/// to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackReject {
    /// Requester is not the entity owner.
    NotOwner,
    /// Equipped weapon id is not in the catalog.
    UnknownWeapon,
    /// The weapon defines no attack for this input kind.
    NoSuchAttack,
    /// A prior attack is still in Windup/Active/Recover.
    Busy,
}

/// Authority-side attack validator.
pub struct CombatArbiter {
    catalog: WeaponCatalog,
}

impl CombatArbiter {
    pub fn new(catalog: WeaponCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &WeaponCatalog {
        &self.catalog
    }

    /// Validates one attack request.
    ///
    /// On acceptance the avatar's phase machine enters Windup and the
    /// returned event carries the catalog attack id and the authority
    /// timestamp. The caller commits the event to the replicated field.
    pub fn arbitrate(
        &self,
        requester: PeerId,
        owner: PeerId,
        equipped_weapon: u32,
        state: &mut CombatState,
        input_kind: AttackInputKind,
        now: f64,
    ) -> Result<AttackEvent, AttackReject> {
        if requester != owner {
            return Err(AttackReject::NotOwner);
        }
        let weapon = self
            .catalog
            .resolve_weapon(equipped_weapon)
            .ok_or(AttackReject::UnknownWeapon)?;
        let def = weapon
            .attack_by_input(input_kind)
            .ok_or(AttackReject::NoSuchAttack)?;
        if state.phase_at(now) != AttackPhase::Idle {
            return Err(AttackReject::Busy);
        }
        state.begin(def, now);
        Ok(AttackEvent {
            attack_id: def.attack_id,
            server_time: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avatar_shared::combat::UNARMED_WEAPON_ID;

    const SWORD: u32 = 2;

    fn arbiter() -> CombatArbiter {
        CombatArbiter::new(WeaponCatalog::builtin())
    }

    fn owner() -> PeerId {
        PeerId(1)
    }

    #[test]
    fn sword_light_publishes_id_100() {
        let arbiter = arbiter();
        let mut state = CombatState::default();
        let ev = arbiter
            .arbitrate(owner(), owner(), SWORD, &mut state, AttackInputKind::Light, 0.5)
            .unwrap();
        assert_eq!(ev.attack_id, 100);
        assert_eq!(ev.server_time, 0.5);
    }

    #[test]
    fn unarmed_heavy_is_silently_dropped() {
        let arbiter = arbiter();
        let mut state = CombatState::default();
        let result = arbiter.arbitrate(
            owner(),
            owner(),
            UNARMED_WEAPON_ID,
            &mut state,
            AttackInputKind::Heavy,
            0.5,
        );
        assert_eq!(result, Err(AttackReject::NoSuchAttack));
        // The phase machine is untouched by a rejected request.
        assert_eq!(state.phase_at(0.5), AttackPhase::Idle);
    }

    #[test]
    fn unknown_weapon_is_rejected() {
        let arbiter = arbiter();
        let mut state = CombatState::default();
        let result =
            arbiter.arbitrate(owner(), owner(), 999, &mut state, AttackInputKind::Light, 0.0);
        assert_eq!(result, Err(AttackReject::UnknownWeapon));
    }

    #[test]
    fn non_owner_request_is_rejected() {
        let arbiter = arbiter();
        let mut state = CombatState::default();
        let result = arbiter.arbitrate(
            PeerId(9),
            owner(),
            SWORD,
            &mut state,
            AttackInputKind::Light,
            0.0,
        );
        assert_eq!(result, Err(AttackReject::NotOwner));
    }

    #[test]
    fn busy_phases_block_until_recover_ends() {
        let arbiter = arbiter();
        let mut state = CombatState::default();
        // Sword Light: windup 0.15, active 0.20, recover 0.35 => total 0.70.
        arbiter
            .arbitrate(owner(), owner(), SWORD, &mut state, AttackInputKind::Light, 0.0)
            .unwrap();

        assert_eq!(state.phase_at(0.05), AttackPhase::Windup);
        assert_eq!(state.phase_at(0.20), AttackPhase::Active);
        assert_eq!(state.phase_at(0.50), AttackPhase::Recover);

        for now in [0.05, 0.20, 0.50] {
            let result = arbiter.arbitrate(
                owner(),
                owner(),
                SWORD,
                &mut state,
                AttackInputKind::Heavy,
                now,
            );
            assert_eq!(result, Err(AttackReject::Busy), "at t={now}");
        }

        // Past recover the machine is Idle again and accepts.
        assert_eq!(state.phase_at(0.71), AttackPhase::Idle);
        let ev = arbiter
            .arbitrate(owner(), owner(), SWORD, &mut state, AttackInputKind::Heavy, 0.71)
            .unwrap();
        assert_eq!(ev.attack_id, 101);
    }

    #[test]
    fn repeated_accepts_one_tick_apart_carry_distinct_timestamps() {
        // A zero-duration attack never blocks, so every tick can accept.
        let catalog = WeaponCatalog::from_defs([avatar_shared::combat::WeaponDef {
            id: 7,
            display_name: "Test".to_string(),
            kind: avatar_shared::combat::WeaponKind::Melee,
            attacks: vec![avatar_shared::combat::AttackDefinition {
                attack_id: 55,
                input_kind: AttackInputKind::Light,
                windup: 0.0,
                active: 0.0,
                recover: 0.0,
                damage: 1.0,
                is_melee: true,
                is_ranged: false,
                animation_trigger: "T".to_string(),
            }],
        }]);
        let arbiter = CombatArbiter::new(catalog);
        let mut state = CombatState::default();
        let dt = 1.0 / 64.0;
        let a = arbiter
            .arbitrate(owner(), owner(), 7, &mut state, AttackInputKind::Light, 0.0)
            .unwrap();
        let b = arbiter
            .arbitrate(owner(), owner(), 7, &mut state, AttackInputKind::Light, dt)
            .unwrap();
        assert_eq!(a.attack_id, b.attack_id);
        assert!((b.server_time - a.server_time).abs() > avatar_shared::combat::ATTACK_TIME_EPSILON);
    }
}
