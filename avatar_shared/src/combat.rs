//! Combat catalog types and the attack event payload.
//!
//! The weapon/attack catalog is external content: loaded once at startup
//! (JSON), read-only to the simulation core. The arbiter only ever queries
//! it by weapon id and input kind.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::field::FieldValue;

/// Weapon id every avatar spawns with.
pub const UNARMED_WEAPON_ID: u32 = 1;

/// Timestamps closer than this are the same attack occurrence.
pub const ATTACK_TIME_EPSILON: f64 = 1e-4;

/// Which input an attack maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttackInputKind {
    Light,
    Heavy,
    Charged,
}

/// Broad weapon category, replicated for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WeaponKind {
    #[default]
    Unarmed,
    Melee,
    Ranged,
}

/// One attack entry in a weapon's attack set.
///
/// The timing triad (`windup`/`active`/`recover`, seconds) drives the
/// server-side attack phase machine; the rest is consumed by external hit
/// resolution and animation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackDefinition {
    /// Unique per catalog entry, replicated in [`AttackEvent`].
    pub attack_id: u16,
    pub input_kind: AttackInputKind,
    pub windup: f32,
    pub active: f32,
    pub recover: f32,
    pub damage: f32,
    pub is_melee: bool,
    pub is_ranged: bool,
    /// Animation trigger fired by presentation consumers on the event.
    pub animation_trigger: String,
}

impl AttackDefinition {
    /// Total time the attack blocks further requests.
    pub fn total_duration(&self) -> f32 {
        self.windup + self.active + self.recover
    }
}

/// A weapon and its attack set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponDef {
    pub id: u32,
    pub display_name: String,
    pub kind: WeaponKind,
    pub attacks: Vec<AttackDefinition>,
}

impl WeaponDef {
    pub fn attack_by_id(&self, attack_id: u16) -> Option<&AttackDefinition> {
        self.attacks.iter().find(|a| a.attack_id == attack_id)
    }

    pub fn attack_by_input(&self, kind: AttackInputKind) -> Option<&AttackDefinition> {
        self.attacks.iter().find(|a| a.input_kind == kind)
    }
}

/// Read-only weapon registry keyed by weapon id.
#[derive(Debug, Clone, Default)]
pub struct WeaponCatalog {
    by_id: HashMap<u32, WeaponDef>,
}

impl WeaponCatalog {
    /// Builds a catalog; later duplicates of an id are ignored.
    pub fn from_defs(defs: impl IntoIterator<Item = WeaponDef>) -> Self {
        let mut by_id = HashMap::new();
        for def in defs {
            match by_id.entry(def.id) {
                Entry::Vacant(slot) => {
                    slot.insert(def);
                }
                Entry::Occupied(_) => {
                    warn!(weapon_id = def.id, "Duplicate weapon id in catalog ignored");
                }
            }
        }
        Self { by_id }
    }

    /// Parses a catalog from a JSON array of weapon definitions.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        let defs: Vec<WeaponDef> = serde_json::from_str(s)?;
        Ok(Self::from_defs(defs))
    }

    pub fn resolve_weapon(&self, weapon_id: u32) -> Option<&WeaponDef> {
        self.by_id.get(&weapon_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Small built-in catalog used by tests and the demo binaries when no
    /// catalog file is supplied. Unarmed has no Heavy attack on purpose.
    pub fn builtin() -> Self {
        Self::from_defs([
            WeaponDef {
                id: UNARMED_WEAPON_ID,
                display_name: "Unarmed".to_string(),
                kind: WeaponKind::Unarmed,
                attacks: vec![AttackDefinition {
                    attack_id: 10,
                    input_kind: AttackInputKind::Light,
                    windup: 0.10,
                    active: 0.15,
                    recover: 0.25,
                    damage: 5.0,
                    is_melee: true,
                    is_ranged: false,
                    animation_trigger: "AttackPunch".to_string(),
                }],
            },
            WeaponDef {
                id: 2,
                display_name: "Sword".to_string(),
                kind: WeaponKind::Melee,
                attacks: vec![
                    AttackDefinition {
                        attack_id: 100,
                        input_kind: AttackInputKind::Light,
                        windup: 0.15,
                        active: 0.20,
                        recover: 0.35,
                        damage: 10.0,
                        is_melee: true,
                        is_ranged: false,
                        animation_trigger: "AttackLight".to_string(),
                    },
                    AttackDefinition {
                        attack_id: 101,
                        input_kind: AttackInputKind::Heavy,
                        windup: 0.30,
                        active: 0.25,
                        recover: 0.55,
                        damage: 22.0,
                        is_melee: true,
                        is_ranged: false,
                        animation_trigger: "AttackHeavy".to_string(),
                    },
                ],
            },
        ])
    }
}

/// A discrete attack occurrence, replicated as the latest value.
///
/// Two events are the same occurrence only when ids match and the server
/// timestamps are within [`ATTACK_TIME_EPSILON`]; a later event with the
/// same id is a new occurrence and must fire observers again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct AttackEvent {
    pub attack_id: u16,
    /// Authority clock seconds (tick count x tick duration).
    pub server_time: f64,
}

impl FieldValue for AttackEvent {
    fn transition_eq(&self, other: &Self) -> bool {
        self.attack_id == other.attack_id
            && (self.server_time - other.server_time).abs() < ATTACK_TIME_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ReadPolicy, ReplicatedField, WritePolicy, WriteSource};
    use crate::net::PeerId;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn catalog_resolves_by_id_and_input() {
        let catalog = WeaponCatalog::builtin();
        let sword = catalog.resolve_weapon(2).unwrap();
        assert_eq!(sword.attack_by_input(AttackInputKind::Light).unwrap().attack_id, 100);
        assert_eq!(sword.attack_by_input(AttackInputKind::Heavy).unwrap().attack_id, 101);
        assert!(sword.attack_by_input(AttackInputKind::Charged).is_none());

        let unarmed = catalog.resolve_weapon(UNARMED_WEAPON_ID).unwrap();
        assert!(unarmed.attack_by_input(AttackInputKind::Heavy).is_none());

        assert!(catalog.resolve_weapon(999).is_none());
    }

    #[test]
    fn catalog_json_roundtrip() {
        let catalog = WeaponCatalog::builtin();
        let json = serde_json::to_string(
            &catalog.by_id.values().cloned().collect::<Vec<_>>(),
        )
        .unwrap();
        let back = WeaponCatalog::from_json_str(&json).unwrap();
        assert_eq!(back.len(), catalog.len());
        assert!(back.resolve_weapon(2).is_some());
    }

    #[test]
    fn same_tick_duplicate_is_coalesced_but_later_refires() {
        let fired = Arc::new(AtomicU32::new(0));
        let seen = fired.clone();
        let mut field = ReplicatedField::new(
            AttackEvent::default(),
            WritePolicy::AuthorityOnly,
            ReadPolicy::Everyone,
            PeerId(1),
        );
        field.subscribe(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let first = AttackEvent {
            attack_id: 100,
            server_time: 1.0,
        };
        assert_eq!(field.try_set(first, WriteSource::Authority), Ok(true));
        // Same id, same timestamp: coalesced.
        assert_eq!(field.try_set(first, WriteSource::Authority), Ok(false));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Same id one tick later: a new occurrence, fires again.
        let later = AttackEvent {
            attack_id: 100,
            server_time: 1.0 + 1.0 / 64.0,
        };
        assert_eq!(field.try_set(later, WriteSource::Authority), Ok(true));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
