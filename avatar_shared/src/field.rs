//! Replicated field store.
//!
//! A [`ReplicatedField`] is a typed state cell with a declared writer role,
//! a read-visibility policy, and an observer list. `try_set` is the single
//! gate for all mutation:
//!
//! - writes from a role other than the declared writer are rejected before
//!   any mutation happens;
//! - an accepted write that changes the value (per the payload's
//!   transition-equality rule) fires every observer exactly once with the
//!   `(previous, current)` pair and marks the field dirty for replication;
//! - writing an equal value is a no-op and fires nothing.
//!
//! Replication drains the dirty flag (latest value wins); intermediate
//! values skipped between drains are never delivered.

use serde::{Deserialize, Serialize};

use crate::net::PeerId;

/// Which role may mutate a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePolicy {
    /// Only the authority (server simulation) writes.
    AuthorityOnly,
    /// Only the owning peer writes (self-reported state).
    OwnerOnly,
}

/// Which peers receive the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPolicy {
    Everyone,
    OwnerOnly,
}

/// Identity attached to a write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    Authority,
    Peer(PeerId),
}

/// Store-level rejection. Absorbed at the boundary, never sent to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldError {
    PermissionDenied,
}

/// Payload contract for replicated fields.
///
/// `transition_eq` decides whether a write is a visible transition. The
/// default is structural equality; event-like payloads (attack events)
/// override it so that re-occurrences still fire.
pub trait FieldValue: Clone + PartialEq {
    fn transition_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl FieldValue for bool {}
impl FieldValue for u16 {}
impl FieldValue for u32 {}
impl FieldValue for f32 {}

type Observer<T> = Box<dyn FnMut(&T, &T) + Send>;

/// A replicated state cell with write authority and change notification.
pub struct ReplicatedField<T: FieldValue> {
    value: T,
    write_policy: WritePolicy,
    read_policy: ReadPolicy,
    owner: PeerId,
    observers: Vec<Observer<T>>,
    dirty: bool,
}

impl<T: FieldValue> ReplicatedField<T> {
    pub fn new(initial: T, write_policy: WritePolicy, read_policy: ReadPolicy, owner: PeerId) -> Self {
        Self {
            value: initial,
            write_policy,
            read_policy,
            owner,
            observers: Vec::new(),
            dirty: false,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.read_policy
    }

    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// Registers a `(previous, current)` observer, called on every committed
    /// transition.
    pub fn subscribe(&mut self, observer: impl FnMut(&T, &T) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn write_allowed(&self, source: WriteSource) -> bool {
        match (self.write_policy, source) {
            (WritePolicy::AuthorityOnly, WriteSource::Authority) => true,
            (WritePolicy::OwnerOnly, WriteSource::Peer(peer)) => peer == self.owner,
            _ => false,
        }
    }

    /// Attempts a write.
    ///
    /// Returns `Ok(true)` when a transition committed, `Ok(false)` for a
    /// no-op write of an equal value, and `Err(PermissionDenied)` when
    /// `source` is not the declared writer (the value is untouched and no
    /// observer fires).
    pub fn try_set(&mut self, value: T, source: WriteSource) -> Result<bool, FieldError> {
        if !self.write_allowed(source) {
            return Err(FieldError::PermissionDenied);
        }
        if self.value.transition_eq(&value) {
            return Ok(false);
        }
        let previous = std::mem::replace(&mut self.value, value);
        self.dirty = true;
        for observer in &mut self.observers {
            observer(&previous, &self.value);
        }
        Ok(true)
    }

    /// Drains the dirty flag, returning the latest value if any transition
    /// committed since the previous drain.
    pub fn take_dirty(&mut self) -> Option<T> {
        if self.dirty {
            self.dirty = false;
            Some(self.value.clone())
        } else {
            None
        }
    }
}
