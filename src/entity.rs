//! Identity and field-level change tracking shared by all persisted objects.
//!
//! An entity records every field write made through its setters in a
//! [`ChangeTracker`]. The mapper persists only what the tracker holds, so an
//! entity that was loaded but never modified costs no storage round-trip.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::id::TableId;

/// Snapshot of the fields written since the last commit.
///
/// Values are the serde JSON form of each field. `generation` is the
/// tracker's generation at the time of the snapshot; pass it back to
/// [`Entity::clear_through`] once the snapshot has been persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangedState {
    fields: BTreeMap<&'static str, Value>,
    generation: u64,
}

impl ChangedState {
    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of changed fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Value written to `field`, if it changed.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Generation of the newest write included in this snapshot.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Iterate `(field, value)` pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }
}

/// Write barrier recording field-level deltas.
///
/// Each [`record`](ChangeTracker::record) stamps the field with a new,
/// strictly increasing generation. Rewriting a field keeps only the newest
/// value.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    entries: BTreeMap<&'static str, (u64, Value)>,
    generation: u64,
}

impl ChangeTracker {
    /// Record a write of `value` to `field` and return its generation.
    pub fn record(&mut self, field: &'static str, value: Value) -> u64 {
        self.generation += 1;
        self.entries.insert(field, (self.generation, value));
        self.generation
    }

    /// Copy of the pending changes.
    pub fn changed_state(&self) -> ChangedState {
        ChangedState {
            fields: self
                .entries
                .iter()
                .map(|(field, (_, value))| (*field, value.clone()))
                .collect(),
            generation: self.generation,
        }
    }

    /// Forget every pending change.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Forget changes written at or before `generation`.
    ///
    /// Writes recorded after the snapshot at `generation` was taken survive
    /// and will be picked up by the next commit.
    pub fn clear_through(&mut self, generation: u64) {
        self.entries.retain(|_, (written, _)| *written > generation);
    }

    /// Returns `true` if no change is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Anything with a stable identity whose changes can be persisted.
///
/// Implementations use interior mutability: entities are shared as
/// `Arc<Self>` between the identity map, repositories and running handlers.
pub trait Entity: Send + Sync {
    /// Stable identity of the entity.
    fn id(&self) -> &TableId;

    /// Copy of the fields written since the last successful commit.
    fn changed_state(&self) -> ChangedState;

    /// Drop all pending changes.
    fn clear(&self);

    /// Drop pending changes written at or before `generation`.
    fn clear_through(&self, generation: u64);

    /// Lock serializing commits of this entity.
    ///
    /// Held from [`changed_state`](Entity::changed_state) until
    /// [`clear_through`](Entity::clear_through), so an older snapshot can
    /// never overwrite a newer one in storage.
    fn commit_lock(&self) -> &tokio::sync::Mutex<()>;
}
