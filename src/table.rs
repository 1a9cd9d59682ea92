//! The table entity and its update cycle.
//!
//! A [`Table`] pairs a [`TableId`] with a [`TableKind`] that supplies the
//! group-specific policy. [`Table::handle`] runs one update cycle under the
//! table's exclusive async lock:
//!
//! 1. ask the kind whether the event requires an update;
//! 2. fetch the new payload;
//! 3. validate it against the current payload;
//! 4. derive follow-up events from the new state;
//! 5. swap payload and timestamp together, recording both as changes.
//!
//! A failure in any step leaves the committed state untouched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::entity::{ChangeTracker, ChangedState, Entity};
use crate::error::{CodecError, ConfigError, SyncError, ValidationError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::id::TableId;

/// Field name of the payload in change sets and field tables.
pub const PAYLOAD_FIELD: &str = "payload";
/// Field name of the update timestamp in change sets and field tables.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Owned, point-in-time copy of a table's state handed to a [`TableKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableSnapshot {
    id: TableId,
    payload: Option<Frame>,
    updated_at: Option<DateTime<Utc>>,
}

impl TableSnapshot {
    /// Build a snapshot from its parts.
    pub fn new(id: TableId, payload: Option<Frame>, updated_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            payload,
            updated_at,
        }
    }

    /// Identity of the table.
    pub fn id(&self) -> &TableId {
        &self.id
    }

    /// Payload, `None` before the first load.
    pub fn payload(&self) -> Option<&Frame> {
        self.payload.as_ref()
    }

    /// Time of the last successful update.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Returns `true` once the table has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.updated_at.is_some()
    }

    /// Last index key of the payload, for incremental downloads.
    pub fn last_index(&self) -> Option<&IndexKey> {
        self.payload.as_ref().and_then(Frame::last_index)
    }

    /// Payload, or [`SyncError::NeverUpdated`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NeverUpdated`] if the table was never loaded.
    pub fn require_payload(&self) -> Result<&Frame, SyncError> {
        self.payload
            .as_ref()
            .ok_or_else(|| SyncError::NeverUpdated(self.id.clone()))
    }
}

/// Group-specific update policy.
///
/// One implementation exists per table group. The kind is stateless with
/// respect to individual tables: everything it needs about a table arrives
/// as a [`TableSnapshot`].
#[async_trait]
pub trait TableKind: Send + Sync + 'static {
    /// Group governed by this kind.
    fn group(&self) -> &str;

    /// Whether `event` makes the table stale.
    ///
    /// Never consulted for a table that was never loaded: such a table is
    /// always updated.
    fn update_required(&self, table: &TableSnapshot, event: &Event) -> bool;

    /// Produce the next payload, either as a full reload or by extending the
    /// current one.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`FetchError`](crate::FetchError) or any error
    /// raised while assembling the payload.
    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError>;

    /// Check `new` against the index discipline of the group.
    ///
    /// The default requires a strictly increasing index.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] describing the first violation.
    fn validate(
        &self,
        id: &TableId,
        old: Option<&Frame>,
        new: &Frame,
    ) -> Result<(), ValidationError> {
        let _ = old;
        new.check_unique_increasing(id)
    }

    /// Follow-up events implied by the new state.
    ///
    /// `table` holds the new payload; `previous` is the payload it replaces.
    /// The default derives nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the new payload lacks data the events need.
    fn derive_events(
        &self,
        table: &TableSnapshot,
        previous: Option<&Frame>,
        event: &Event,
    ) -> Result<Vec<Event>, SyncError> {
        let _ = (table, previous, event);
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
struct TableState {
    payload: Option<Frame>,
    updated_at: Option<DateTime<Utc>>,
    changes: ChangeTracker,
}

/// A named, versioned dataset kept in sync with an external source.
///
/// Shared as `Arc<Table>`. Reads return owned copies; the only way to change
/// the payload is [`handle`](Table::handle).
pub struct Table {
    id: TableId,
    kind: Arc<dyn TableKind>,
    /// Held for a whole update cycle.
    cycle: tokio::sync::Mutex<()>,
    /// Held by the mapper while this table's changes are written.
    commit: tokio::sync::Mutex<()>,
    /// Held only for reads and the final swap, never across an await.
    state: Mutex<TableState>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("updated_at", &self.updated_at())
            .finish_non_exhaustive()
    }
}

impl Table {
    /// Create an empty, never-loaded table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::GroupMismatch`] if `id` is not in the group
    /// governed by `kind`.
    pub fn new(id: TableId, kind: Arc<dyn TableKind>) -> Result<Self, ConfigError> {
        Self::restore(id, kind, None, None)
    }

    /// Rebuild a table from persisted state without recording changes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::GroupMismatch`] if `id` is not in the group
    /// governed by `kind`.
    pub fn restore(
        id: TableId,
        kind: Arc<dyn TableKind>,
        payload: Option<Frame>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ConfigError> {
        if id.group() != kind.group() {
            return Err(ConfigError::GroupMismatch {
                id,
                expected: kind.group().to_owned(),
            });
        }
        Ok(Self {
            id,
            kind,
            cycle: tokio::sync::Mutex::new(()),
            commit: tokio::sync::Mutex::new(()),
            state: Mutex::new(TableState {
                payload,
                updated_at,
                changes: ChangeTracker::default(),
            }),
        })
    }

    /// Identity of the table.
    pub fn id(&self) -> &TableId {
        &self.id
    }

    /// Copy of the payload.
    pub fn payload(&self) -> Option<Frame> {
        self.lock_state().payload.clone()
    }

    /// Time of the last successful update.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.lock_state().updated_at
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.lock_state();
        TableSnapshot::new(self.id.clone(), state.payload.clone(), state.updated_at)
    }

    /// Run one update cycle for `event` and return the follow-up events.
    ///
    /// Cycles of the same table never overlap; concurrent callers queue on
    /// the table's lock.
    ///
    /// # Errors
    ///
    /// Returns whatever the kind's fetch, validation or event derivation
    /// raised. The table keeps its previous payload and timestamp.
    pub async fn handle(&self, event: &Event) -> Result<Vec<Event>, SyncError> {
        let _cycle = self.cycle.lock().await;
        let current = self.snapshot();

        if current.is_loaded() && !self.kind.update_required(&current, event) {
            debug!(table = %self.id, event = %event.kind(), "table is up to date");
            return Ok(Vec::new());
        }

        let fresh = self.kind.fetch(&current, event).await?;
        self.kind.validate(&self.id, current.payload(), &fresh)?;

        let updated_at = next_timestamp(current.updated_at());
        let next = TableSnapshot::new(self.id.clone(), Some(fresh), Some(updated_at));
        let events = self.kind.derive_events(&next, current.payload(), event)?;

        let rows = next.payload().map_or(0, Frame::len);
        self.install(next.payload, updated_at)?;
        info!(
            table = %self.id,
            event = %event.kind(),
            rows,
            follow_ups = events.len(),
            "table updated"
        );
        Ok(events)
    }

    /// Swap payload and timestamp together and record both as changes.
    fn install(&self, payload: Option<Frame>, updated_at: DateTime<Utc>) -> Result<(), CodecError> {
        let encode = |field: &'static str, result: serde_json::Result<serde_json::Value>| {
            result.map_err(|source| CodecError::Field {
                id: self.id.clone(),
                field,
                source,
            })
        };
        let payload_value = encode(PAYLOAD_FIELD, serde_json::to_value(&payload))?;
        let updated_value = encode(UPDATED_AT_FIELD, serde_json::to_value(updated_at))?;

        let mut state = self.lock_state();
        state.payload = payload;
        state.updated_at = Some(updated_at);
        state.changes.record(PAYLOAD_FIELD, payload_value);
        state.changes.record(UPDATED_AT_FIELD, updated_value);
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Current time, nudged past `previous` so timestamps strictly increase.
fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + TimeDelta::microseconds(1),
        _ => now,
    }
}

impl Entity for Table {
    fn id(&self) -> &TableId {
        &self.id
    }

    fn changed_state(&self) -> ChangedState {
        self.lock_state().changes.changed_state()
    }

    fn clear(&self) {
        self.lock_state().changes.clear();
    }

    fn clear_through(&self, generation: u64) {
        self.lock_state().changes.clear_through(generation);
    }

    fn commit_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.commit
    }
}
