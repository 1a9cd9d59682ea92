//! Object-document mapping and the identity map.
//!
//! The [`Mapper`] is the only component that talks to [`Storage`]. It turns
//! stored documents into [`Table`]s through a declarative field table and
//! persists each table's [`ChangedState`](crate::ChangedState) back. Every
//! table it hands out is registered in an [`IdentityMap`], so all callers
//! asking for the same id share one instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entity::Entity;
use crate::error::{CodecError, SyncError};
use crate::frame::Frame;
use crate::id::TableId;
use crate::registry::Registry;
use crate::storage::{Document, Storage};
use crate::table::{PAYLOAD_FIELD, Table, UPDATED_AT_FIELD};

/// Document key holding the table name.
pub const ID_KEY: &str = "_id";

/// Value transformation applied to one field on its way to or from storage.
pub type FieldCodec = fn(Value) -> Result<Value, serde_json::Error>;

/// How one entity field is laid out in a stored document.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc {
    /// Field name as recorded by the change tracker.
    pub field: &'static str,
    /// Key of the field in the stored document.
    pub doc_key: &'static str,
    /// Applied to the field value before it is written.
    pub encode: Option<FieldCodec>,
    /// Applied to the stored value before it is parsed.
    pub decode: Option<FieldCodec>,
}

/// Document layout of a [`Table`].
pub const TABLE_FIELDS: &[FieldDesc] = &[
    FieldDesc {
        field: PAYLOAD_FIELD,
        doc_key: "data",
        encode: None,
        decode: None,
    },
    FieldDesc {
        field: UPDATED_AT_FIELD,
        doc_key: "timestamp",
        encode: None,
        decode: None,
    },
];

/// `TableId -> Weak<Table>` cache.
///
/// Holds no strong references: a table no caller uses any more is dropped
/// and its entry is pruned on the next insert.
#[derive(Debug, Default)]
pub struct IdentityMap {
    tables: Mutex<HashMap<TableId, Weak<Table>>>,
}

impl IdentityMap {
    /// Live table registered for `id`.
    pub fn get(&self, id: &TableId) -> Option<Arc<Table>> {
        self.lock().get(id).and_then(Weak::upgrade)
    }

    /// Register `table` unless a live table with its id already exists.
    ///
    /// Returns the registered instance and whether it is `table`.
    pub fn insert_or_get(&self, table: Arc<Table>) -> (Arc<Table>, bool) {
        let mut tables = self.lock();
        if let Some(existing) = tables.get(table.id()).and_then(Weak::upgrade) {
            return (existing, false);
        }
        tables.retain(|_, weak| weak.strong_count() > 0);
        tables.insert(table.id().clone(), Arc::downgrade(&table));
        (table, true)
    }

    /// Number of live tables.
    pub fn live(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TableId, Weak<Table>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Loads and persists tables.
///
/// `Clone` is cheap; clones share the identity map and storage.
#[derive(Clone)]
pub struct Mapper {
    registry: Registry,
    storage: Arc<dyn Storage>,
    identity: Arc<IdentityMap>,
    fields: &'static [FieldDesc],
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("registry", &self.registry)
            .field("live_tables", &self.identity.live())
            .finish_non_exhaustive()
    }
}

impl Mapper {
    /// Create a mapper with the standard [`TABLE_FIELDS`] layout.
    pub fn new(registry: Registry, storage: Arc<dyn Storage>) -> Self {
        Self {
            registry,
            storage,
            identity: Arc::new(IdentityMap::default()),
            fields: TABLE_FIELDS,
        }
    }

    /// Use a custom document layout.
    pub fn with_fields(mut self, fields: &'static [FieldDesc]) -> Self {
        self.fields = fields;
        self
    }

    /// Registry used to construct tables.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Identity map shared by all clones.
    pub fn identity(&self) -> &IdentityMap {
        &self.identity
    }

    /// Resolve `id` to its single live table.
    ///
    /// Looks in the identity map, then in storage, and otherwise creates an
    /// empty table. The map is checked again after the storage read; if a
    /// concurrent caller registered the id meanwhile, its table is returned
    /// and the one built here is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an id the registry cannot build,
    /// [`SyncError::Storage`] if the read fails and [`SyncError::Codec`] if
    /// the stored document is malformed.
    pub async fn get(&self, id: &TableId) -> Result<Arc<Table>, SyncError> {
        if let Some(table) = self.identity.get(id) {
            debug!(table = %id, "identity map hit");
            return Ok(table);
        }
        self.registry.check(id)?;

        let (collection, key) = id.storage_address();
        let document = self.storage.get(id.namespace(), collection, key).await?;
        let table = match document {
            Some(doc) => {
                let (payload, updated_at) = self.decode(id, doc)?;
                self.registry.restore(id.clone(), payload, updated_at)?
            }
            None => self.registry.create(id.clone())?,
        };

        let (table, inserted) = self.identity.insert_or_get(Arc::new(table));
        if !inserted {
            debug!(table = %id, "lost identity map race; using existing instance");
        }
        Ok(table)
    }

    /// Persist the pending changes of `entity`.
    ///
    /// An entity without pending changes causes no storage call. Commits of
    /// the same entity are serialized on its commit lock.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Codec`] if a field encoder fails and
    /// [`SyncError::Storage`] if the write fails. The changes stay pending.
    pub async fn commit(&self, entity: &dyn Entity) -> Result<(), SyncError> {
        let _commit = entity.commit_lock().lock().await;
        let changes = entity.changed_state();
        let id = entity.id();
        if changes.is_empty() {
            debug!(table = %id, "nothing to commit");
            return Ok(());
        }

        let mut document = Document::new();
        document.insert(ID_KEY.to_owned(), Value::String(id.name().to_owned()));
        for desc in self.fields {
            let Some(value) = changes.get(desc.field) else {
                continue;
            };
            let value = apply(desc.encode, value.clone())
                .map_err(|source| codec_error(id, desc.field, source))?;
            document.insert(desc.doc_key.to_owned(), value);
        }

        let (collection, key) = id.storage_address();
        self.storage
            .replace(id.namespace(), collection, key, document)
            .await?;
        entity.clear_through(changes.generation());
        info!(table = %id, fields = changes.len(), "table committed");
        Ok(())
    }

    fn decode(
        &self,
        id: &TableId,
        mut document: Document,
    ) -> Result<(Option<Frame>, Option<DateTime<Utc>>), CodecError> {
        let mut payload = None;
        let mut updated_at = None;
        for desc in self.fields {
            let Some(raw) = document.remove(desc.doc_key) else {
                continue;
            };
            let result = apply(desc.decode, raw);
            let decoded = match desc.field {
                PAYLOAD_FIELD => result.and_then(parse::<Frame>).map(|v| payload = v),
                UPDATED_AT_FIELD => result
                    .and_then(parse::<DateTime<Utc>>)
                    .map(|v| updated_at = v),
                _ => Ok(()),
            };
            if let Err(source) = decoded {
                warn!(
                    table = %id,
                    field = desc.field,
                    error = %source,
                    "stored document is corrupt"
                );
                return Err(codec_error(id, desc.field, source));
            }
        }
        Ok((payload, updated_at))
    }
}

fn apply(codec: Option<FieldCodec>, value: Value) -> Result<Value, serde_json::Error> {
    match codec {
        Some(f) => f(value),
        None => Ok(value),
    }
}

fn parse<T: DeserializeOwned>(value: Value) -> Result<Option<T>, serde_json::Error> {
    serde_json::from_value(value)
}

fn codec_error(id: &TableId, field: &'static str, source: serde_json::Error) -> CodecError {
    CodecError::Field {
        id: id.clone(),
        field,
        source,
    }
}
