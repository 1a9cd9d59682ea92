//! Per-transaction view of the mapper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::SyncError;
use crate::id::TableId;
use crate::mapper::Mapper;
use crate::registry::Registry;
use crate::table::Table;

/// Loads tables through the [`Mapper`] and remembers every table it handed
/// out, so the owning [`UnitOfWork`](crate::UnitOfWork) knows what to
/// commit.
///
/// Clones share the same `seen` set. Holding a table in `seen` keeps it
/// alive in the identity map until the unit of work ends.
#[derive(Clone)]
pub struct Repository {
    mapper: Mapper,
    seen: Arc<Mutex<HashMap<TableId, Arc<Table>>>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("seen", &self.seen_ids())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create a repository with an empty `seen` set.
    pub fn new(mapper: Mapper) -> Self {
        Self {
            mapper,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registry used to address tables.
    pub fn registry(&self) -> &Registry {
        self.mapper.registry()
    }

    /// Load the table `id` and record it as touched.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Mapper::get`] returns.
    pub async fn get(&self, id: &TableId) -> Result<Arc<Table>, SyncError> {
        let table = self.mapper.get(id).await?;
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::clone(&table));
        Ok(table)
    }

    /// Load table `name` of `group` in the registry's namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an unknown group, otherwise whatever
    /// [`Mapper::get`] returns.
    pub async fn get_group(&self, group: &str, name: &str) -> Result<Arc<Table>, SyncError> {
        let id = self.registry().id(group, name)?;
        self.get(&id).await
    }

    /// Load the only table of `group`.
    ///
    /// # Errors
    ///
    /// Same as [`get_group`](Self::get_group).
    pub async fn get_singleton(&self, group: &str) -> Result<Arc<Table>, SyncError> {
        self.get_group(group, group).await
    }

    /// Every table loaded so far.
    pub fn seen(&self) -> Vec<Arc<Table>> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Ids of every table loaded so far, sorted.
    pub fn seen_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<_> = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}
