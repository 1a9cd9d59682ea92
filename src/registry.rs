//! Group name to [`TableKind`] lookup for one namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ConfigError;
use crate::frame::Frame;
use crate::gateway::Gateways;
use crate::id::TableId;
use crate::table::{Table, TableKind};
use crate::tables;

/// Maps each table group to the kind that governs it.
///
/// Consulted by the [`Mapper`](crate::Mapper) when constructing tables and
/// by event handlers when addressing them. `Clone` is cheap.
#[derive(Clone)]
pub struct Registry {
    namespace: Arc<str>,
    kinds: BTreeMap<String, Arc<dyn TableKind>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("namespace", &self.namespace)
            .field("groups", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry serving `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Arc::from(namespace.into()),
            kinds: BTreeMap::new(),
        }
    }

    /// Registry with every market-data table kind, fetching through
    /// `gateways`.
    pub fn standard(namespace: impl Into<String>, gateways: &Gateways) -> Self {
        let mut registry = Self::new(namespace);
        for kind in tables::standard_kinds(gateways) {
            registry.kinds.insert(kind.group().to_owned(), kind);
        }
        registry
    }

    /// Add a kind.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateGroup`] if its group is already taken.
    pub fn register(mut self, kind: Arc<dyn TableKind>) -> Result<Self, ConfigError> {
        let group = kind.group().to_owned();
        if self.kinds.contains_key(&group) {
            return Err(ConfigError::DuplicateGroup(group));
        }
        self.kinds.insert(group, kind);
        Ok(self)
    }

    /// Namespace served by this registry.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Registered group names, sorted.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    /// Kind governing `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] if nothing is registered for it.
    pub fn kind(&self, group: &str) -> Result<Arc<dyn TableKind>, ConfigError> {
        self.kinds
            .get(group)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGroup(group.to_owned()))
    }

    /// Address table `name` of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] if the group is not registered.
    pub fn id(&self, group: &str, name: &str) -> Result<TableId, ConfigError> {
        self.kind(group)?;
        Ok(TableId::new(self.namespace(), group, name))
    }

    /// Address the only table of `group`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownGroup`] if the group is not registered.
    pub fn singleton(&self, group: &str) -> Result<TableId, ConfigError> {
        self.id(group, group)
    }

    /// Check that `id` can be constructed by this registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `id` is outside this namespace or its
    /// group is unknown.
    pub fn check(&self, id: &TableId) -> Result<(), ConfigError> {
        if id.namespace() != self.namespace() {
            return Err(ConfigError::NamespaceMismatch {
                id: id.clone(),
                expected: self.namespace().to_owned(),
            });
        }
        self.kind(id.group()).map(|_| ())
    }

    /// Construct an empty table for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `id` is outside this namespace or its
    /// group is unknown.
    pub fn create(&self, id: TableId) -> Result<Table, ConfigError> {
        self.restore(id, None, None)
    }

    /// Construct a table for `id` from persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `id` is outside this namespace or its
    /// group is unknown.
    pub fn restore(
        &self,
        id: TableId,
        payload: Option<Frame>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Result<Table, ConfigError> {
        self.check(&id)?;
        let kind = self.kind(id.group())?;
        Table::restore(id, kind, payload, updated_at)
    }
}
