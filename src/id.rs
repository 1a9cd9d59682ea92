//! Table identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Collection shared by all tables that are alone in their group.
pub const MISC_COLLECTION: &str = "misc";

/// Immutable `(namespace, group, name)` triple addressing exactly one table.
///
/// `group` selects the [`TableKind`](crate::TableKind) that governs the
/// table's update policy. Tables that are the only member of their group
/// use the group name as their own name (see [`TableId::singleton`]).
///
/// # Examples
///
/// ```
/// use tablesync::TableId;
///
/// let usd = TableId::singleton("data", "usd");
/// assert!(usd.is_singleton());
/// assert_eq!(usd.to_string(), "data.usd.usd");
///
/// let quotes = TableId::new("data", "quotes", "GAZP");
/// assert!(!quotes.is_singleton());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId {
    namespace: String,
    group: String,
    name: String,
}

impl TableId {
    /// Build an id from its three parts.
    pub fn new(
        namespace: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            group: group.into(),
            name: name.into(),
        }
    }

    /// Build the id of the single table in `group`.
    pub fn singleton(namespace: impl Into<String>, group: impl Into<String>) -> Self {
        let group = group.into();
        Self::new(namespace, group.clone(), group)
    }

    /// Namespace (storage database) the table lives in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Group that selects the table kind.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Name of the table within its group.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if this table is the only one in its group.
    pub fn is_singleton(&self) -> bool {
        self.name == self.group
    }

    /// Storage collection and document key for this id.
    ///
    /// Singleton tables share [`MISC_COLLECTION`]; all others are stored in a
    /// collection named after their group. The key is always the table name.
    pub fn storage_address(&self) -> (&str, &str) {
        if self.is_singleton() {
            (MISC_COLLECTION, &self.name)
        } else {
            (&self.group, &self.name)
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.namespace, self.group, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_uses_group_as_name() {
        let id = TableId::singleton("data", "securities");
        assert_eq!(id, TableId::new("data", "securities", "securities"));
        assert!(id.is_singleton());
    }

    #[test]
    fn singleton_maps_to_misc_collection() {
        let id = TableId::singleton("data", "cpi");
        assert_eq!(id.storage_address(), ("misc", "cpi"));
    }

    #[test]
    fn grouped_table_maps_to_group_collection() {
        let id = TableId::new("data", "dividends", "AKRN");
        assert_eq!(id.storage_address(), ("dividends", "AKRN"));
    }

    #[test]
    fn ids_with_equal_parts_are_equal_and_hash_alike() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(TableId::new("data", "quotes", "GAZP"));
        set.insert(TableId::new("data", "quotes", "GAZP"));
        assert_eq!(set.len(), 1);
    }
}
