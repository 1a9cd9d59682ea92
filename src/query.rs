//! Read-only access to the latest table contents.

use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::frame::Frame;
use crate::id::TableId;
use crate::mapper::Mapper;
use crate::table::TableSnapshot;

/// Snapshot queries for downstream consumers.
///
/// Reads go through the identity map, so a table currently being updated
/// is seen with its last committed in-memory state. Nothing is ever written
/// back.
#[derive(Debug, Clone)]
pub struct Snapshots {
    mapper: Mapper,
}

impl Snapshots {
    /// Query tables loaded through `mapper`.
    pub fn new(mapper: Mapper) -> Self {
        Self { mapper }
    }

    /// Latest payload of table `name` in `group`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NeverUpdated`] if the table was never loaded,
    /// [`SyncError::Config`] for an unknown group, or a storage error.
    pub async fn latest(&self, group: &str, name: &str) -> Result<Frame, SyncError> {
        let snapshot = self.snapshot(group, name).await?;
        snapshot.require_payload().cloned()
    }

    /// Latest payload of the only table of `group`.
    ///
    /// # Errors
    ///
    /// Same as [`latest`](Self::latest).
    pub async fn latest_singleton(&self, group: &str) -> Result<Frame, SyncError> {
        self.latest(group, group).await
    }

    /// Time table `name` in `group` was last updated.
    ///
    /// # Errors
    ///
    /// Same as [`latest`](Self::latest).
    pub async fn updated_at(&self, group: &str, name: &str) -> Result<DateTime<Utc>, SyncError> {
        let snapshot = self.snapshot(group, name).await?;
        snapshot
            .updated_at()
            .ok_or_else(|| SyncError::NeverUpdated(snapshot.id().clone()))
    }

    async fn snapshot(&self, group: &str, name: &str) -> Result<TableSnapshot, SyncError> {
        let id: TableId = self.mapper.registry().id(group, name)?;
        Ok(self.mapper.get(&id).await?.snapshot())
    }
}
