//! Dollar exchange rate.

use std::sync::Arc;

use async_trait::async_trait;

use super::{USD, event_date, fetch_incremental, validate_appended};
use crate::error::{SyncError, ValidationError};
use crate::event::Event;
use crate::frame::Frame;
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// Daily USD quotes indexed by trading date.
///
/// Refreshed at the end of every trading day by downloading the days after
/// the last one held. Every refresh announces the new history with
/// [`Event::UsdUpdated`].
pub struct Usd {
    gateway: Arc<dyn Gateway>,
}

impl Usd {
    /// Fetch quotes through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TableKind for Usd {
    fn group(&self) -> &str {
        USD
    }

    fn update_required(&self, _table: &TableSnapshot, _event: &Event) -> bool {
        true
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event).with_until(event.date());
        fetch_incremental(self.gateway.as_ref(), request, table).await
    }

    fn validate(
        &self,
        id: &TableId,
        old: Option<&Frame>,
        new: &Frame,
    ) -> Result<(), ValidationError> {
        validate_appended(id, old, new)
    }

    fn derive_events(
        &self,
        table: &TableSnapshot,
        _previous: Option<&Frame>,
        event: &Event,
    ) -> Result<Vec<Event>, SyncError> {
        Ok(vec![Event::UsdUpdated {
            date: event_date(USD, event)?,
            usd: table.require_payload()?.clone(),
        }])
    }
}
