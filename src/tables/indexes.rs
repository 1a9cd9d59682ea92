//! Exchange index quotes.

use std::sync::Arc;

use async_trait::async_trait;

use super::{INDEXES, fetch_incremental, param, validate_appended};
use crate::error::{SyncError, ValidationError};
use crate::event::Event;
use crate::frame::Frame;
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// Daily closes of one index, named by its ticker.
pub struct Indexes {
    gateway: Arc<dyn Gateway>,
}

impl Indexes {
    /// Fetch index quotes through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TableKind for Indexes {
    fn group(&self) -> &str {
        INDEXES
    }

    fn update_required(&self, _table: &TableSnapshot, _event: &Event) -> bool {
        true
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event)
            .with_param(param::TICKER, table.id().name())
            .with_until(event.date());
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
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::FetchError;
    use crate::gateway::FnGateway;
    use crate::tables::col;
    use crate::tables::test_fixtures::{date, dated, snapshot};

    fn closes(rows: &[(chrono::NaiveDate, f64)]) -> Frame {
        dated(
            &[col::CLOSE],
            rows.iter().map(|&(d, v)| (d, vec![json!(v)])).collect(),
        )
    }

    #[tokio::test]
    async fn request_names_the_index() {
        let gateway = FnGateway::new(|request: FetchRequest| async move {
            assert_eq!(request.param(param::TICKER), Some("IMOEX"));
            assert_eq!(request.until, Some(date(2024, 3, 5)));
            Ok::<_, FetchError>(closes(&[(date(2024, 3, 5), 3200.0)]))
        });
        let kind = Indexes::new(Arc::new(gateway));
        let id = TableId::new("data", INDEXES, "IMOEX");
        let event = Event::IndexCalculated {
            ticker: "IMOEX".into(),
            date: date(2024, 3, 5),
        };

        let frame = kind.fetch(&snapshot(id, None), &event).await.expect("fetch");
        assert_eq!(frame.len(), 1);
    }

    #[tokio::test]
    async fn empty_download_keeps_history() {
        let kind = Indexes::new(crate::tables::test_fixtures::fixed(Frame::empty([col::CLOSE])));
        let id = TableId::new("data", INDEXES, "RVI");
        let held = closes(&[(date(2024, 3, 4), 20.0)]);
        let event = Event::IndexCalculated {
            ticker: "RVI".into(),
            date: date(2024, 3, 5),
        };

        let frame = kind
            .fetch(&snapshot(id, Some(held.clone())), &event)
            .await
            .expect("fetch");
        assert_eq!(frame, held);
    }
}
