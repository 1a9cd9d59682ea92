//! Range of dates with trading history available on the exchange.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveTime, TimeZone, Utc};

use super::{Clock, TRADING_DATES, date_cell};
use crate::error::{SyncError, ValidationError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// Exchange time zone, UTC+3.
const MOEX_OFFSET_SECS: i32 = 3 * 3600;

/// Trading ends at midnight but results are published at 00:45.
const END_HOUR: u32 = 0;
const END_MINUTE: u32 = 45;

const COLUMNS: [&str; 2] = ["from", "till"];

/// Latest moment a trading day may have ended, as of `now`.
///
/// This is today's publication time in exchange time, or yesterday's if
/// today's has not come yet.
pub(crate) fn potential_end(now: DateTime<Utc>) -> DateTime<Utc> {
    let Some(moex) = FixedOffset::east_opt(MOEX_OFFSET_SECS) else {
        return now;
    };
    let local = now.with_timezone(&moex);
    let publish = NaiveTime::from_hms_opt(END_HOUR, END_MINUTE, 0).unwrap_or(NaiveTime::MIN);
    let mut end = local.date_naive().and_time(publish);
    if end > local.naive_local() {
        end = end.checked_sub_days(Days::new(1)).unwrap_or(end);
    }
    moex.from_local_datetime(&end)
        .single()
        .map_or(now, |dt| dt.with_timezone(&Utc))
}

/// Single-row table `{from, till}` describing the available trading history.
///
/// Stale once a new publication time has passed since the last update. A
/// change of `till` means a trading day has closed and emits
/// [`Event::TradingDayEnded`].
pub struct TradingDates {
    gateway: Arc<dyn Gateway>,
    clock: Clock,
}

impl TradingDates {
    /// Fetch the calendar through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            gateway,
            clock: Utc::now,
        }
    }

    /// Use `clock` instead of the system time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

#[async_trait]
impl TableKind for TradingDates {
    fn group(&self) -> &str {
        TRADING_DATES
    }

    fn update_required(&self, table: &TableSnapshot, _event: &Event) -> bool {
        match table.updated_at() {
            None => true,
            Some(updated_at) => potential_end((self.clock)()) > updated_at,
        }
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event);
        Ok(self.gateway.fetch(&request).await?)
    }

    fn validate(
        &self,
        id: &TableId,
        _old: Option<&Frame>,
        new: &Frame,
    ) -> Result<(), ValidationError> {
        if new.index() != [IndexKey::Int(0)] {
            return Err(ValidationError::Layout {
                id: id.clone(),
                reason: format!("expected a single row labelled 0, got {} rows", new.len()),
            });
        }
        if new.columns() != COLUMNS {
            return Err(ValidationError::Layout {
                id: id.clone(),
                reason: format!("expected columns {COLUMNS:?}, got {:?}", new.columns()),
            });
        }
        Ok(())
    }

    fn derive_events(
        &self,
        table: &TableSnapshot,
        previous: Option<&Frame>,
        _event: &Event,
    ) -> Result<Vec<Event>, SyncError> {
        let key = IndexKey::Int(0);
        let till = date_cell(table.require_payload()?, table.id(), &key, "till")?;
        let unchanged = previous
            .and_then(|old| date_cell(old, table.id(), &key, "till").ok())
            .is_some_and(|old_till| old_till == till);
        if unchanged {
            return Ok(Vec::new());
        }
        Ok(vec![Event::TradingDayEnded { date: till }])
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use serde_json::json;

    use super::*;
    use crate::tables::test_fixtures::{date, fixed, snapshot};

    fn calendar(till: &str) -> Frame {
        Frame::from_rows(COLUMNS, [(0_i64, vec![json!("1997-03-24"), json!(till)])])
            .expect("valid frame")
    }

    fn id() -> TableId {
        TableId::singleton("data", TRADING_DATES)
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid timestamp")
    }

    #[test]
    fn potential_end_before_publication_is_previous_day() {
        // 00:30 in Moscow is 21:30 UTC of the previous day.
        let now = utc("2024-03-04T21:30:00Z");
        assert_eq!(potential_end(now), utc("2024-03-03T21:45:00Z"));
    }

    #[test]
    fn potential_end_after_publication_is_same_day() {
        let now = utc("2024-03-05T10:00:00Z");
        assert_eq!(potential_end(now), utc("2024-03-04T21:45:00Z"));
    }

    #[test]
    fn stale_after_publication_time_passes() {
        let kind = TradingDates::new(fixed(calendar("2024-03-01")));
        let event = Event::AppStarted { at: Utc::now() };

        let mut table = snapshot(id(), Some(calendar("2024-03-01")));
        assert!(!kind.update_required(&table, &event), "just updated");

        table = TableSnapshot::new(
            id(),
            table.payload().cloned(),
            Some(Utc::now() - TimeDelta::days(2)),
        );
        assert!(kind.update_required(&table, &event));
    }

    #[test]
    fn layout_is_enforced() {
        let kind = TradingDates::new(fixed(calendar("2024-03-01")));
        kind.validate(&id(), None, &calendar("2024-03-01")).expect("valid layout");

        let two_rows = Frame::from_rows(
            COLUMNS,
            [
                (0_i64, vec![json!("a"), json!("b")]),
                (1_i64, vec![json!("c"), json!("d")]),
            ],
        )
        .expect("frame");
        assert!(matches!(
            kind.validate(&id(), None, &two_rows),
            Err(ValidationError::Layout { .. })
        ));

        let wrong_columns =
            Frame::from_rows(["till", "from"], [(0_i64, vec![json!("a"), json!("b")])])
                .expect("frame");
        assert!(kind.validate(&id(), None, &wrong_columns).is_err());
    }

    #[test]
    fn new_till_emits_trading_day_ended() {
        let kind = TradingDates::new(fixed(calendar("2024-03-01")));
        let new = snapshot(id(), Some(calendar("2024-03-01")));
        let event = Event::AppStarted { at: Utc::now() };

        let events = kind
            .derive_events(&new, Some(&calendar("2024-02-29")), &event)
            .expect("derive");
        assert_eq!(events, vec![Event::TradingDayEnded { date: date(2024, 3, 1) }]);

        let first_load = kind.derive_events(&new, None, &event).expect("derive");
        assert_eq!(first_load.len(), 1);
    }

    #[test]
    fn unchanged_till_emits_nothing() {
        let kind = TradingDates::new(fixed(calendar("2024-03-01")));
        let new = snapshot(id(), Some(calendar("2024-03-01")));
        let event = Event::AppStarted { at: Utc::now() };
        let events = kind
            .derive_events(&new, Some(&calendar("2024-03-01")), &event)
            .expect("derive");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn fetch_returns_gateway_frame() {
        let kind = TradingDates::new(fixed(calendar("2024-03-01")));
        let frame = kind
            .fetch(&snapshot(id(), None), &Event::AppStarted { at: Utc::now() })
            .await
            .expect("fetch");
        assert_eq!(frame, calendar("2024-03-01"));
    }
}
