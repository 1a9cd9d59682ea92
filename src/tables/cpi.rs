//! Monthly consumer price index.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, Days, Months, NaiveDate, Utc};

use super::{CPI, Clock, col};
use crate::error::{SyncError, ValidationError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey, check_history};
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// A month's CPI multiplier can never be this low.
const MINIMUM_MONTHLY_CPI: f64 = 0.99;

fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().is_none_or(|next| next.month() != date.month())
}

/// Last day of the month following the month ending on `month_end`.
fn next_month_end(month_end: NaiveDate) -> Option<NaiveDate> {
    month_end
        .succ_opt()?
        .checked_add_months(Months::new(1))?
        .checked_sub_days(Days::new(1))
}

/// CPI indexed by the last day of each month.
///
/// Published monthly, so the table is stale only once the month after the
/// last covered one has closed. Published history never changes.
pub struct Cpi {
    gateway: Arc<dyn Gateway>,
    clock: Clock,
}

impl Cpi {
    /// Fetch CPI through `gateway`.
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
impl TableKind for Cpi {
    fn group(&self) -> &str {
        CPI
    }

    fn update_required(&self, table: &TableSnapshot, _event: &Event) -> bool {
        let today = (self.clock)().date_naive();
        let covered = table.last_index().and_then(IndexKey::as_date);
        match covered.and_then(next_month_end) {
            Some(next_end) => next_end < today,
            None => true,
        }
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event);
        Ok(self.gateway.fetch(&request).await?)
    }

    fn validate(
        &self,
        id: &TableId,
        old: Option<&Frame>,
        new: &Frame,
    ) -> Result<(), ValidationError> {
        new.check_unique_increasing(id)?;
        let column = new.column_position(col::CPI).ok_or_else(|| ValidationError::Layout {
            id: id.clone(),
            reason: format!("missing column '{}'", col::CPI),
        })?;
        for (key, row) in new.iter() {
            if !key.as_date().is_some_and(is_month_end) {
                return Err(ValidationError::Layout {
                    id: id.clone(),
                    reason: format!("{key} is not the last day of a month"),
                });
            }
            if !row[column].as_f64().is_some_and(|cpi| cpi > MINIMUM_MONTHLY_CPI) {
                return Err(ValidationError::Layout {
                    id: id.clone(),
                    reason: format!("implausible CPI {} at {key}", row[column]),
                });
            }
        }
        check_history(id, old, new)
    }
}
