//! Dividend history in rubles.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{DIVIDENDS, USD, col, param, unexpected};
use crate::error::{FetchError, SyncError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// Dividends of one ticker, indexed by record date, summed per date and
/// converted to rubles.
///
/// Loaded once when the ticker first trades; reloaded only on an explicit
/// [`Event::DividendDataRequested`]. The gateway answers with the columns
/// [`col::DIVIDENDS`] and [`col::CURRENCY`]; the stored table has a single
/// column named after the ticker.
pub struct Dividends {
    gateway: Arc<dyn Gateway>,
}

impl Dividends {
    /// Fetch raw dividends through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl TableKind for Dividends {
    fn group(&self) -> &str {
        DIVIDENDS
    }

    fn update_required(&self, _table: &TableSnapshot, event: &Event) -> bool {
        matches!(event, Event::DividendDataRequested { .. })
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let usd = event.usd().ok_or_else(|| unexpected(DIVIDENDS, event))?;
        let market = match event {
            Event::TickerTraded { market, .. } => Some(market.as_str()),
            Event::DividendDataRequested { market, .. } => market.as_deref(),
            _ => None,
        };

        let mut request = FetchRequest::new(table.id().clone(), event)
            .with_param(param::TICKER, table.id().name());
        if let Some(market) = market {
            request = request.with_param(param::MARKET, market);
        }
        let raw = self.gateway.fetch(&request).await?;
        to_rubles(&raw, usd, table.id())
    }
}

/// Convert `raw` dividends to rubles using the USD close in effect on each
/// date, then sum the dividends sharing a date.
fn to_rubles(raw: &Frame, usd: &Frame, id: &TableId) -> Result<Frame, SyncError> {
    let malformed = |message: String| FetchError::Malformed {
        source_name: id.to_string(),
        message,
    };
    let column = |frame: &Frame, name: &str| {
        frame
            .column_position(name)
            .ok_or_else(|| malformed(format!("missing column '{name}'")))
    };
    let amount_col = column(raw, col::DIVIDENDS)?;
    let currency_col = column(raw, col::CURRENCY)?;
    let close_col = column(usd, col::CLOSE)?;

    let mut totals: Vec<(IndexKey, f64)> = Vec::new();
    for (key, row) in raw.sorted_by_index().iter() {
        let amount = row[amount_col]
            .as_f64()
            .ok_or_else(|| malformed(format!("non-numeric dividend at {key}")))?;
        let rate = match row[currency_col].as_str() {
            Some(col::RUR) => 1.0,
            Some(col::USD) => rate_on(usd, close_col, key).ok_or_else(|| SyncError::MissingRow {
                id: TableId::singleton(id.namespace(), USD),
                key: key.to_string(),
            })?,
            other => return Err(malformed(format!("unknown currency {other:?} at {key}")).into()),
        };
        match totals.last_mut() {
            Some((last, total)) if last == key => *total += amount * rate,
            _ => totals.push((key.clone(), amount * rate)),
        }
    }

    Ok(Frame::from_rows(
        [id.name()],
        totals.into_iter().map(|(key, total)| (key, vec![json!(total)])),
    )?)
}

/// Last USD close at or before `key`.
fn rate_on(usd: &Frame, close_col: usize, key: &IndexKey) -> Option<f64> {
    let position = usd.index().partition_point(|k| k <= key);
    let row = usd.rows().get(position.checked_sub(1)?)?;
    row[close_col].as_f64()
}
