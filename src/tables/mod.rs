//! Table kinds of the market-data domain.
//!
//! | group | refreshed on | source | follow-up |
//! |---|---|---|---|
//! | `trading_dates` | `AppStarted` | exchange calendar | `TradingDayEnded` |
//! | `CPI` | `TradingDayEnded` | statistics office | none |
//! | `usd` | `TradingDayEnded` | exchange quotes | `UsdUpdated` |
//! | `securities` | `UsdUpdated` | exchange listings | `SecurityListRefreshed` |
//! | `indexes` | `IndexCalculated` | exchange quotes | none |
//! | `quotes` | `TickerTraded` | exchange quotes | none |
//! | `dividends` | `TickerTraded`, `DividendDataRequested` | dividend feed | none |

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::error::{ConfigError, SyncError, ValidationError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey, check_history, merge_incremental};
use crate::gateway::{FetchRequest, Gateway, Gateways};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

mod cpi;
mod dividends;
mod indexes;
mod quotes;
mod securities;
mod trading_dates;
mod usd;

pub use cpi::Cpi;
pub use dividends::Dividends;
pub use indexes::Indexes;
pub use quotes::Quotes;
pub use securities::Securities;
pub use trading_dates::TradingDates;
pub use usd::Usd;

pub(crate) use securities::listed;

/// Exchange calendar.
pub const TRADING_DATES: &str = "trading_dates";
/// Consumer price index.
pub const CPI: &str = "CPI";
/// USD exchange rate.
pub const USD: &str = "usd";
/// Traded securities.
pub const SECURITIES: &str = "securities";
/// Index quotes, one table per index.
pub const INDEXES: &str = "indexes";
/// Security quotes, one table per ticker.
pub const QUOTES: &str = "quotes";
/// Dividends, one table per ticker.
pub const DIVIDENDS: &str = "dividends";

/// Indexes refreshed at the end of every trading day.
pub const INDEX_TICKERS: [&str; 3] = ["MCFTRR", "IMOEX", "RVI"];

/// Column names shared by gateways and table kinds.
pub mod col {
    /// ISIN of a security.
    pub const ISIN: &str = "ISIN";
    /// Market a security trades on.
    pub const MARKET: &str = "MARKET";
    /// Security type code, see [`ORDINARY`] and friends.
    pub const TICKER_TYPE: &str = "TICKER_TYPE";
    /// Closing price.
    pub const CLOSE: &str = "CLOSE";
    /// Daily turnover.
    pub const TURNOVER: &str = "TURNOVER";
    /// Monthly CPI multiplier.
    pub const CPI: &str = "CPI";
    /// Dividend amount in its original currency.
    pub const DIVIDENDS: &str = "DIVIDENDS";
    /// Currency of a dividend.
    pub const CURRENCY: &str = "CURRENCY";

    /// Ruble currency code.
    pub const RUR: &str = "RUR";
    /// Dollar currency code.
    pub const USD: &str = "USD";

    /// Ordinary share.
    pub const ORDINARY: i64 = 0;
    /// Preferred share.
    pub const PREFERRED: i64 = 1;
    /// Foreign share.
    pub const FOREIGN: i64 = 2;
    /// Exchange-traded fund.
    pub const ETF: i64 = 3;
}

/// Request parameters understood by gateways.
pub mod param {
    /// Security or index ticker.
    pub const TICKER: &str = "ticker";
    /// ISIN shared by a security's tickers.
    pub const ISIN: &str = "isin";
    /// Exchange market.
    pub const MARKET: &str = "market";
    /// Trading board within a market.
    pub const BOARD: &str = "board";
}

/// Source of the current time, injectable for tests.
pub type Clock = fn() -> DateTime<Utc>;

/// One instance of every kind above.
pub fn standard_kinds(gateways: &Gateways) -> Vec<Arc<dyn TableKind>> {
    vec![
        Arc::new(TradingDates::new(Arc::clone(&gateways.trading_dates))),
        Arc::new(Cpi::new(Arc::clone(&gateways.cpi))),
        Arc::new(Usd::new(Arc::clone(&gateways.usd))),
        Arc::new(Securities::new(Arc::clone(&gateways.securities))),
        Arc::new(Indexes::new(Arc::clone(&gateways.indexes))),
        Arc::new(Quotes::new(
            Arc::clone(&gateways.aliases),
            Arc::clone(&gateways.quotes),
        )),
        Arc::new(Dividends::new(Arc::clone(&gateways.dividends))),
    ]
}

pub(crate) fn unexpected(group: &str, event: &Event) -> SyncError {
    ConfigError::UnexpectedEvent {
        group: group.to_owned(),
        event: event.kind().as_str(),
    }
    .into()
}

/// Trading date of `event`, or [`ConfigError::UnexpectedEvent`].
pub(crate) fn event_date(group: &str, event: &Event) -> Result<NaiveDate, SyncError> {
    event.date().ok_or_else(|| unexpected(group, event))
}

/// Download rows after the table's last index and splice them on.
///
/// The download restarts at the last held row, which it replaces.
pub(crate) async fn fetch_incremental(
    gateway: &dyn Gateway,
    request: FetchRequest,
    table: &TableSnapshot,
) -> Result<Frame, SyncError> {
    let request = request.with_since(table.last_index().cloned());
    let fresh = gateway.fetch(&request).await?;
    Ok(merge_incremental(table.payload(), fresh)?)
}

/// Strictly increasing index and unchanged history.
pub(crate) fn validate_appended(
    id: &TableId,
    old: Option<&Frame>,
    new: &Frame,
) -> Result<(), ValidationError> {
    new.check_unique_increasing(id)?;
    check_history(id, old, new)
}

fn cell<'a>(
    frame: &'a Frame,
    id: &TableId,
    key: &IndexKey,
    column: &str,
) -> Result<&'a Value, SyncError> {
    frame.value(key, column).ok_or_else(|| SyncError::MissingRow {
        id: id.clone(),
        key: format!("{key}/{column}"),
    })
}

/// Cell at `key`, `column` as a string.
pub(crate) fn text_cell(
    frame: &Frame,
    id: &TableId,
    key: &IndexKey,
    column: &str,
) -> Result<String, SyncError> {
    match cell(frame, id, key, column)? {
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

/// Cell at `key`, `column` as a `YYYY-MM-DD` date.
pub(crate) fn date_cell(
    frame: &Frame,
    id: &TableId,
    key: &IndexKey,
    column: &str,
) -> Result<NaiveDate, SyncError> {
    let value = cell(frame, id, key, column)?;
    value
        .as_str()
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .ok_or_else(|| SyncError::MissingRow {
            id: id.clone(),
            key: format!("{key}/{column}={value}"),
        })
}
