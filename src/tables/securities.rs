//! Securities traded on the exchange boards the engine follows.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::{Value, json};

use super::{SECURITIES, col, event_date, param, unexpected};
use crate::error::{FetchError, SyncError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::gateway::{FetchRequest, Gateway};
use crate::table::{TableKind, TableSnapshot};

/// Length of an ordinary share's ticker; a preferred share adds a suffix.
const ORDINARY_TICKER_LEN: usize = 4;
const PREFERRED_SUFFIX: char = 'P';

/// Boards whose listings make up the table.
const BOARDS: [(&str, &str); 3] = [
    ("shares", "TQBR"),
    ("shares", "TQTF"),
    ("foreignshares", "FQBR"),
];

/// Type code of `ticker` listed on `board`.
fn ticker_type(board: &str, ticker: &str) -> Option<i64> {
    match board {
        "TQTF" => Some(col::ETF),
        "FQBR" => Some(col::FOREIGN),
        _ if ticker.len() == ORDINARY_TICKER_LEN => Some(col::ORDINARY),
        _ if ticker.len() == ORDINARY_TICKER_LEN + 1 && ticker.ends_with(PREFERRED_SUFFIX) => {
            Some(col::PREFERRED)
        }
        _ => None,
    }
}

/// Ticker-indexed list of traded securities.
///
/// Reloaded in full whenever the dollar rate is refreshed. Each board's
/// listing gains the [`col::MARKET`] and [`col::TICKER_TYPE`] columns; the
/// gateway must supply at least [`col::ISIN`].
pub struct Securities {
    gateway: Arc<dyn Gateway>,
}

impl Securities {
    /// Fetch listings through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    async fn fetch_board(
        &self,
        request: FetchRequest,
        market: &str,
        board: &str,
    ) -> Result<Frame, SyncError> {
        let request = request
            .with_param(param::MARKET, market)
            .with_param(param::BOARD, board);
        let listing = self.gateway.fetch(&request).await?;

        let types = listing
            .index()
            .iter()
            .map(|key| {
                let ticker = key.as_text().unwrap_or_default();
                ticker_type(board, ticker).map(Value::from).ok_or_else(|| {
                    FetchError::Malformed {
                        source_name: format!("{market}/{board}"),
                        message: format!("unrecognized ticker '{key}'"),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let markets = vec![json!(market); listing.len()];

        Ok(listing
            .with_column(col::MARKET, markets)?
            .with_column(col::TICKER_TYPE, types)?)
    }
}

#[async_trait]
impl TableKind for Securities {
    fn group(&self) -> &str {
        SECURITIES
    }

    fn update_required(&self, _table: &TableSnapshot, _event: &Event) -> bool {
        true
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event);
        let listings = try_join_all(
            BOARDS
                .iter()
                .map(|&(market, board)| self.fetch_board(request.clone(), market, board)),
        )
        .await?;

        let mut listings = listings.into_iter();
        let Some(first) = listings.next() else {
            return Ok(Frame::default());
        };
        let all = listings.try_fold(first, |acc, next| acc.concat(&next))?;
        Ok(all.sorted_by_index())
    }

    fn derive_events(
        &self,
        table: &TableSnapshot,
        _previous: Option<&Frame>,
        event: &Event,
    ) -> Result<Vec<Event>, SyncError> {
        let usd = event.usd().ok_or_else(|| unexpected(SECURITIES, event))?;
        Ok(vec![Event::SecurityListRefreshed {
            date: event_date(SECURITIES, event)?,
            securities: table.require_payload()?.clone(),
            usd: usd.clone(),
        }])
    }
}

/// `(ticker, isin, market)` of every row of a securities payload.
pub(crate) fn listed(securities: &Frame) -> Result<Vec<(String, String, String)>, FetchError> {
    let malformed = |message: String| FetchError::Malformed {
        source_name: SECURITIES.to_owned(),
        message,
    };
    let isin = securities
        .column_position(col::ISIN)
        .ok_or_else(|| malformed(format!("missing column '{}'", col::ISIN)))?;
    let market = securities
        .column_position(col::MARKET)
        .ok_or_else(|| malformed(format!("missing column '{}'", col::MARKET)))?;

    securities
        .iter()
        .map(|(key, row)| match (key, row[isin].as_str(), row[market].as_str()) {
            (IndexKey::Text(ticker), Some(isin), Some(market)) => {
                Ok((ticker.clone(), isin.to_owned(), market.to_owned()))
            }
            _ => Err(malformed(format!("unusable row '{key}'"))),
        })
        .collect()
}
