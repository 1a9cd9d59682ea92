//! Daily quotes of individual securities.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use super::{QUOTES, col, fetch_incremental, param, unexpected, validate_appended};
use crate::error::{FetchError, SyncError, ValidationError};
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::gateway::{FetchRequest, Gateway};
use crate::id::TableId;
use crate::table::{TableKind, TableSnapshot};

/// Date-indexed quotes of one ticker.
///
/// The first load gathers the history of every ticker that ever traded
/// under the same ISIN and keeps, for each date, the row with the largest
/// [`col::TURNOVER`]. Later loads only extend the ticker's own history.
pub struct Quotes {
    aliases: Arc<dyn Gateway>,
    quotes: Arc<dyn Gateway>,
}

impl Quotes {
    /// Resolve ISINs through `aliases` and download through `quotes`.
    pub fn new(aliases: Arc<dyn Gateway>, quotes: Arc<dyn Gateway>) -> Self {
        Self { aliases, quotes }
    }

    /// Tickers sharing the ISIN of the traded ticker, including itself.
    async fn alias_tickers(
        &self,
        table: &TableSnapshot,
        event: &Event,
        isin: &str,
    ) -> Result<Vec<String>, SyncError> {
        let request = FetchRequest::new(table.id().clone(), event).with_param(param::ISIN, isin);
        let aliases = self.aliases.fetch(&request).await?;
        let mut tickers: Vec<String> = aliases
            .index()
            .iter()
            .filter_map(|key| key.as_text().map(str::to_owned))
            .collect();
        if tickers.is_empty() {
            tickers.push(table.id().name().to_owned());
        }
        Ok(tickers)
    }

    /// Full history of all aliases, one row per date.
    async fn first_load(
        &self,
        table: &TableSnapshot,
        event: &Event,
        isin: &str,
        market: &str,
    ) -> Result<Frame, SyncError> {
        let tickers = self.alias_tickers(table, event, isin).await?;
        let requests = tickers.iter().map(|ticker| {
            let request = FetchRequest::new(table.id().clone(), event)
                .with_param(param::TICKER, ticker.as_str())
                .with_param(param::MARKET, market)
                .with_until(event.date());
            async move { self.quotes.fetch(&request).await }
        });
        let histories = try_join_all(requests).await?;

        let mut histories = histories.into_iter();
        let Some(first) = histories.next() else {
            return Ok(Frame::default());
        };
        let all = histories.try_fold(first, |acc, next| acc.concat(&next))?;
        busiest_per_date(&all, table.id())
    }
}

/// Sort by `(date, turnover)` and keep the last row of each date.
fn busiest_per_date(frame: &Frame, id: &TableId) -> Result<Frame, SyncError> {
    let turnover = frame
        .column_position(col::TURNOVER)
        .ok_or_else(|| FetchError::Malformed {
            source_name: id.to_string(),
            message: format!("missing column '{}'", col::TURNOVER),
        })?;

    let mut rows: Vec<(&IndexKey, &[serde_json::Value])> = frame.iter().collect();
    rows.sort_by(|(ka, ra), (kb, rb)| {
        ka.cmp(kb).then_with(|| {
            let (ta, tb) = (ra[turnover].as_f64(), rb[turnover].as_f64());
            ta.partial_cmp(&tb).unwrap_or(Ordering::Equal)
        })
    });

    let sorted = Frame::from_rows(
        frame.columns().iter().cloned(),
        rows.into_iter().map(|(key, row)| (key.clone(), row.to_vec())),
    )?;
    Ok(sorted.last_per_index())
}

#[async_trait]
impl TableKind for Quotes {
    fn group(&self) -> &str {
        QUOTES
    }

    fn update_required(&self, _table: &TableSnapshot, _event: &Event) -> bool {
        true
    }

    async fn fetch(&self, table: &TableSnapshot, event: &Event) -> Result<Frame, SyncError> {
        let Event::TickerTraded { isin, market, .. } = event else {
            return Err(unexpected(QUOTES, event));
        };
        if !table.is_loaded() {
            return self.first_load(table, event, isin, market).await;
        }
        let request = FetchRequest::new(table.id().clone(), event)
            .with_param(param::TICKER, table.id().name())
            .with_param(param::MARKET, market.as_str())
            .with_until(event.date());
        fetch_incremental(self.quotes.as_ref(), request, table).await
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
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::gateway::FnGateway;
    use crate::tables::test_fixtures::{date, dated, fixed, snapshot, usd};

    fn id() -> TableId {
        TableId::new("data", QUOTES, "TATNP")
    }

    fn traded() -> Event {
        Event::TickerTraded {
            ticker: "TATNP".into(),
            isin: "RU0006944147".into(),
            market: "shares".into(),
            date: date(2024, 3, 5),
            usd: usd(&[(date(2024, 3, 5), 92.0)]),
        }
    }

    fn quotes(rows: &[(NaiveDate, f64, f64)]) -> Frame {
        dated(
            &[col::CLOSE, col::TURNOVER],
            rows.iter()
                .map(|&(d, close, turnover)| (d, vec![json!(close), json!(turnover)]))
                .collect(),
        )
    }

    fn aliases(tickers: &[&str]) -> Arc<dyn Gateway> {
        let rows = tickers.iter().map(|&t| (t, vec![json!("RU0006944147")]));
        fixed(Frame::from_rows([col::ISIN], rows).expect("valid frame"))
    }

    /// Two tickers trading in parallel on 2024-03-04.
    fn per_ticker() -> Arc<dyn Gateway> {
        Arc::new(FnGateway::new(|request: FetchRequest| async move {
            let frame = match request.param(param::TICKER) {
                Some("TATNP") => quotes(&[
                    (date(2024, 3, 4), 600.0, 10.0),
                    (date(2024, 3, 5), 610.0, 30.0),
                ]),
                Some("TATN") => quotes(&[
                    (date(2024, 3, 1), 590.0, 5.0),
                    (date(2024, 3, 4), 601.0, 50.0),
                ]),
                _ => Frame::empty([col::CLOSE, col::TURNOVER]),
            };
            Ok::<_, FetchError>(frame)
        }))
    }

    #[tokio::test]
    async fn first_load_keeps_busiest_alias_per_date() {
        let kind = Quotes::new(aliases(&["TATN", "TATNP"]), per_ticker());
        let frame = kind.fetch(&snapshot(id(), None), &traded()).await.expect("fetch");

        assert_eq!(
            frame,
            quotes(&[
                (date(2024, 3, 1), 590.0, 5.0),
                (date(2024, 3, 4), 601.0, 50.0),
                (date(2024, 3, 5), 610.0, 30.0),
            ])
        );
        kind.validate(&id(), None, &frame).expect("valid");
    }

    #[tokio::test]
    async fn first_load_without_aliases_uses_own_ticker() {
        let kind = Quotes::new(aliases(&[]), per_ticker());
        let frame = kind.fetch(&snapshot(id(), None), &traded()).await.expect("fetch");
        assert_eq!(frame.len(), 2);
    }

    #[tokio::test]
    async fn later_loads_extend_own_history() {
        let requested = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requested);
        let gateway = FnGateway::new(move |request: FetchRequest| {
            log.lock()
                .expect("lock")
                .push(request.param(param::TICKER).map(str::to_owned));
            async { Ok::<_, FetchError>(quotes(&[(date(2024, 3, 5), 611.0, 31.0)])) }
        });
        let kind = Quotes::new(crate::tables::test_fixtures::failing(), Arc::new(gateway));
        let held = quotes(&[(date(2024, 3, 4), 600.0, 10.0), (date(2024, 3, 5), 610.0, 30.0)]);

        let frame = kind
            .fetch(&snapshot(id(), Some(held)), &traded())
            .await
            .expect("fetch");

        assert_eq!(
            frame,
            quotes(&[(date(2024, 3, 4), 600.0, 10.0), (date(2024, 3, 5), 611.0, 31.0)])
        );
        assert_eq!(*requested.lock().expect("lock"), [Some("TATNP".to_owned())]);
    }

    #[tokio::test]
    async fn other_events_are_rejected() {
        let kind = Quotes::new(aliases(&[]), per_ticker());
        let event = Event::TradingDayEnded { date: date(2024, 3, 5) };
        let err = kind.fetch(&snapshot(id(), None), &event).await.expect_err("wrong event");
        assert!(matches!(err, SyncError::Config(_)));
    }
}
