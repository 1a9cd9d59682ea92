//! Event handlers and the dispatch table routing events to them.
//!
//! A handler receives one event together with the [`Repository`] of the
//! unit of work it runs in. It loads the tables the event concerns, lets
//! each of them [`handle`](crate::Table::handle) the event and returns the
//! follow-up events they derived. Which handler runs for which
//! [`EventKind`] is decided once, when the [`Dispatcher`] is built.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConfigError, SyncError};
use crate::event::{Event, EventKind};
use crate::frame::IndexKey;
use crate::repository::Repository;
use crate::tables::{self, col};

/// Reaction to one kind of event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Update the tables `event` concerns and return the follow-up events.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while loading or updating a table.
    async fn handle(&self, event: &Event, repo: &Repository) -> Result<Vec<Event>, SyncError>;
}

/// [`EventHandler`] backed by an async function.
///
/// # Examples
///
/// ```
/// use tablesync::{Event, FnHandler, Repository, SyncError};
///
/// async fn ignore(_event: Event, _repo: Repository) -> Result<Vec<Event>, SyncError> {
///     Ok(Vec::new())
/// }
///
/// let handler = FnHandler::new(ignore);
/// # let _ = handler;
/// ```
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Event, Repository) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Event>, SyncError>> + Send,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event, Repository) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Event>, SyncError>> + Send + 'static,
{
    async fn handle(&self, event: &Event, repo: &Repository) -> Result<Vec<Event>, SyncError> {
        (self.f)(event.clone(), repo.clone()).await
    }
}

/// Immutable routing table from [`EventKind`] to [`EventHandler`].
///
/// Cheap to clone; clones share the table.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<HashMap<EventKind, Arc<dyn EventHandler>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl Dispatcher {
    /// Start an empty routing table.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Routing table of the market-data cascade.
    ///
    /// | event | reaction |
    /// |---|---|
    /// | `AppStarted` | update trading dates |
    /// | `TradingDayEnded` | update CPI and USD, announce every index |
    /// | `UsdUpdated` | update securities |
    /// | `SecurityListRefreshed` | announce every listed ticker |
    /// | `TickerTraded` | update the ticker's quotes and dividends |
    /// | `IndexCalculated` | update the index |
    /// | `DividendDataRequested` | resolve market and USD, reload dividends |
    pub fn standard() -> Self {
        Self::builder()
            .on(EventKind::AppStarted, FnHandler::new(on_app_started))
            .on(EventKind::TradingDayEnded, FnHandler::new(on_trading_day_ended))
            .on(EventKind::UsdUpdated, FnHandler::new(on_usd_updated))
            .on(
                EventKind::SecurityListRefreshed,
                FnHandler::new(on_security_list_refreshed),
            )
            .on(EventKind::TickerTraded, FnHandler::new(on_ticker_traded))
            .on(EventKind::IndexCalculated, FnHandler::new(on_index_calculated))
            .on(
                EventKind::DividendDataRequested,
                FnHandler::new(on_dividend_data_requested),
            )
            .build()
    }

    /// Handler registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnregisteredEvent`] if nothing handles `kind`.
    pub fn handler(&self, kind: EventKind) -> Result<Arc<dyn EventHandler>, ConfigError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(ConfigError::UnregisteredEvent(kind.as_str()))
    }

    /// Registered kinds, in catalog order.
    pub fn kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl DispatcherBuilder {
    /// Route `kind` to `handler`, replacing any earlier registration.
    pub fn on(mut self, kind: EventKind, handler: impl EventHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Freeze the routing table.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: Arc::new(self.handlers),
        }
    }
}

async fn update(
    repo: &Repository,
    group: &str,
    name: &str,
    event: &Event,
) -> Result<Vec<Event>, SyncError> {
    repo.get_group(group, name).await?.handle(event).await
}

async fn on_app_started(event: Event, repo: Repository) -> Result<Vec<Event>, SyncError> {
    let group = tables::TRADING_DATES;
    update(&repo, group, group, &event).await
}

async fn on_trading_day_ended(event: Event, repo: Repository) -> Result<Vec<Event>, SyncError> {
    let date = tables::event_date(tables::USD, &event)?;
    let (cpi, usd) = tokio::try_join!(
        update(&repo, tables::CPI, tables::CPI, &event),
        update(&repo, tables::USD, tables::USD, &event),
    )?;

    let indexes = tables::INDEX_TICKERS.iter().map(|ticker| Event::IndexCalculated {
        ticker: (*ticker).to_owned(),
        date,
    });
    Ok(cpi.into_iter().chain(usd).chain(indexes).collect())
}

async fn on_usd_updated(event: Event, repo: Repository) -> Result<Vec<Event>, SyncError> {
    let group = tables::SECURITIES;
    update(&repo, group, group, &event).await
}

async fn on_security_list_refreshed(
    event: Event,
    _repo: Repository,
) -> Result<Vec<Event>, SyncError> {
    let Event::SecurityListRefreshed {
        date,
        securities,
        usd,
    } = &event
    else {
        return Err(tables::unexpected(tables::SECURITIES, &event));
    };
    let listed = tables::listed(securities)?;
    Ok(listed
        .into_iter()
        .map(|(ticker, isin, market)| Event::TickerTraded {
            ticker,
            isin,
            market,
            date: *date,
            usd: usd.clone(),
        })
        .collect())
}

async fn on_ticker_traded(event: Event, repo: Repository) -> Result<Vec<Event>, SyncError> {
    let Event::TickerTraded { ticker, .. } = &event else {
        return Err(tables::unexpected(tables::QUOTES, &event));
    };
    let (quotes, dividends) = tokio::try_join!(
        update(&repo, tables::QUOTES, ticker, &event),
        update(&repo, tables::DIVIDENDS, ticker, &event),
    )?;
    Ok(quotes.into_iter().chain(dividends).collect())
}

async fn on_index_calculated(event: Event, repo: Repository) -> Result<Vec<Event>, SyncError> {
    let Event::IndexCalculated { ticker, .. } = &event else {
        return Err(tables::unexpected(tables::INDEXES, &event));
    };
    update(&repo, tables::INDEXES, ticker, &event).await
}

async fn on_dividend_data_requested(
    event: Event,
    repo: Repository,
) -> Result<Vec<Event>, SyncError> {
    let Event::DividendDataRequested { ticker, .. } = &event else {
        return Err(tables::unexpected(tables::DIVIDENDS, &event));
    };
    let (usd, securities) = tokio::try_join!(
        repo.get_singleton(tables::USD),
        repo.get_singleton(tables::SECURITIES),
    )?;

    let usd = usd.snapshot().require_payload()?.clone();
    let securities = securities.snapshot();
    let market = tables::text_cell(
        securities.require_payload()?,
        securities.id(),
        &IndexKey::Text(ticker.clone()),
        col::MARKET,
    )?;

    let enriched = Event::DividendDataRequested {
        ticker: ticker.clone(),
        market: Some(market),
        usd: Some(usd),
    };
    update(&repo, tables::DIVIDENDS, ticker, &enriched).await
}
