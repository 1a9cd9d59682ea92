//! Interface to the external data sources tables are fetched from.
//!
//! Concrete HTTP or file scrapers live outside this crate. A table kind only
//! needs something implementing [`Gateway`]; [`FnGateway`] adapts a plain
//! async closure, which is how tests and small integrations provide data.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::FetchError;
use crate::event::Event;
use crate::frame::{Frame, IndexKey};
use crate::id::TableId;

/// Everything a gateway may need to answer one download.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Table the rows are destined for.
    pub table: TableId,
    /// Last index already held; `None` requests the full history.
    pub since: Option<IndexKey>,
    /// Last date to include, if the source is date-ranged.
    pub until: Option<NaiveDate>,
    /// Source-specific parameters (market, board, ticker, ...).
    pub params: BTreeMap<&'static str, String>,
    /// Event that triggered the download.
    pub event: Event,
}

impl FetchRequest {
    /// Request the full history of `table` on behalf of `event`.
    pub fn new(table: TableId, event: &Event) -> Self {
        Self {
            table,
            since: None,
            until: None,
            params: BTreeMap::new(),
            event: event.clone(),
        }
    }

    /// Only rows from `since` onwards are needed.
    pub fn with_since(mut self, since: Option<IndexKey>) -> Self {
        self.since = since;
        self
    }

    /// Only rows up to `until` are needed.
    pub fn with_until(mut self, until: Option<NaiveDate>) -> Self {
        self.until = until;
        self
    }

    /// Attach a source-specific parameter.
    pub fn with_param(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.params.insert(key, value.into());
        self
    }

    /// Value of a parameter set with [`with_param`](Self::with_param).
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// An external data source.
///
/// The engine never retries: a gateway that wants retries implements them
/// itself.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Download the rows described by `request`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on transport failure or an unusable response.
    async fn fetch(&self, request: &FetchRequest) -> Result<Frame, FetchError>;
}

/// [`Gateway`] backed by an async closure.
///
/// # Examples
///
/// ```
/// use tablesync::{FetchError, FetchRequest, FnGateway, Frame, Gateway};
///
/// let gateway = FnGateway::new(|_request: FetchRequest| async {
///     Ok::<_, FetchError>(Frame::empty(["CLOSE"]))
/// });
/// # let _: &dyn Gateway = &gateway;
/// ```
pub struct FnGateway<F> {
    f: F,
}

impl<F, Fut> FnGateway<F>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Frame, FetchError>> + Send,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> std::fmt::Debug for FnGateway<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnGateway").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Gateway for FnGateway<F>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Frame, FetchError>> + Send + 'static,
{
    async fn fetch(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        (self.f)(request.clone()).await
    }
}

/// One gateway per external source, as consumed by
/// [`Registry::standard`](crate::Registry::standard).
#[derive(Clone)]
pub struct Gateways {
    /// Exchange calendar: a single `from`/`till` row.
    pub trading_dates: Arc<dyn Gateway>,
    /// Monthly consumer price index.
    pub cpi: Arc<dyn Gateway>,
    /// USD/RUB daily quotes.
    pub usd: Arc<dyn Gateway>,
    /// Securities listed on one market/board.
    pub securities: Arc<dyn Gateway>,
    /// Daily index values.
    pub indexes: Arc<dyn Gateway>,
    /// Other tickers sharing an ISIN.
    pub aliases: Arc<dyn Gateway>,
    /// Daily quotes of one ticker.
    pub quotes: Arc<dyn Gateway>,
    /// Dividend history of one ticker.
    pub dividends: Arc<dyn Gateway>,
}

impl Gateways {
    /// Use the same gateway for every source; it dispatches on
    /// [`FetchRequest::table`].
    pub fn uniform(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            trading_dates: Arc::clone(&gateway),
            cpi: Arc::clone(&gateway),
            usd: Arc::clone(&gateway),
            securities: Arc::clone(&gateway),
            indexes: Arc::clone(&gateway),
            aliases: Arc::clone(&gateway),
            quotes: Arc::clone(&gateway),
            dividends: gateway,
        }
    }
}

impl std::fmt::Debug for Gateways {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateways").finish_non_exhaustive()
    }
}
