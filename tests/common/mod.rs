//! A small fake exchange answering every gateway of the standard tables.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::{Value, json};
use tablesync::tables::{col, param};
use tablesync::{FetchError, FetchRequest, FnGateway, Frame, Gateway, Gateways, IndexKey};

/// Route engine logs to the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Trading days known to the exchange; only those up to `till` are public.
pub fn trading_days() -> Vec<NaiveDate> {
    vec![date(2024, 3, 1), date(2024, 3, 4), date(2024, 3, 5), date(2024, 3, 6)]
}

/// `(ticker, isin)` listed on the TQBR board.
pub const LISTED: [(&str, &str); 2] = [("AKRN", "RU0009028674"), ("SBERP", "RU0009029557")];

/// Fake exchange state shared by all gateways.
#[derive(Debug)]
pub struct Market {
    till: Mutex<NaiveDate>,
    fetches: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    usd_offset: Mutex<f64>,
}

impl Market {
    pub fn new(till: NaiveDate) -> Arc<Self> {
        Arc::new(Self {
            till: Mutex::new(till),
            fetches: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            usd_offset: Mutex::new(0.0),
        })
    }

    /// Total gateway calls so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Publish trading days up to `till`.
    pub fn close_day(&self, till: NaiveDate) {
        *self.till.lock().expect("lock") = till;
    }

    /// Make every request for table `name` fail.
    pub fn fail(&self, name: &str) {
        self.failing.lock().expect("lock").insert(name.to_owned());
    }

    pub fn recover(&self, name: &str) {
        self.failing.lock().expect("lock").remove(name);
    }

    /// Shift every published USD close, rewriting history.
    pub fn revise_usd(&self, offset: f64) {
        *self.usd_offset.lock().expect("lock") = offset;
    }

    pub fn gateways(self: &Arc<Self>) -> Gateways {
        Gateways {
            trading_dates: route(self, Market::trading_dates),
            cpi: route(self, Market::cpi),
            usd: route(self, Market::usd),
            securities: route(self, Market::securities),
            indexes: route(self, Market::closes),
            aliases: route(self, Market::aliases),
            quotes: route(self, Market::quotes),
            dividends: route(self, Market::dividends),
        }
    }

    fn till(&self) -> NaiveDate {
        *self.till.lock().expect("lock")
    }

    /// Public days in `[since, until]`.
    fn days(&self, request: &FetchRequest) -> Vec<NaiveDate> {
        let till = self.till();
        let since = request.since.as_ref().and_then(IndexKey::as_date);
        trading_days()
            .into_iter()
            .filter(|d| *d <= till)
            .filter(|d| request.until.is_none_or(|until| *d <= until))
            .filter(|d| since.is_none_or(|since| *d >= since))
            .collect()
    }

    fn trading_dates(&self, _request: &FetchRequest) -> Result<Frame, FetchError> {
        let till = self.till().format("%Y-%m-%d").to_string();
        Ok(Frame::from_rows(
            ["from", "till"],
            [(0_i64, vec![json!("1997-03-24"), json!(till)])],
        )?)
    }

    fn cpi(&self, _request: &FetchRequest) -> Result<Frame, FetchError> {
        Ok(Frame::from_rows(
            [col::CPI],
            [
                (date(2024, 1, 31), vec![json!(1.0086)]),
                (date(2024, 2, 29), vec![json!(1.0068)]),
            ],
        )?)
    }

    fn usd(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let offset = *self.usd_offset.lock().expect("lock");
        let rows = self.days(request).into_iter().map(|d| {
            let close = 90.0 + f64::from(chrono::Datelike::day(&d)) + offset;
            (d, vec![json!(close), json!(1_000_000.0)])
        });
        Ok(Frame::from_rows([col::CLOSE, col::TURNOVER], rows)?)
    }

    fn securities(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let listed: &[(&str, &str)] = match request.param(param::BOARD) {
            Some("TQBR") => &LISTED,
            _ => &[],
        };
        let rows = listed.iter().map(|&(ticker, isin)| (ticker, vec![json!(isin)]));
        Ok(Frame::from_rows([col::ISIN], rows)?)
    }

    fn closes(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let rows = self
            .days(request)
            .into_iter()
            .map(|d| (d, vec![json!(3000.0 + f64::from(chrono::Datelike::day(&d)))]));
        Ok(Frame::from_rows([col::CLOSE], rows)?)
    }

    fn aliases(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let isin = request.param(param::ISIN).unwrap_or_default();
        let rows = LISTED
            .iter()
            .filter(|(_, listed_isin)| *listed_isin == isin)
            .map(|&(ticker, isin)| (ticker, vec![json!(isin)]));
        Ok(Frame::from_rows([col::ISIN], rows)?)
    }

    fn quotes(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let rows = self.days(request).into_iter().map(|d| {
            let day = f64::from(chrono::Datelike::day(&d));
            (d, vec![json!(100.0 + day), json!(10_000.0 * day)])
        });
        Ok(Frame::from_rows([col::CLOSE, col::TURNOVER], rows)?)
    }

    fn dividends(&self, request: &FetchRequest) -> Result<Frame, FetchError> {
        let rows: Vec<(NaiveDate, Vec<Value>)> = match request.param(param::TICKER) {
            Some("AKRN") => vec![(date(2023, 6, 1), vec![json!(100.0), json!(col::RUR)])],
            Some("SBERP") => vec![(date(2024, 3, 4), vec![json!(1.0), json!(col::USD)])],
            _ => Vec::new(),
        };
        Ok(Frame::from_rows([col::DIVIDENDS, col::CURRENCY], rows)?)
    }
}

type Answer = fn(&Market, &FetchRequest) -> Result<Frame, FetchError>;

fn route(market: &Arc<Market>, answer: Answer) -> Arc<dyn Gateway> {
    let market = Arc::clone(market);
    Arc::new(FnGateway::new(move |request: FetchRequest| {
        let market = Arc::clone(&market);
        async move {
            market.fetches.fetch_add(1, Ordering::SeqCst);
            let name = request.table.name().to_owned();
            let failing = market.failing.lock().expect("lock").contains(&name);
            if failing {
                return Err(FetchError::Transport {
                    source_name: request.table.to_string(),
                    message: "connection reset".into(),
                });
            }
            tokio::task::yield_now().await;
            answer(&market, &request)
        }
    }))
}
