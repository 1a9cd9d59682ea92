mod common;

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tablesync::tables::{self, col};
use tablesync::{
    Event, EventKind, IndexKey, MemoryStorage, SyncEngine, SyncError, ValidationError,
};

use common::{Market, date};

fn engine(market: &Arc<Market>) -> (Arc<MemoryStorage>, SyncEngine) {
    common::init_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let engine = SyncEngine::builder()
        .gateways(market.gateways())
        .storage(storage.clone())
        .build()
        .expect("build engine");
    (storage, engine)
}

fn started() -> Event {
    Event::AppStarted { at: Utc::now() }
}

/// Engine after a full cascade over trading days up to 2024-03-05.
async fn synced() -> (Arc<Market>, Arc<MemoryStorage>, SyncEngine) {
    let market = Market::new(date(2024, 3, 5));
    let (storage, engine) = engine(&market);
    engine.drive(started()).await.expect("initial sync");
    (market, storage, engine)
}

#[tokio::test]
async fn app_start_loads_every_table() {
    let market = Market::new(date(2024, 3, 5));
    let (storage, engine) = engine(&market);

    let report = engine.drive(started()).await.expect("cascade");

    assert_eq!(report.tasks, 9);
    assert_eq!(report.events, 8);
    assert_eq!(report.count(EventKind::AppStarted), 1);
    assert_eq!(report.count(EventKind::TradingDayEnded), 1);
    assert_eq!(report.count(EventKind::UsdUpdated), 1);
    assert_eq!(report.count(EventKind::IndexCalculated), 3);
    assert_eq!(report.count(EventKind::SecurityListRefreshed), 1);
    assert_eq!(report.count(EventKind::TickerTraded), 2);
    assert_eq!(report.count(EventKind::DividendDataRequested), 0);

    // trading dates, CPI, USD, securities, 3 indexes, 2 quotes, 2 dividends
    assert_eq!(storage.len(), 11);

    let snapshots = engine.snapshots();
    let usd = snapshots.latest_singleton(tables::USD).await.expect("usd");
    assert_eq!(usd.len(), 3);
    assert_eq!(usd.last_index(), Some(&IndexKey::from(date(2024, 3, 5))));

    let securities = snapshots.latest_singleton(tables::SECURITIES).await.expect("securities");
    assert_eq!(securities.len(), 2);
    assert_eq!(
        securities.value(&IndexKey::from("SBERP"), col::TICKER_TYPE),
        Some(&json!(col::PREFERRED))
    );

    for ticker in tables::INDEX_TICKERS {
        let index = snapshots.latest(tables::INDEXES, ticker).await.expect("index");
        assert_eq!(index.len(), 3, "{ticker}");
    }

    let quotes = snapshots.latest(tables::QUOTES, "AKRN").await.expect("quotes");
    assert_eq!(quotes.len(), 3);
    assert_eq!(
        quotes.value(&IndexKey::from(date(2024, 3, 4)), col::CLOSE),
        Some(&json!(104.0))
    );

    let dividends = snapshots.latest(tables::DIVIDENDS, "SBERP").await.expect("dividends");
    assert_eq!(
        dividends.value(&IndexKey::from(date(2024, 3, 4)), "SBERP"),
        Some(&json!(94.0)),
        "USD dividend converted at the 2024-03-04 close"
    );
}

#[tokio::test]
async fn repeated_start_is_idle() {
    let (market, storage, engine) = synced().await;
    let fetches = market.fetches();
    let writes = storage.writes();

    let report = engine.drive(started()).await.expect("second start");

    assert_eq!(report.tasks, 1);
    assert_eq!(report.events, 0);
    assert_eq!(market.fetches(), fetches, "nothing is stale");
    assert_eq!(storage.writes(), writes);
}

#[tokio::test]
async fn new_trading_day_extends_history() {
    let (market, _storage, engine) = synced().await;
    market.close_day(date(2024, 3, 6));

    let report = engine
        .drive(Event::TradingDayEnded { date: date(2024, 3, 6) })
        .await
        .expect("next day");
    assert_eq!(report.count(EventKind::TickerTraded), 2);

    let snapshots = engine.snapshots();
    let usd = snapshots.latest_singleton(tables::USD).await.expect("usd");
    assert_eq!(usd.len(), 4);
    assert_eq!(usd.last_index(), Some(&IndexKey::from(date(2024, 3, 6))));

    let quotes = snapshots.latest(tables::QUOTES, "SBERP").await.expect("quotes");
    assert_eq!(quotes.len(), 4);

    let index = snapshots.latest(tables::INDEXES, "IMOEX").await.expect("index");
    assert_eq!(
        index.value(&IndexKey::from(date(2024, 3, 6)), col::CLOSE),
        Some(&json!(3006.0))
    );
}

#[tokio::test]
async fn revised_history_is_rejected() {
    let (market, _storage, engine) = synced().await;
    let before = engine.snapshots().updated_at(tables::USD, tables::USD).await.expect("loaded");
    market.close_day(date(2024, 3, 6));
    market.revise_usd(0.5);

    let err = engine
        .drive(Event::TradingDayEnded { date: date(2024, 3, 6) })
        .await
        .expect_err("revision");
    assert!(
        matches!(
            err,
            SyncError::Validation(ValidationError::HistoryMismatch { ref key, .. })
                if key == "2024-03-05"
        ),
        "got: {err}"
    );

    let snapshots = engine.snapshots();
    let usd = snapshots.latest_singleton(tables::USD).await.expect("usd");
    assert_eq!(usd.len(), 3, "last committed payload is kept");
    assert_eq!(
        snapshots.updated_at(tables::USD, tables::USD).await.expect("loaded"),
        before
    );
}

#[tokio::test]
async fn failed_run_keeps_earlier_commits_and_resumes() {
    let market = Market::new(date(2024, 3, 5));
    let (_storage, engine) = engine(&market);
    market.fail("SBERP");

    let err = engine.drive(started()).await.expect_err("SBERP is down");
    assert!(matches!(err, SyncError::Fetch(_)), "got: {err}");

    let snapshots = engine.snapshots();
    for group in [tables::TRADING_DATES, tables::USD, tables::SECURITIES] {
        assert!(snapshots.latest_singleton(group).await.is_ok(), "{group} committed");
    }
    assert!(matches!(
        snapshots.latest(tables::QUOTES, "SBERP").await,
        Err(SyncError::NeverUpdated(_))
    ));

    market.recover("SBERP");
    engine
        .drive(Event::TradingDayEnded { date: date(2024, 3, 5) })
        .await
        .expect("resume");

    let quotes = snapshots.latest(tables::QUOTES, "SBERP").await.expect("quotes");
    assert_eq!(quotes.len(), 3);
    let usd = snapshots.latest_singleton(tables::USD).await.expect("usd");
    assert_eq!(usd.len(), 3, "reloading the same day keeps history");
}

#[tokio::test]
async fn dividend_request_reloads_one_ticker() {
    let (market, _storage, engine) = synced().await;
    let fetches = market.fetches();

    let report = engine
        .drive(Event::dividends_requested("AKRN"))
        .await
        .expect("request");

    assert_eq!(report.tasks, 1);
    assert_eq!(report.events, 0);
    assert_eq!(market.fetches(), fetches + 1);
    let dividends = engine
        .snapshots()
        .latest(tables::DIVIDENDS, "AKRN")
        .await
        .expect("dividends");
    assert_eq!(
        dividends.value(&IndexKey::from(date(2023, 6, 1)), "AKRN"),
        Some(&json!(100.0))
    );
}

#[tokio::test]
async fn dividend_request_for_unlisted_ticker_fails() {
    let (_market, _storage, engine) = synced().await;

    let err = engine
        .drive(Event::dividends_requested("GAZP"))
        .await
        .expect_err("not listed");
    assert!(
        matches!(err, SyncError::MissingRow { ref key, .. } if key.starts_with("GAZP")),
        "got: {err}"
    );
}

#[tokio::test]
async fn cascade_limit_stops_the_run() {
    common::init_tracing();
    let market = Market::new(date(2024, 3, 5));
    let engine = SyncEngine::builder()
        .gateways(market.gateways())
        .max_events(4)
        .build()
        .expect("build");

    let err = engine.drive(started()).await.expect_err("limit");
    assert!(matches!(err, SyncError::CascadeLimit { limit: 4 }), "got: {err}");
    assert!(
        engine.snapshots().latest_singleton(tables::USD).await.is_ok(),
        "work before the limit stays committed"
    );
}
