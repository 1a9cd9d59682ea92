//! Domain events that drive table updates.
//!
//! Events are plain data: each carries exactly what the handler registered
//! for its [`EventKind`] needs to address and update its tables. They are
//! serialized adjacently tagged, e.g.
//! `{"type": "TradingDayEnded", "data": {"date": "2024-03-01"}}`.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Closed set of events understood by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// The application started; seeds the daily cascade.
    AppStarted {
        /// Moment the application started.
        at: DateTime<Utc>,
    },

    /// A new trading day closed on the exchange.
    TradingDayEnded {
        /// Last closed trading date.
        date: NaiveDate,
    },

    /// The USD exchange rate table was refreshed.
    UsdUpdated {
        /// Trading date of the refresh.
        date: NaiveDate,
        /// Full USD rate history.
        usd: Frame,
    },

    /// The list of traded securities was reloaded.
    SecurityListRefreshed {
        /// Trading date of the refresh.
        date: NaiveDate,
        /// Securities indexed by ticker.
        securities: Frame,
        /// USD rate history at the time of the refresh.
        usd: Frame,
    },

    /// A single security traded on `date`.
    TickerTraded {
        /// Exchange ticker.
        ticker: String,
        /// ISIN shared by all tickers of the same security.
        isin: String,
        /// Market the ticker trades on.
        market: String,
        /// Trading date.
        date: NaiveDate,
        /// USD rate history for currency conversion.
        usd: Frame,
    },

    /// Closing values of an index are available for `date`.
    IndexCalculated {
        /// Index ticker.
        ticker: String,
        /// Trading date.
        date: NaiveDate,
    },

    /// Explicit request to reload dividends of one ticker.
    ///
    /// Issued with only `ticker`; the handler fills `market` and `usd` from
    /// the securities and USD tables before passing it on.
    DividendDataRequested {
        /// Exchange ticker.
        ticker: String,
        /// Market of the ticker, once resolved.
        #[serde(default)]
        market: Option<String>,
        /// USD rate history, once resolved.
        #[serde(default)]
        usd: Option<Frame>,
    },
}

/// Fieldless discriminant of [`Event`], used as the dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// [`Event::AppStarted`].
    AppStarted,
    /// [`Event::TradingDayEnded`].
    TradingDayEnded,
    /// [`Event::UsdUpdated`].
    UsdUpdated,
    /// [`Event::SecurityListRefreshed`].
    SecurityListRefreshed,
    /// [`Event::TickerTraded`].
    TickerTraded,
    /// [`Event::IndexCalculated`].
    IndexCalculated,
    /// [`Event::DividendDataRequested`].
    DividendDataRequested,
}

impl EventKind {
    /// Every kind, in catalog order.
    pub const ALL: [EventKind; 7] = [
        EventKind::AppStarted,
        EventKind::TradingDayEnded,
        EventKind::UsdUpdated,
        EventKind::SecurityListRefreshed,
        EventKind::TickerTraded,
        EventKind::IndexCalculated,
        EventKind::DividendDataRequested,
    ];

    /// Stable name, identical to the serialized `"type"` tag.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AppStarted => "AppStarted",
            EventKind::TradingDayEnded => "TradingDayEnded",
            EventKind::UsdUpdated => "UsdUpdated",
            EventKind::SecurityListRefreshed => "SecurityListRefreshed",
            EventKind::TickerTraded => "TickerTraded",
            EventKind::IndexCalculated => "IndexCalculated",
            EventKind::DividendDataRequested => "DividendDataRequested",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Event {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::AppStarted { .. } => EventKind::AppStarted,
            Event::TradingDayEnded { .. } => EventKind::TradingDayEnded,
            Event::UsdUpdated { .. } => EventKind::UsdUpdated,
            Event::SecurityListRefreshed { .. } => EventKind::SecurityListRefreshed,
            Event::TickerTraded { .. } => EventKind::TickerTraded,
            Event::IndexCalculated { .. } => EventKind::IndexCalculated,
            Event::DividendDataRequested { .. } => EventKind::DividendDataRequested,
        }
    }

    /// Trading date carried by the event, if any.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Event::TradingDayEnded { date }
            | Event::UsdUpdated { date, .. }
            | Event::SecurityListRefreshed { date, .. }
            | Event::TickerTraded { date, .. }
            | Event::IndexCalculated { date, .. } => Some(*date),
            Event::AppStarted { .. } | Event::DividendDataRequested { .. } => None,
        }
    }

    /// USD rate history carried by the event, if any.
    pub fn usd(&self) -> Option<&Frame> {
        match self {
            Event::UsdUpdated { usd, .. }
            | Event::SecurityListRefreshed { usd, .. }
            | Event::TickerTraded { usd, .. } => Some(usd),
            Event::DividendDataRequested { usd, .. } => usd.as_ref(),
            _ => None,
        }
    }

    /// Convenience constructor for [`Event::DividendDataRequested`].
    ///
    /// # Examples
    ///
    /// ```
    /// use tablesync::{Event, EventKind};
    ///
    /// let event = Event::dividends_requested("AKRN");
    /// assert_eq!(event.kind(), EventKind::DividendDataRequested);
    /// ```
    pub fn dividends_requested(ticker: impl Into<String>) -> Self {
        Event::DividendDataRequested {
            ticker: ticker.into(),
            market: None,
            usd: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).expect("valid date")
    }

    #[test]
    fn adjacently_tagged_serialization() {
        let event = Event::TradingDayEnded { date: date() };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(
            value,
            json!({"type": "TradingDayEnded", "data": {"date": "2024-03-01"}})
        );
    }

    #[test]
    fn type_tag_matches_kind_name() {
        let events = [
            Event::AppStarted { at: Utc::now() },
            Event::TradingDayEnded { date: date() },
            Event::IndexCalculated {
                ticker: "IMOEX".into(),
                date: date(),
            },
            Event::dividends_requested("AKRN"),
        ];
        for event in events {
            let value = serde_json::to_value(&event).expect("serialize");
            assert_eq!(value["type"], json!(event.kind().as_str()));
        }
    }

    #[test]
    fn dividend_request_deserializes_without_enrichment() {
        let value = json!({"type": "DividendDataRequested", "data": {"ticker": "AKRN"}});
        let event: Event = serde_json::from_value(value).expect("deserialize");
        assert_eq!(event, Event::dividends_requested("AKRN"));
        assert!(event.usd().is_none());
    }

    #[test]
    fn date_accessor() {
        assert_eq!(Event::TradingDayEnded { date: date() }.date(), Some(date()));
        assert_eq!(Event::AppStarted { at: Utc::now() }.date(), None);
    }

    #[test]
    fn all_kinds_are_distinct() {
        let names: std::collections::HashSet<_> =
            EventKind::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), EventKind::ALL.len());
    }
}
