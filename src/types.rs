use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Raw series
// ---------------------------------------------------------------------------

/// One `[timestamp_ms, value]` pair as returned by the market-chart endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub timestamp_ms: i64,
    pub value: f64,
}

/// One semantic series (prices, market caps, volumes), in response order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub points: Vec<RawPoint>,
}

impl RawSeries {
    pub fn new(points: Vec<RawPoint>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<(i64, f64)> for RawSeries {
    fn from_iter<I: IntoIterator<Item = (i64, f64)>>(iter: I) -> Self {
        Self {
            points: iter
                .into_iter()
                .map(|(timestamp_ms, value)| RawPoint { timestamp_ms, value })
                .collect(),
        }
    }
}

/// One `[timestamp_ms, open, high, low, close]` candle from the OHLC endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcTuple {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

// ---------------------------------------------------------------------------
// Request parameters
// ---------------------------------------------------------------------------

/// The `days` query parameter: a number of days back from now, or the full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Days {
    Count(u32),
    Max,
}

impl fmt::Display for Days {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Days::Count(n) => write!(f, "{n}"),
            Days::Max => write!(f, "max"),
        }
    }
}

impl FromStr for Days {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(Days::Max);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("days must be at least 1".to_string()),
            Ok(n) => Ok(Days::Count(n)),
            Err(_) => Err(format!("expected a number of days or `max`, got `{s}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// Point-in-time snapshot
// ---------------------------------------------------------------------------

/// Raw shape of `/coins/{id}/history`. Every field may be missing for
/// coins that did not trade on the requested date.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HistoryResponse {
    pub name: Option<String>,
    pub symbol: Option<String>,
    #[serde(default)]
    pub market_data: Option<HistoryMarketData>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HistoryMarketData {
    #[serde(default)]
    pub current_price: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub market_cap: HashMap<String, Option<f64>>,
    #[serde(default)]
    pub total_volume: HashMap<String, Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSnapshot {
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// DD-MM-YYYY, as sent to the API.
    pub date: String,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub volume_usd: Option<f64>,
}

impl PriceSnapshot {
    pub fn from_history(date: &str, resp: HistoryResponse) -> Self {
        let md = resp.market_data.unwrap_or_default();
        Self {
            name: resp.name,
            symbol: resp.symbol,
            date: date.to_string(),
            price_usd: md.current_price.get("usd").copied().flatten(),
            market_cap_usd: md.market_cap.get("usd").copied().flatten(),
            volume_usd: md.total_volume.get("usd").copied().flatten(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_parses_count_and_max() {
        assert_eq!("30".parse::<Days>(), Ok(Days::Count(30)));
        assert_eq!("MAX".parse::<Days>(), Ok(Days::Max));
        assert!("0".parse::<Days>().is_err());
        assert!("week".parse::<Days>().is_err());
        assert_eq!(Days::Count(365).to_string(), "365");
        assert_eq!(Days::Max.to_string(), "max");
    }

    #[test]
    fn snapshot_reads_usd_fields() {
        let raw = r#"{"id":"bitcoin","symbol":"btc","name":"Bitcoin","market_data":{"current_price":{"usd":64000.5,"eur":59000.0},"market_cap":{"usd":1.2e12},"total_volume":{"usd":3.1e10}}}"#;
        let resp: HistoryResponse = serde_json::from_str(raw).unwrap();
        let snap = PriceSnapshot::from_history("01-08-2025", resp);
        assert_eq!(snap.name.as_deref(), Some("Bitcoin"));
        assert_eq!(snap.symbol.as_deref(), Some("btc"));
        assert_eq!(snap.date, "01-08-2025");
        assert!((snap.price_usd.unwrap() - 64000.5).abs() < 1e-9);
        assert!((snap.market_cap_usd.unwrap() - 1.2e12).abs() < 1.0);
        assert!((snap.volume_usd.unwrap() - 3.1e10).abs() < 1.0);
    }

    #[test]
    fn snapshot_without_market_data_has_no_values() {
        let raw = r#"{"id":"newcoin","symbol":"new","name":"New Coin"}"#;
        let resp: HistoryResponse = serde_json::from_str(raw).unwrap();
        let snap = PriceSnapshot::from_history("01-01-2020", resp);
        assert_eq!(snap.name.as_deref(), Some("New Coin"));
        assert!(snap.price_usd.is_none());
        assert!(snap.market_cap_usd.is_none());
        assert!(snap.volume_usd.is_none());
    }
}
