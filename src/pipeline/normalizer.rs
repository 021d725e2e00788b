use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::pipeline::table::{
    Column, NormalizedTable, CLOSE, HIGH, LOW, MARKET_CAP, OPEN, PRICE, VOLUME,
};
use crate::types::{OhlcTuple, RawPoint, RawSeries};

/// Payload keys of the market-chart endpoints and the columns they become.
const MARKET_CHART_KEYS: [(&str, &str); 3] = [
    ("prices", PRICE),
    ("market_caps", MARKET_CAP),
    ("total_volumes", VOLUME),
];

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Inner-join the named series on exact timestamp equality and index the result by UTC time.
///
/// Column order follows `series`. A timestamp produces a row only if every series carries it.
/// Within one series a repeated timestamp keeps its first value. Rows come out sorted ascending.
pub fn normalize(series: &[(&str, &RawSeries)]) -> Result<NormalizedTable> {
    let Some(((first_name, first), rest)) = series.split_first() else {
        return Err(AppError::malformed("no series supplied"));
    };

    let mut names = HashSet::new();
    for (name, s) in series {
        if !names.insert(*name) {
            return Err(AppError::malformed(format!("duplicate column `{name}`")));
        }
        if s.is_empty() {
            return Err(AppError::malformed(format!("series `{name}` is empty")));
        }
    }

    let mut seen = HashSet::with_capacity(first.len());
    let mut rows: Vec<(i64, Vec<f64>)> = first
        .points
        .iter()
        .filter(|p| seen.insert(p.timestamp_ms))
        .map(|p| {
            let mut values = Vec::with_capacity(series.len());
            values.push(p.value);
            (p.timestamp_ms, values)
        })
        .collect();

    for (name, s) in rest {
        let mut lookup: HashMap<i64, f64> = HashMap::with_capacity(s.len());
        for p in &s.points {
            lookup.entry(p.timestamp_ms).or_insert(p.value);
        }

        let before = rows.len();
        rows.retain_mut(|row| match lookup.get(&row.0) {
            Some(v) => {
                row.1.push(*v);
                true
            }
            None => false,
        });
        if rows.len() < before {
            debug!(
                series = %name,
                dropped = before - rows.len(),
                "join dropped rows with no matching timestamp"
            );
        }
    }

    rows.sort_unstable_by_key(|(ts, _)| *ts);

    let mut index = Vec::with_capacity(rows.len());
    let mut columns: Vec<Column> = series
        .iter()
        .map(|(name, _)| Column {
            name: name.to_string(),
            values: Vec::with_capacity(rows.len()),
        })
        .collect();

    for (ts, values) in rows {
        let at = DateTime::<Utc>::from_timestamp_millis(ts).ok_or_else(|| {
            AppError::malformed(format!("timestamp {ts} is outside the calendar range"))
        })?;
        index.push(at);
        for (col, v) in columns.iter_mut().zip(values) {
            col.values.push(v);
        }
    }

    debug!(first = %first_name, series = series.len(), rows = index.len(), "normalized");
    Ok(NormalizedTable::from_parts(index, columns))
}

/// Normalize a market-chart response into `price`, `market_cap`, `volume`.
pub fn normalize_market_chart(payload: &Value) -> Result<NormalizedTable> {
    let mut parsed = Vec::with_capacity(MARKET_CHART_KEYS.len());
    for (key, column) in MARKET_CHART_KEYS {
        parsed.push((column, parse_series(key, payload_field(payload, key)?)?));
    }
    let refs: Vec<(&str, &RawSeries)> = parsed.iter().map(|(c, s)| (*c, s)).collect();
    normalize(&refs)
}

/// Normalize only the `prices` array of a market-chart response into a single `price` column.
pub fn normalize_prices(payload: &Value) -> Result<NormalizedTable> {
    let prices = parse_series("prices", payload_field(payload, "prices")?)?;
    normalize(&[(PRICE, &prices)])
}

/// Normalize OHLC candles into `open`, `high`, `low`, `close`.
pub fn normalize_ohlc(candles: &[OhlcTuple]) -> Result<NormalizedTable> {
    let open: RawSeries = candles.iter().map(|c| (c.timestamp_ms, c.open)).collect();
    let high: RawSeries = candles.iter().map(|c| (c.timestamp_ms, c.high)).collect();
    let low: RawSeries = candles.iter().map(|c| (c.timestamp_ms, c.low)).collect();
    let close: RawSeries = candles.iter().map(|c| (c.timestamp_ms, c.close)).collect();
    normalize(&[(OPEN, &open), (HIGH, &high), (LOW, &low), (CLOSE, &close)])
}

/// Parse and normalize a raw OHLC response body.
pub fn normalize_ohlc_payload(payload: &Value) -> Result<NormalizedTable> {
    normalize_ohlc(&parse_ohlc(payload)?)
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Parse a JSON array of `[timestamp_ms, value]` pairs.
pub fn parse_series(name: &str, v: &Value) -> Result<RawSeries> {
    let items = non_empty_array(name, v)?;
    let mut points = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let t = tuple(name, i, item, 2)?;
        points.push(RawPoint {
            timestamp_ms: parse_timestamp(name, i, &t[0])?,
            value: parse_number(name, i, &t[1])?,
        });
    }
    Ok(RawSeries::new(points))
}

/// Parse a JSON array of `[timestamp_ms, open, high, low, close]` tuples.
pub fn parse_ohlc(v: &Value) -> Result<Vec<OhlcTuple>> {
    const NAME: &str = "ohlc";
    let items = non_empty_array(NAME, v)?;
    let mut candles = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let t = tuple(NAME, i, item, 5)?;
        candles.push(OhlcTuple {
            timestamp_ms: parse_timestamp(NAME, i, &t[0])?,
            open: parse_number(NAME, i, &t[1])?,
            high: parse_number(NAME, i, &t[2])?,
            low: parse_number(NAME, i, &t[3])?,
            close: parse_number(NAME, i, &t[4])?,
        });
    }
    Ok(candles)
}

fn payload_field<'a>(payload: &'a Value, key: &str) -> Result<&'a Value> {
    payload
        .get(key)
        .ok_or_else(|| AppError::malformed(format!("payload has no `{key}` field")))
}

fn non_empty_array<'a>(name: &str, v: &'a Value) -> Result<&'a [Value]> {
    match v.as_array() {
        Some(a) if a.is_empty() => Err(AppError::malformed(format!("series `{name}` is empty"))),
        Some(a) => Ok(a.as_slice()),
        None => Err(AppError::malformed(format!("series `{name}` is not an array"))),
    }
}

fn tuple<'a>(name: &str, i: usize, item: &'a Value, arity: usize) -> Result<&'a [Value]> {
    match item.as_array() {
        Some(t) if t.len() == arity => Ok(t.as_slice()),
        Some(t) => Err(AppError::malformed(format!(
            "`{name}`[{i}] has {} elements, expected {arity}",
            t.len()
        ))),
        None => Err(AppError::malformed(format!("`{name}`[{i}] is not a tuple"))),
    }
}

/// Integral JSON numbers only. Floats are accepted when they carry no fraction (`1.7e12`).
fn parse_timestamp(name: &str, i: usize, v: &Value) -> Result<i64> {
    if let Some(ts) = v.as_i64() {
        return Ok(ts);
    }
    match v.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err(AppError::malformed(format!(
            "`{name}`[{i}] timestamp {v} is not an integer"
        ))),
    }
}

fn parse_number(name: &str, i: usize, v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| AppError::malformed(format!("`{name}`[{i}] value {v} is not a number")))
}
