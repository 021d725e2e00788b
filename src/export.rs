use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Timelike, Utc};
use tracing::info;

use crate::error::{AppError, Result};
use crate::fetcher::CoinGeckoClient;
use crate::pipeline::table::DERIVED_COLUMNS;
use crate::pipeline::{MetricsTable, NormalizedTable};
use crate::types::Days;

const TIMESTAMP_HEADER: &str = "timestamp";
const COIN_HEADER: &str = "coin";

/// `YYYY-MM-DD HH:MM:SS`, with `.fff` appended only when the millisecond part is non-zero.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    if ts.nanosecond() == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }
}

fn cell(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

fn header(table: &NormalizedTable) -> Vec<String> {
    std::iter::once(TIMESTAMP_HEADER)
        .chain(table.column_names())
        .map(str::to_string)
        .collect()
}

fn base_record(table: &NormalizedTable, i: usize) -> Vec<String> {
    let mut record = Vec::with_capacity(table.columns().len() + 1 + DERIVED_COLUMNS.len());
    record.push(format_timestamp(&table.index()[i]));
    record.extend(table.columns().iter().map(|c| c.values[i].to_string()));
    record
}

/// `timestamp` followed by the table's columns.
pub fn write_normalized_csv<W: Write>(writer: W, table: &NormalizedTable) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(header(table))?;
    for i in 0..table.len() {
        w.write_record(base_record(table, i))?;
    }
    w.flush()?;
    Ok(())
}

/// `timestamp`, the source columns, then `daily_return, sma_30, volatility_30, cumulative_return`.
/// Values with no result are written as empty cells.
pub fn write_metrics_csv<W: Write>(writer: W, metrics: &MetricsTable) -> Result<()> {
    let table = metrics.table();
    let derived = metrics.derived();

    let mut w = csv::Writer::from_writer(writer);
    let mut head = header(table);
    head.extend(DERIVED_COLUMNS.iter().map(|c| c.to_string()));
    w.write_record(head)?;

    for i in 0..table.len() {
        let mut record = base_record(table, i);
        record.extend(derived.iter().map(|(_, col)| cell(col[i])));
        w.write_record(record)?;
    }
    w.flush()?;
    Ok(())
}

/// Column names shared by every table, or `AppError::Export` naming the first that differs.
fn common_columns(tables: &[(String, NormalizedTable)]) -> Result<Vec<&str>> {
    let Some((_, first)) = tables.first() else {
        return Err(AppError::Export("no tables to export".to_string()));
    };
    let expected: Vec<&str> = first.column_names().collect();
    if let Some((coin_id, _)) = tables
        .iter()
        .find(|(_, t)| t.column_names().ne(expected.iter().copied()))
    {
        return Err(AppError::Export(format!(
            "columns of `{coin_id}` do not match `{}`",
            expected.join(",")
        )));
    }
    Ok(expected)
}

/// Rows of every table back to back, tagged with a trailing `coin` column.
/// All tables must share the same columns; nothing is written otherwise.
pub fn write_multi_coin_csv<W: Write>(writer: W, tables: &[(String, NormalizedTable)]) -> Result<()> {
    let columns = common_columns(tables)?;

    let mut w = csv::Writer::from_writer(writer);
    let mut head: Vec<&str> = std::iter::once(TIMESTAMP_HEADER).chain(columns).collect();
    head.push(COIN_HEADER);
    w.write_record(head)?;

    for (coin_id, table) in tables {
        for i in 0..table.len() {
            let mut record = base_record(table, i);
            record.push(coin_id.clone());
            w.write_record(record)?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn save_metrics_csv(path: &Path, metrics: &MetricsTable) -> Result<()> {
    write_metrics_csv(File::create(path)?, metrics)?;
    info!(path = %path.display(), rows = metrics.len(), "saved metrics CSV");
    Ok(())
}

/// Like `write_multi_coin_csv`, but the file is only created once the columns line up.
pub fn save_multi_coin_csv(path: &Path, tables: &[(String, NormalizedTable)]) -> Result<()> {
    common_columns(tables)?;
    write_multi_coin_csv(File::create(path)?, tables)?;
    let rows: usize = tables.iter().map(|(_, t)| t.len()).sum();
    info!(coins = tables.len(), path = %path.display(), rows, "saved combined CSV");
    Ok(())
}

/// Fetch one coin's market chart and write it to `filename` (default `{coin_id}_history.csv`).
pub async fn export_coin_data_to_csv(
    client: &CoinGeckoClient,
    coin_id: &str,
    vs_currency: &str,
    days: Days,
    filename: Option<PathBuf>,
) -> Result<PathBuf> {
    let path = filename.unwrap_or_else(|| PathBuf::from(format!("{coin_id}_history.csv")));
    let table = client.historical_prices(coin_id, vs_currency, days).await?;
    write_normalized_csv(File::create(&path)?, &table)?;
    info!(coin_id, path = %path.display(), rows = table.len(), "saved CSV");
    Ok(path)
}

/// Fetch several coins and write them to one file (default `multi_coin_history.csv`).
pub async fn export_multiple_coins(
    client: &CoinGeckoClient,
    coin_ids: &[String],
    vs_currency: &str,
    days: Days,
    filename: Option<PathBuf>,
) -> Result<PathBuf> {
    let path = filename.unwrap_or_else(|| PathBuf::from("multi_coin_history.csv"));
    let tables = client.fetch_many(coin_ids, vs_currency, days).await?;
    save_multi_coin_csv(&path, &tables)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::table::{CLOSE, HIGH, LOW, OPEN, PRICE, VOLUME};
    use crate::pipeline::{compute_metrics, normalize, normalize_ohlc};
    use crate::testing::{serve, serve_once, test_config, Route, MARKET_CHART_BODY};
    use crate::types::{OhlcTuple, RawSeries};

    const DAY_MS: i64 = 86_400_000;
    const T0: i64 = 1_704_067_200_000;

    fn prices(values: &[f64]) -> NormalizedTable {
        let s: RawSeries = values
            .iter()
            .enumerate()
            .map(|(i, p)| (T0 + i as i64 * DAY_MS, *p))
            .collect();
        normalize(&[(PRICE, &s)]).unwrap()
    }

    fn to_string(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn timestamp_format_shows_millis_only_when_present() {
        let whole = DateTime::<Utc>::from_timestamp_millis(T0).unwrap();
        assert_eq!(format_timestamp(&whole), "2024-01-01 00:00:00");
        let frac = DateTime::<Utc>::from_timestamp_millis(T0 + 61_250).unwrap();
        assert_eq!(format_timestamp(&frac), "2024-01-01 00:01:01.250");
    }

    #[test]
    fn metrics_csv_column_order_and_empty_cells() {
        let m = compute_metrics(prices(&[100.0, 110.0, 99.0]), 2).unwrap();
        let mut buf = Vec::new();
        write_metrics_csv(&mut buf, &m).unwrap();
        let out = to_string(buf);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(
            lines[0],
            "timestamp,price,daily_return,sma_30,volatility_30,cumulative_return"
        );
        assert_eq!(lines[1], "2024-01-01 00:00:00,100,,,,0");
        let row: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(row[..2], ["2024-01-02 00:00:00", "110"]);
        assert!((row[2].parse::<f64>().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(row[3..5], ["105", ""]);
        assert!((row[5].parse::<f64>().unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn ohlc_csv_header() {
        let candles = [OhlcTuple {
            timestamp_ms: T0,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
        }];
        let table = normalize_ohlc(&candles).unwrap();
        let mut buf = Vec::new();
        write_normalized_csv(&mut buf, &table).unwrap();
        let out = to_string(buf);
        let mut lines = out.lines();
        assert_eq!(
            lines.next(),
            Some(format!("timestamp,{OPEN},{HIGH},{LOW},{CLOSE}").as_str())
        );
        assert_eq!(lines.next(), Some("2024-01-01 00:00:00,1,2,0.5,1.5"));
    }

    #[test]
    fn multi_coin_csv_tags_rows() {
        let tables = vec![
            ("bitcoin".to_string(), prices(&[42000.0, 43000.0])),
            ("ethereum".to_string(), prices(&[2300.0])),
        ];
        let mut buf = Vec::new();
        write_multi_coin_csv(&mut buf, &tables).unwrap();
        let out = to_string(buf);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "timestamp,price,coin");
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with(",bitcoin"));
        assert_eq!(lines[3], "2024-01-01 00:00:00,2300,ethereum");
    }

    #[test]
    fn multi_coin_csv_rejects_mismatched_columns() {
        let s: RawSeries = [(T0, 1.0)].into_iter().collect();
        let volumes = normalize(&[(VOLUME, &s)]).unwrap();
        let tables = vec![
            ("bitcoin".to_string(), prices(&[1.0])),
            ("weird".to_string(), volumes),
        ];
        let mut buf: Vec<u8> = Vec::new();
        let err = write_multi_coin_csv(&mut buf, &tables).unwrap_err();
        assert!(matches!(err, AppError::Export(ref m) if m.contains("weird")));
        assert!(buf.is_empty());
        assert!(matches!(
            write_multi_coin_csv(Vec::<u8>::new(), &[]),
            Err(AppError::Export(_))
        ));
    }

    #[test]
    fn mismatched_multi_coin_export_creates_no_file() {
        let s: RawSeries = [(T0, 1.0)].into_iter().collect();
        let tables = vec![
            ("bitcoin".to_string(), prices(&[1.0])),
            ("weird".to_string(), normalize(&[(VOLUME, &s)]).unwrap()),
        ];
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.csv");
        assert!(matches!(
            save_multi_coin_csv(&path, &tables),
            Err(AppError::Export(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn save_metrics_writes_file() {
        let m = compute_metrics(prices(&[100.0, 110.0, 99.0]), 2).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitcoin_backtesting.csv");
        save_metrics_csv(&path, &m).unwrap();

        let out = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "timestamp,price,daily_return,sma_30,volatility_30,cumulative_return"
        );
        assert_eq!(lines[1], "2024-01-01 00:00:00,100,,,,0");
    }

    #[tokio::test]
    async fn export_one_coin_to_file() {
        let (base, server) = serve_once("200 OK", MARKET_CHART_BODY.to_string()).await;
        let client = CoinGeckoClient::new(&test_config(&base, false, None)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("btc.csv");

        let path =
            export_coin_data_to_csv(&client, "bitcoin", "usd", Days::Count(2), Some(target.clone()))
                .await
                .unwrap();
        assert_eq!(path, target);

        let out = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "timestamp,price,market_cap,volume");
        assert_eq!(lines[1], "2024-01-01 00:00:00,42000,820000000000,15000000000");
        assert_eq!(lines.len(), 3);
        let request = server.await.unwrap().remove(0);
        assert!(request.starts_with("GET /coins/bitcoin/market_chart?vs_currency=usd&days=2 "));
    }

    #[tokio::test]
    async fn export_several_coins_to_one_file() {
        let eth = r#"{"prices":[[1704067200000,2300.0]],"market_caps":[[1704067200000,2.8e11]],"total_volumes":[[1704067200000,9.0e9]]}"#;
        let (base, _server) = serve(
            vec![
                Route::ok("/coins/bitcoin/", MARKET_CHART_BODY),
                Route::ok("/coins/ethereum/", eth),
            ],
            2,
        )
        .await;
        let client = CoinGeckoClient::new(&test_config(&base, false, None)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("multi.csv");

        let coins = vec!["bitcoin".to_string(), "ethereum".to_string()];
        let path = export_multiple_coins(&client, &coins, "usd", Days::Count(2), Some(target))
            .await
            .unwrap();

        let out = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "timestamp,price,market_cap,volume,coin");
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with(",bitcoin") && lines[2].ends_with(",bitcoin"));
        assert_eq!(lines[3], "2024-01-01 00:00:00,2300,280000000000,9000000000,ethereum");
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_file() {
        let (base, _server) = serve(vec![Route::ok("/coins/bitcoin/", MARKET_CHART_BODY)], 2).await;
        let client = CoinGeckoClient::new(&test_config(&base, false, None)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("multi.csv");

        let coins = vec!["bitcoin".to_string(), "not-a-coin".to_string()];
        let err = export_multiple_coins(&client, &coins, "usd", Days::Count(2), Some(target.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Upstream { status: 404, .. }));
        assert!(!target.exists());
    }
}
