use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use coingecko_history::config::{load_dotenv, Config, DEFAULT_WINDOW};
use coingecko_history::error::Result;
use coingecko_history::export::{
    export_coin_data_to_csv, export_multiple_coins, format_timestamp, save_metrics_csv,
};
use coingecko_history::fetcher::{snapshot_date, CoinGeckoClient};
use coingecko_history::pipeline::table::PRICE;
use coingecko_history::pipeline::{compute_metrics, MetricsTable, NormalizedTable, Summary};
use coingecko_history::types::Days;

/// Rows shown at each end of a printed table.
const PREVIEW_ROWS: usize = 5;

#[derive(Parser, Debug)]
#[command(author, version, about = "CoinGecko market history: fetch, reshape, analyse, export")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the active plan, base URL and (masked) API key
    Config,

    /// Price, market cap and volume for the last N days
    MarketChart {
        coin_id: String,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value = "30")]
        days: Days,
    },

    /// Price, market cap and volume between two dates (YYYY-MM-DD)
    Range {
        coin_id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
    },

    /// Market chart of a token looked up by contract address
    Contract {
        /// Platform id, e.g. ethereum, solana, base
        platform: String,
        contract_address: String,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value = "30")]
        days: Days,
    },

    /// OHLC candles
    Ohlc {
        coin_id: String,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value = "30")]
        days: Days,
    },

    /// Price, market cap and volume on one date (YYYY-MM-DD or DD-MM-YYYY)
    Snapshot { coin_id: String, date: String },

    /// Write market history for one or more coins to CSV
    Export {
        #[arg(required = true)]
        coin_ids: Vec<String>,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
        #[arg(long, default_value = "90")]
        days: Days,
        /// Output file. Defaults to {coin}_history.csv or multi_coin_history.csv
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Returns, moving average and volatility over a date range, exported to CSV
    Backtest {
        coin_id: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long = "vs", default_value = "usd")]
        vs_currency: String,
        #[arg(short, long, default_value_t = DEFAULT_WINDOW)]
        window: i64,
        /// Output file. Defaults to {coin}_backtesting.csv
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    load_dotenv();
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg, cli.command).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config, command: Command) -> Result<()> {
    if let Command::Config = command {
        for line in cfg.describe() {
            println!("{line}");
        }
        return Ok(());
    }

    let client = CoinGeckoClient::new(&cfg)?;
    info!(plan = %cfg.plan, base_url = client.base_url(), "client ready");

    match command {
        Command::Config => {}
        Command::MarketChart {
            coin_id,
            vs_currency,
            days,
        } => {
            let table = client.historical_prices(&coin_id, &vs_currency, days).await?;
            println!("Fetched {} data points", table.len());
            print_table(&table);
        }
        Command::Range {
            coin_id,
            from,
            to,
            vs_currency,
        } => {
            let table = client
                .historical_prices_range(&coin_id, &vs_currency, &from, &to)
                .await?;
            println!("Fetched {} data points for {from} .. {to}", table.len());
            print_table(&table);
        }
        Command::Contract {
            platform,
            contract_address,
            vs_currency,
            days,
        } => {
            let table = client
                .token_history_by_contract(&platform, &contract_address, &vs_currency, days)
                .await?;
            println!("Fetched {} data points for {contract_address}", table.len());
            print_table(&table);
        }
        Command::Ohlc {
            coin_id,
            vs_currency,
            days,
        } => {
            let table = client.ohlc_table(&coin_id, &vs_currency, days).await?;
            println!("Fetched {} candles", table.len());
            print_table(&table);
        }
        Command::Snapshot { coin_id, date } => {
            let date = snapshot_date(&date)?;
            let snap = client.history_snapshot(&coin_id, &date).await?;
            println!(
                "{} on {}:",
                snap.name.as_deref().unwrap_or(&coin_id),
                snap.date
            );
            println!("  Price: {}", money(snap.price_usd, 2));
            println!("  Market Cap: {}", money(snap.market_cap_usd, 0));
            println!("  Volume: {}", money(snap.volume_usd, 0));
        }
        Command::Export {
            coin_ids,
            vs_currency,
            days,
            out,
        } => {
            let path = match coin_ids.as_slice() {
                [coin_id] => {
                    export_coin_data_to_csv(&client, coin_id, &vs_currency, days, out).await?
                }
                _ => export_multiple_coins(&client, &coin_ids, &vs_currency, days, out).await?,
            };
            println!("Saved to {}", path.display());
        }
        Command::Backtest {
            coin_id,
            from,
            to,
            vs_currency,
            window,
            out,
        } => {
            let table = client
                .price_history_range(&coin_id, &vs_currency, &from, &to)
                .await?;
            println!("Retrieved {} data points", table.len());

            let metrics = compute_metrics(table, window)?;
            print_metrics_tail(&metrics, 10);
            if let Some(summary) = Summary::from_metrics(&metrics) {
                print_summary(&summary);
            }

            let path = out.unwrap_or_else(|| PathBuf::from(format!("{coin_id}_backtesting.csv")));
            save_metrics_csv(&path, &metrics)?;
            println!("Data exported to {}", path.display());
        }
    }

    Ok(())
}

fn print_table(table: &NormalizedTable) {
    let names: Vec<&str> = table.column_names().collect();
    println!("{:<23} {}", "timestamp", names.join("  "));

    let n = table.len();
    for i in 0..n {
        if n > PREVIEW_ROWS * 2 && i == PREVIEW_ROWS {
            println!("...");
        }
        if n > PREVIEW_ROWS * 2 && (PREVIEW_ROWS..n - PREVIEW_ROWS).contains(&i) {
            continue;
        }
        if let Some((ts, values)) = table.row(i) {
            let cells: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
            println!("{:<23} {}", format_timestamp(&ts), cells.join("  "));
        }
    }
}

fn print_metrics_tail(metrics: &MetricsTable, rows: usize) {
    let table = metrics.table();
    let Some(prices) = table.column(PRICE) else {
        return;
    };
    println!("\nSample of processed data:");
    println!(
        "{:<23} {:>12} {:>12} {:>12} {:>13} {:>17}",
        "timestamp", "price", "daily_return", "sma_30", "volatility_30", "cumulative_return"
    );
    for i in table.len().saturating_sub(rows)..table.len() {
        println!(
            "{:<23} {:>12.2} {:>12} {:>12} {:>13} {:>17}",
            format_timestamp(&table.index()[i]),
            prices[i],
            metric_cell(metrics.daily_return()[i]),
            metric_cell(metrics.sma()[i]),
            metric_cell(metrics.volatility()[i]),
            metric_cell(metrics.cumulative_return()[i]),
        );
    }
}

/// Four decimals, or `n/a` where the metric has no value.
fn metric_cell(v: Option<f64>) -> String {
    v.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
}

fn print_summary(s: &Summary) {
    let pct = |v: Option<f64>, dp: usize| v.map_or("n/a".to_string(), |v| format!("{v:.dp$}%"));
    println!("\nSummary statistics:");
    println!("  Start price: {}", money(Some(s.start_price), 2));
    println!("  End price: {}", money(Some(s.end_price), 2));
    println!("  Total return: {}", pct(s.total_return, 1));
    println!("  Average daily return: {}", pct(s.avg_daily_return, 3));
    println!("  Max drawdown day: {}", pct(s.worst_day, 1));
}

/// `$1,234,567.89` style amount. `n/a` when missing.
fn money(v: Option<f64>, decimals: usize) -> String {
    let Some(v) = v else {
        return "n/a".to_string();
    };
    let raw = format!("{:.*}", decimals, v.abs());
    let (int_part, frac_part) = match raw.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (raw.as_str(), None),
    };
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if v < 0.0 { "-" } else { "" };
    match frac_part {
        Some(f) => format!("{sign}${grouped}.{f}"),
        None => format!("{sign}${grouped}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_groups_thousands() {
        assert_eq!(money(Some(64000.5), 2), "$64,000.50");
        assert_eq!(money(Some(1_234_567_890.0), 0), "$1,234,567,890");
        assert_eq!(money(Some(999.0), 2), "$999.00");
        assert_eq!(money(Some(-1500.25), 2), "-$1,500.25");
        assert_eq!(money(None, 2), "n/a");
    }

    #[test]
    fn missing_metrics_print_as_na() {
        assert_eq!(metric_cell(None), "n/a");
        assert_eq!(metric_cell(Some(-2.5)), "-2.5000");
        assert_eq!(metric_cell(Some(0.0)), "0.0000");
    }

    #[test]
    fn cli_parses_backtest_defaults() {
        let cli = Cli::try_parse_from([
            "history", "backtest", "bitcoin", "--from", "2019-01-01", "--to", "2024-01-01",
        ])
        .unwrap();
        match cli.command {
            Command::Backtest {
                coin_id,
                window,
                vs_currency,
                out,
                ..
            } => {
                assert_eq!(coin_id, "bitcoin");
                assert_eq!(window, DEFAULT_WINDOW);
                assert_eq!(vs_currency, "usd");
                assert!(out.is_none());
            }
            other => panic!("expected Backtest, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_days_max() {
        let cli = Cli::try_parse_from(["history", "market-chart", "ethereum", "--days", "max"]).unwrap();
        match cli.command {
            Command::MarketChart { days, .. } => assert_eq!(days, Days::Max),
            other => panic!("expected MarketChart, got {other:?}"),
        }
        assert!(Cli::try_parse_from(["history", "ohlc", "bitcoin", "--days", "0"]).is_err());
        assert!(Cli::try_parse_from(["history", "export"]).is_err());
    }
}
