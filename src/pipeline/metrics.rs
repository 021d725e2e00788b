use tracing::debug;

use crate::error::{AppError, Result};
use crate::pipeline::table::{MetricsTable, NormalizedTable, PRICE};

/// Append `daily_return`, `sma_30`, `volatility_30` and `cumulative_return` to `table`.
///
/// `window` sizes both the moving average and the rolling volatility. Returns and
/// cumulative return are percentages. A rolling value exists only once its window is full.
pub fn compute_metrics(table: NormalizedTable, window: i64) -> Result<MetricsTable> {
    if window <= 0 {
        return Err(AppError::InvalidWindow(window));
    }
    let window = usize::try_from(window).map_err(|_| AppError::InvalidWindow(window))?;

    let prices = table
        .column(PRICE)
        .ok_or_else(|| AppError::MissingColumn(PRICE.to_string()))?;

    let daily_return = daily_returns(prices);
    let sma = rolling_mean(prices, window);
    let volatility = rolling_std(&daily_return, window);
    let cumulative_return = cumulative_returns(prices);

    debug!(rows = table.len(), window, "computed metrics");
    Ok(MetricsTable::new(
        table,
        window,
        daily_return,
        sma,
        volatility,
        cumulative_return,
    ))
}

/// `(p[i] / p[i-1] - 1) * 100`. No value for the first row or after a zero price.
fn daily_returns(prices: &[f64]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(prices.len());
    if !prices.is_empty() {
        out.push(None);
    }
    out.extend(prices.windows(2).map(|w| pct_change(w[0], w[1])));
    out
}

fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            mean.is_finite().then_some(mean)
        })
        .collect()
}

/// Sample standard deviation (n - 1) over a trailing window. Any gap in the window yields no value.
fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let slice: Option<Vec<f64>> = values[i + 1 - window..=i].iter().copied().collect();
            slice.and_then(|s| sample_std(&s))
        })
        .collect()
}

fn cumulative_returns(prices: &[f64]) -> Vec<Option<f64>> {
    let Some(&first) = prices.first() else {
        return Vec::new();
    };
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| if i == 0 { Some(0.0) } else { pct_change(first, p) })
        .collect()
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    if from == 0.0 {
        return None;
    }
    let r = (to / from - 1.0) * 100.0;
    r.is_finite().then_some(r)
}

/// `None` when the intermediate sums overflow.
fn sample_std(values: &[f64]) -> Option<f64> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    std.is_finite().then_some(std)
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// Headline numbers printed after a backtest run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub start_price: f64,
    pub end_price: f64,
    /// Last cumulative return (%).
    pub total_return: Option<f64>,
    /// Mean of the defined daily returns (%).
    pub avg_daily_return: Option<f64>,
    /// Worst single daily return (%).
    pub worst_day: Option<f64>,
}

impl Summary {
    /// `None` when the table has no rows.
    pub fn from_metrics(m: &MetricsTable) -> Option<Self> {
        let prices = m.table().column(PRICE)?;
        let start_price = *prices.first()?;
        let end_price = *prices.last()?;

        let returns: Vec<f64> = m.daily_return().iter().flatten().copied().collect();
        let avg_daily_return =
            (!returns.is_empty()).then(|| returns.iter().sum::<f64>() / returns.len() as f64);
        let worst_day = returns.iter().copied().reduce(f64::min);

        Some(Self {
            start_price,
            end_price,
            total_return: m.cumulative_return().last().copied().flatten(),
            avg_daily_return,
            worst_day,
        })
    }
}
