use coingecko_history::error::Result;
use coingecko_history::export::format_timestamp;
use coingecko_history::fetcher::CoinGeckoClient;
use coingecko_history::pipeline::table::PRICE;
use coingecko_history::pipeline::{compute_metrics, MetricsTable};
use coingecko_history::types::Days;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Loading,
    Ready,
    Error(String),
}

/// Chart-ready series derived from one `MetricsTable`. X values are epoch seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartData {
    pub price: Vec<(f64, f64)>,
    pub sma: Vec<(f64, f64)>,
    pub cumulative: Vec<(f64, f64)>,
    pub first_label: String,
    pub last_label: String,
}

impl ChartData {
    pub fn from_metrics(m: &MetricsTable) -> Self {
        let table = m.table();
        let xs: Vec<f64> = table.index().iter().map(|t| t.timestamp() as f64).collect();
        let prices = table.column(PRICE).unwrap_or_default();

        let defined = |col: &[Option<f64>]| -> Vec<(f64, f64)> {
            xs.iter()
                .zip(col)
                .filter_map(|(x, v)| v.map(|v| (*x, v)))
                .collect()
        };

        Self {
            price: xs.iter().copied().zip(prices.iter().copied()).collect(),
            sma: defined(m.sma()),
            cumulative: defined(m.cumulative_return()),
            first_label: table.index().first().map(date_label).unwrap_or_default(),
            last_label: table.index().last().map(date_label).unwrap_or_default(),
        }
    }

    pub fn x_bounds(&self) -> [f64; 2] {
        bounds(self.price.iter().map(|(x, _)| *x))
    }

    /// Price axis covering both the price and the moving average.
    pub fn price_bounds(&self) -> [f64; 2] {
        bounds(self.price.iter().chain(&self.sma).map(|(_, y)| *y))
    }

    /// Return axis, always including the zero line.
    pub fn cumulative_bounds(&self) -> [f64; 2] {
        let [lo, hi] = bounds(self.cumulative.iter().map(|(_, y)| *y));
        [lo.min(0.0), hi.max(0.0)]
    }
}

fn date_label(ts: &chrono::DateTime<chrono::Utc>) -> String {
    format_timestamp(ts).chars().take(10).collect()
}

/// Min/max of `values`, padded when flat so the axis never collapses.
pub fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    if lo == hi {
        let pad = if lo == 0.0 { 1.0 } else { lo.abs() * 0.05 };
        return [lo - pad, hi + pad];
    }
    [lo, hi]
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub coin_id: String,
    pub vs_currency: String,
    pub days: Days,
    pub window: i64,
    pub status: FetchStatus,
    pub data: ChartData,
    pub rows: usize,
}

impl AppState {
    pub fn new(coin_id: String, vs_currency: String, days: Days, window: i64) -> Self {
        Self {
            coin_id,
            vs_currency,
            days,
            window,
            status: FetchStatus::Loading,
            data: ChartData::default(),
            rows: 0,
        }
    }

    /// Refetch and recompute. Errors are kept on screen rather than ending the session.
    pub async fn refresh(&mut self, client: &CoinGeckoClient) {
        self.status = FetchStatus::Loading;
        match self.load(client).await {
            Ok(metrics) => {
                self.rows = metrics.len();
                self.data = ChartData::from_metrics(&metrics);
                self.status = FetchStatus::Ready;
            }
            Err(e) => self.status = FetchStatus::Error(e.to_string()),
        }
    }

    async fn load(&self, client: &CoinGeckoClient) -> Result<MetricsTable> {
        let table = client
            .historical_prices(&self.coin_id, &self.vs_currency, self.days)
            .await?;
        compute_metrics(table, self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coingecko_history::pipeline::normalize;
    use coingecko_history::types::RawSeries;

    const DAY_MS: i64 = 86_400_000;
    const T0: i64 = 1_704_067_200_000;

    fn metrics(prices: &[f64], window: i64) -> MetricsTable {
        let s: RawSeries = prices
            .iter()
            .enumerate()
            .map(|(i, p)| (T0 + i as i64 * DAY_MS, *p))
            .collect();
        compute_metrics(normalize(&[(PRICE, &s)]).unwrap(), window).unwrap()
    }

    #[test]
    fn chart_data_skips_undefined_points() {
        let data = ChartData::from_metrics(&metrics(&[10.0, 20.0, 30.0, 40.0], 3));
        assert_eq!(data.price.len(), 4);
        assert_eq!(data.sma.len(), 2);
        assert_eq!(data.cumulative.len(), 4);
        assert_eq!(data.price[0], ((T0 / 1000) as f64, 10.0));
        assert_eq!(data.first_label, "2024-01-01");
        assert_eq!(data.last_label, "2024-01-04");
    }

    #[test]
    fn bounds_pad_flat_series() {
        assert_eq!(bounds([5.0, 1.0, 3.0].into_iter()), [1.0, 5.0]);
        assert_eq!(bounds([0.0].into_iter()), [-1.0, 1.0]);
        assert_eq!(bounds(std::iter::empty()), [0.0, 1.0]);
        let [lo, hi] = bounds([100.0, 100.0].into_iter());
        assert!(lo < 100.0 && hi > 100.0);
    }

    #[test]
    fn cumulative_axis_includes_zero() {
        let data = ChartData::from_metrics(&metrics(&[100.0, 120.0, 150.0], 2));
        assert_eq!(data.cumulative_bounds(), [0.0, 50.0]);
        assert_eq!(data.price_bounds(), [100.0, 150.0]);
    }
}
