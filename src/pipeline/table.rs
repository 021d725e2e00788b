use chrono::{DateTime, Utc};

pub const PRICE: &str = "price";
pub const MARKET_CAP: &str = "market_cap";
pub const VOLUME: &str = "volume";

pub const OPEN: &str = "open";
pub const HIGH: &str = "high";
pub const LOW: &str = "low";
pub const CLOSE: &str = "close";

pub const DAILY_RETURN: &str = "daily_return";
pub const SMA: &str = "sma_30";
pub const VOLATILITY: &str = "volatility_30";
pub const CUMULATIVE_RETURN: &str = "cumulative_return";

/// Derived column names in CSV order. Fixed regardless of the window used.
pub const DERIVED_COLUMNS: [&str; 4] = [DAILY_RETURN, SMA, VOLATILITY, CUMULATIVE_RETURN];

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Time-indexed table built from one API response.
///
/// Index entries are unique and strictly ascending; every column has one value per index entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedTable {
    index: Vec<DateTime<Utc>>,
    columns: Vec<Column>,
}

impl NormalizedTable {
    pub(crate) fn from_parts(index: Vec<DateTime<Utc>>, columns: Vec<Column>) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == index.len()));
        debug_assert!(index.windows(2).all(|w| w[0] < w[1]));
        Self { index, columns }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[DateTime<Utc>] {
        &self.index
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Values of row `i` in column order.
    pub fn row(&self, i: usize) -> Option<(DateTime<Utc>, Vec<f64>)> {
        let ts = *self.index.get(i)?;
        Some((ts, self.columns.iter().map(|c| c.values[i]).collect()))
    }
}

/// A `NormalizedTable` with the four derived columns appended.
/// `None` marks a value that is not computable for that row.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsTable {
    table: NormalizedTable,
    window: usize,
    daily_return: Vec<Option<f64>>,
    sma: Vec<Option<f64>>,
    volatility: Vec<Option<f64>>,
    cumulative_return: Vec<Option<f64>>,
}

impl MetricsTable {
    pub(crate) fn new(
        table: NormalizedTable,
        window: usize,
        daily_return: Vec<Option<f64>>,
        sma: Vec<Option<f64>>,
        volatility: Vec<Option<f64>>,
        cumulative_return: Vec<Option<f64>>,
    ) -> Self {
        Self {
            table,
            window,
            daily_return,
            sma,
            volatility,
            cumulative_return,
        }
    }

    pub fn table(&self) -> &NormalizedTable {
        &self.table
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn daily_return(&self) -> &[Option<f64>] {
        &self.daily_return
    }

    pub fn sma(&self) -> &[Option<f64>] {
        &self.sma
    }

    pub fn volatility(&self) -> &[Option<f64>] {
        &self.volatility
    }

    pub fn cumulative_return(&self) -> &[Option<f64>] {
        &self.cumulative_return
    }

    /// Derived columns paired with their names, in `DERIVED_COLUMNS` order.
    pub fn derived(&self) -> [(&'static str, &[Option<f64>]); 4] {
        [
            (DAILY_RETURN, self.daily_return.as_slice()),
            (SMA, self.sma.as_slice()),
            (VOLATILITY, self.volatility.as_slice()),
            (CUMULATIVE_RETURN, self.cumulative_return.as_slice()),
        ]
    }
}
