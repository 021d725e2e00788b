pub mod metrics;
pub mod normalizer;
pub mod table;

pub use metrics::{compute_metrics, Summary};
pub use normalizer::{
    normalize, normalize_market_chart, normalize_ohlc, normalize_ohlc_payload, normalize_prices,
};
pub use table::{Column, MetricsTable, NormalizedTable};
