//! Fetch CoinGecko market history, reshape it into time-indexed tables and derive
//! return, moving-average and volatility columns.

pub mod config;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod pipeline;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{AppError, Result};
pub use fetcher::CoinGeckoClient;
pub use pipeline::{compute_metrics, normalize, MetricsTable, NormalizedTable};
