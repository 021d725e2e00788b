use std::fmt;
use std::path::PathBuf;

use crate::error::{AppError, Result};

pub const DEMO_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const PRO_API_URL: &str = "https://pro-api.coingecko.com/api/v3";

pub const DEMO_HEADER_KEY: &str = "x-cg-demo-api-key";
pub const PRO_HEADER_KEY: &str = "x-cg-pro-api-key";

/// Trailing window (rows) for the moving average and rolling volatility.
pub const DEFAULT_WINDOW: i64 = 30;

/// Per-request timeout (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Characters of the API key shown by `Config::describe`.
const KEY_PREVIEW_CHARS: usize = 10;

/// Subscription tier. Selects base URL and the header carrying the API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanTier {
    /// Free public plan.
    Demo,
    /// Any paid plan (Analyst, Lite, Pro, Enterprise).
    Pro,
}

impl PlanTier {
    pub fn base_url(self) -> &'static str {
        match self {
            PlanTier::Demo => DEMO_API_URL,
            PlanTier::Pro => PRO_API_URL,
        }
    }

    pub fn header_key(self) -> &'static str {
        match self {
            PlanTier::Demo => DEMO_HEADER_KEY,
            PlanTier::Pro => PRO_HEADER_KEY,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTier::Demo => write!(f, "Demo (Free)"),
            PlanTier::Pro => write!(f, "Pro/Paid"),
        }
    }
}

/// Load `.env` from the working directory (or the nearest parent that has one) into the
/// process environment. Variables that are already set keep their value.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub plan: PlanTier,
    /// COINGECKO_API_KEY. The key header is omitted when unset.
    pub api_key: Option<String>,
    /// COINGECKO_BASE_URL, defaulting to the plan's URL.
    pub base_url: String,
    pub log_level: String,
    /// HTTP_TIMEOUT_SECS
    pub http_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. `from_env` passes the process environment.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let plan = match var("USE_PRO_API") {
            Some(v) if v.trim().eq_ignore_ascii_case("true") => PlanTier::Pro,
            _ => PlanTier::Demo,
        };

        let http_timeout_secs = match var("HTTP_TIMEOUT_SECS") {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                AppError::Config("HTTP_TIMEOUT_SECS must be a whole number of seconds".to_string())
            })?,
            None => HTTP_TIMEOUT_SECS,
        };

        Ok(Self {
            plan,
            api_key: var("COINGECKO_API_KEY")
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            base_url: var("COINGECKO_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| plan.base_url().to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            http_timeout_secs,
        })
    }

    /// Status lines for `history config`. Only a prefix of the API key is shown.
    pub fn describe(&self) -> Vec<String> {
        let key = match &self.api_key {
            Some(k) => format!("{}...", k.chars().take(KEY_PREVIEW_CHARS).collect::<String>()),
            None => "Not set".to_string(),
        };
        vec![
            "CoinGecko API Configuration:".to_string(),
            format!("  Plan: {}", self.plan),
            format!("  Base URL: {}", self.base_url),
            format!("  Header Key: {}", self.plan.header_key()),
            format!("  API Key: {key}"),
        ]
    }
}
