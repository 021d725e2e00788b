use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::try_join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::pipeline::{normalize_market_chart, normalize_ohlc_payload, normalize_prices, NormalizedTable};
use crate::types::{Days, HistoryResponse, PriceSnapshot};

/// Upstream error bodies are cut to this many characters.
const ERROR_BODY_MAX_CHARS: usize = 500;

/// One CoinGecko REST call: path plus query parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint<'a> {
    MarketChart {
        coin_id: &'a str,
        vs_currency: &'a str,
        days: Days,
    },
    MarketChartRange {
        coin_id: &'a str,
        vs_currency: &'a str,
        /// Epoch seconds.
        from: i64,
        to: i64,
    },
    ContractMarketChart {
        platform: &'a str,
        contract_address: &'a str,
        vs_currency: &'a str,
        days: Days,
    },
    Ohlc {
        coin_id: &'a str,
        vs_currency: &'a str,
        days: Days,
    },
    History {
        coin_id: &'a str,
        /// DD-MM-YYYY
        date: &'a str,
    },
}

impl Endpoint<'_> {
    pub fn path(&self) -> String {
        match self {
            Endpoint::MarketChart { coin_id, .. } => format!("/coins/{coin_id}/market_chart"),
            Endpoint::MarketChartRange { coin_id, .. } => {
                format!("/coins/{coin_id}/market_chart/range")
            }
            Endpoint::ContractMarketChart {
                platform,
                contract_address,
                ..
            } => format!("/coins/{platform}/contract/{contract_address}/market_chart"),
            Endpoint::Ohlc { coin_id, .. } => format!("/coins/{coin_id}/ohlc"),
            Endpoint::History { coin_id, .. } => format!("/coins/{coin_id}/history"),
        }
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::MarketChart {
                vs_currency, days, ..
            }
            | Endpoint::ContractMarketChart {
                vs_currency, days, ..
            }
            | Endpoint::Ohlc {
                vs_currency, days, ..
            } => vec![
                ("vs_currency", vs_currency.to_string()),
                ("days", days.to_string()),
            ],
            Endpoint::MarketChartRange {
                vs_currency,
                from,
                to,
                ..
            } => vec![
                ("vs_currency", vs_currency.to_string()),
                ("from", from.to_string()),
                ("to", to.to_string()),
            ],
            Endpoint::History { date, .. } => vec![
                ("date", date.to_string()),
                ("localization", "false".to_string()),
            ],
        }
    }
}

/// Async CoinGecko client. Plan tier, key header and base URL are fixed at construction.
#[derive(Debug, Clone)]
pub struct CoinGeckoClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &cfg.api_key {
            let mut value = HeaderValue::from_str(key).map_err(|_| {
                AppError::Config("COINGECKO_API_KEY contains invalid header characters".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(HeaderName::from_static(cfg.plan.header_key()), value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: cfg.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET an endpoint and decode its JSON body. Non-2xx statuses become `AppError::Upstream`.
    pub async fn get_json(&self, endpoint: &Endpoint<'_>) -> Result<Value> {
        let path = endpoint.path();
        let url = format!("{}{}", self.base_url, path);
        debug!(endpoint = %path, "GET");

        let resp = self.http.get(&url).query(&endpoint.query()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_MAX_CHARS).collect(),
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn market_chart(&self, coin_id: &str, vs_currency: &str, days: Days) -> Result<Value> {
        self.get_json(&Endpoint::MarketChart {
            coin_id,
            vs_currency,
            days,
        })
        .await
    }

    pub async fn market_chart_range(
        &self,
        coin_id: &str,
        vs_currency: &str,
        from: i64,
        to: i64,
    ) -> Result<Value> {
        self.get_json(&Endpoint::MarketChartRange {
            coin_id,
            vs_currency,
            from,
            to,
        })
        .await
    }

    pub async fn contract_market_chart(
        &self,
        platform: &str,
        contract_address: &str,
        vs_currency: &str,
        days: Days,
    ) -> Result<Value> {
        self.get_json(&Endpoint::ContractMarketChart {
            platform,
            contract_address,
            vs_currency,
            days,
        })
        .await
    }

    pub async fn ohlc(&self, coin_id: &str, vs_currency: &str, days: Days) -> Result<Value> {
        self.get_json(&Endpoint::Ohlc {
            coin_id,
            vs_currency,
            days,
        })
        .await
    }

    /// Price, market cap and volume (USD) for one coin on one day. `date` is DD-MM-YYYY.
    pub async fn history_snapshot(&self, coin_id: &str, date: &str) -> Result<PriceSnapshot> {
        let raw = self.get_json(&Endpoint::History { coin_id, date }).await?;
        let resp: HistoryResponse = serde_json::from_value(raw)?;
        Ok(PriceSnapshot::from_history(date, resp))
    }

    /// `price`, `market_cap`, `volume` for the last `days` days.
    pub async fn historical_prices(
        &self,
        coin_id: &str,
        vs_currency: &str,
        days: Days,
    ) -> Result<NormalizedTable> {
        let raw = self.market_chart(coin_id, vs_currency, days).await?;
        let table = normalize_market_chart(&raw)?;
        info!(coin_id, rows = table.len(), "fetched market chart");
        Ok(table)
    }

    /// `price`, `market_cap`, `volume` between two YYYY-MM-DD dates.
    pub async fn historical_prices_range(
        &self,
        coin_id: &str,
        vs_currency: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<NormalizedTable> {
        let (from, to) = (date_to_unix(start_date)?, date_to_unix(end_date)?);
        let raw = self.market_chart_range(coin_id, vs_currency, from, to).await?;
        let table = normalize_market_chart(&raw)?;
        info!(coin_id, start_date, end_date, rows = table.len(), "fetched market chart range");
        Ok(table)
    }

    /// Only the `price` column between two YYYY-MM-DD dates.
    pub async fn price_history_range(
        &self,
        coin_id: &str,
        vs_currency: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<NormalizedTable> {
        let (from, to) = (date_to_unix(start_date)?, date_to_unix(end_date)?);
        let raw = self.market_chart_range(coin_id, vs_currency, from, to).await?;
        let table = normalize_prices(&raw)?;
        info!(coin_id, start_date, end_date, rows = table.len(), "fetched price range");
        Ok(table)
    }

    pub async fn token_history_by_contract(
        &self,
        platform: &str,
        contract_address: &str,
        vs_currency: &str,
        days: Days,
    ) -> Result<NormalizedTable> {
        let raw = self
            .contract_market_chart(platform, contract_address, vs_currency, days)
            .await?;
        let table = normalize_market_chart(&raw)?;
        info!(platform, contract_address, rows = table.len(), "fetched contract market chart");
        Ok(table)
    }

    /// `open`, `high`, `low`, `close` candles.
    pub async fn ohlc_table(
        &self,
        coin_id: &str,
        vs_currency: &str,
        days: Days,
    ) -> Result<NormalizedTable> {
        let raw = self.ohlc(coin_id, vs_currency, days).await?;
        let table = normalize_ohlc_payload(&raw)?;
        info!(coin_id, candles = table.len(), "fetched ohlc");
        Ok(table)
    }

    /// Fetch several coins concurrently. The first failure aborts the whole batch.
    /// Results keep the order of `coin_ids`.
    pub async fn fetch_many(
        &self,
        coin_ids: &[String],
        vs_currency: &str,
        days: Days,
    ) -> Result<Vec<(String, NormalizedTable)>> {
        let requests = coin_ids.iter().map(|coin_id| async move {
            let table = self.historical_prices(coin_id, vs_currency, days).await?;
            Ok::<_, AppError>((coin_id.clone(), table))
        });
        try_join_all(requests).await
    }
}

/// YYYY-MM-DD at midnight UTC, as epoch seconds.
pub fn date_to_unix(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| AppError::Config(format!("`{date}` is not a YYYY-MM-DD date")))?;
    Ok(day.and_time(chrono::NaiveTime::MIN).and_utc().timestamp())
}

/// Normalize a snapshot date to the DD-MM-YYYY form the history endpoint expects.
/// Accepts either YYYY-MM-DD or DD-MM-YYYY.
pub fn snapshot_date(date: &str) -> Result<String> {
    let date = date.trim();
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%d-%m-%Y"))
        .map(|d| d.format("%d-%m-%Y").to_string())
        .map_err(|_| AppError::Config(format!("`{date}` is not a YYYY-MM-DD or DD-MM-YYYY date")))
}
