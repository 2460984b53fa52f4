use crate::error::ApiError;
use crate::MarketDataClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use configuration::TradierConfig;
use core_types::{Bar, Timeframe};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Upper bound for the calendar-day walk, whatever the configuration says.
const MAX_CALENDAR_DAYS: u32 = 365;

/// How far back the history fallback looks for the last trading day.
const FALLBACK_DAYS: i64 = 5;

/// Market data from the Tradier brokerage API.
#[derive(Clone)]
pub struct TradierClient {
    client: reqwest::Client,
    base_url: String,
    max_days_back: u32,
}

impl TradierClient {
    pub fn new(config: &TradierConfig) -> Result<Self, ApiError> {
        if config.api_key.trim().is_empty() {
            return Err(ApiError::InvalidData(
                "Tradier API key is not set (TRADIER_API_KEY)".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key.trim()))
            .map_err(|e| ApiError::InvalidData(format!("Invalid API key: {}", e)))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_days_back: config.max_days_back.clamp(1, MAX_CALENDAR_DAYS),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited);
        }
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: format!("{}: {}", path, text),
            });
        }
        serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
    }

    /// Walks back one calendar day at a time until `count` intraday bars are collected.
    /// Days the API rejects (weekends, holidays) are skipped.
    async fn fetch_timesales(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ApiError> {
        let bars_per_day = (390 / timeframe.duration().num_minutes().max(1)) as usize;
        let trading_days = count / bars_per_day.max(1) + 1;
        let days_back = ((trading_days * 7 / 5) * 3 / 2).max(self.max_days_back as usize);
        let days_back = days_back.min(MAX_CALENDAR_DAYS as usize);

        let today = Utc::now().date_naive();
        let mut bars = Vec::new();
        let mut trading_days_found = 0;

        for offset in 0..days_back {
            let date = today - Duration::days(offset as i64);
            match self.timesales_for_day(symbol, timeframe, date).await {
                Ok(day) if day.is_empty() => continue,
                Ok(day) => {
                    trading_days_found += 1;
                    bars.extend(day);
                    if bars.len() >= count {
                        break;
                    }
                }
                Err(ApiError::RateLimited) => return Err(ApiError::RateLimited),
                Err(ApiError::Status { status: 400, .. }) => continue,
                Err(e) => {
                    tracing::warn!(%symbol, %timeframe, %date, error = %e, "Timesales request failed, skipping day");
                }
            }
        }

        if bars.is_empty() {
            return Err(ApiError::DataUnavailable(format!(
                "no {} timesales for {} in the last {} days",
                timeframe, symbol, days_back
            )));
        }
        if bars.len() < count {
            tracing::warn!(%symbol, %timeframe, requested = count, collected = bars.len(), "Fewer bars than requested");
        }
        tracing::debug!(%symbol, %timeframe, bars = bars.len(), trading_days_found, "Timesales collected");
        Ok(tail(bars, count))
    }

    async fn timesales_for_day(&self, symbol: &str, timeframe: Timeframe, date: NaiveDate) -> Result<Vec<Bar>, ApiError> {
        let day = date.format("%Y-%m-%d");
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", timeframe.as_str().to_string()),
            ("start", format!("{} 09:30", day)),
            ("end", format!("{} 16:00", day)),
            ("session_filter", "all".to_string()),
        ];
        let response: TimesalesResponse = self.get("/markets/timesales", &params).await?;
        response
            .series
            .map(|s| s.data.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(TradierBar::into_bar)
            .collect()
    }

    /// Hourly and daily bars come from the history endpoint.
    async fn fetch_history(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ApiError> {
        let end = Utc::now().date_naive();
        let span = (count as i64 * 7 / 5 + 5).max(self.max_days_back as i64);
        let bars = self
            .history(symbol, timeframe.as_str(), end - Duration::days(span), end)
            .await?;
        if bars.is_empty() {
            return Err(ApiError::DataUnavailable(format!("no {} history for {}", timeframe, symbol)));
        }
        Ok(tail(bars, count))
    }

    /// The last trading day's daily bar, used when timesales has nothing at all.
    async fn history_fallback(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Bar>, ApiError> {
        let end = Utc::now().date_naive();
        let bars = self
            .history(symbol, "daily", end - Duration::days(FALLBACK_DAYS), end)
            .await?;
        if bars.is_empty() {
            return Err(ApiError::DataUnavailable(format!(
                "no {} timesales or recent history for {}",
                timeframe, symbol
            )));
        }
        Ok(tail(bars, 1))
    }

    async fn history(&self, symbol: &str, interval: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, ApiError> {
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("start", start.format("%Y-%m-%d").to_string()),
            ("end", end.format("%Y-%m-%d").to_string()),
        ];
        let response: HistoryResponse = self.get("/markets/history", &params).await?;
        response.into_bars()
    }
}

/// Minute intervals use timesales; `1hour` and `daily` use the history endpoint.
fn uses_timesales(timeframe: Timeframe) -> bool {
    timeframe.as_str().ends_with("min")
}

#[async_trait]
impl MarketDataClient for TradierClient {
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ApiError> {
        if !uses_timesales(timeframe) {
            return self.fetch_history(symbol, timeframe, count).await;
        }
        match self.fetch_timesales(symbol, timeframe, count).await {
            Err(ApiError::DataUnavailable(reason)) => {
                tracing::warn!(%symbol, %timeframe, %reason, "No timesales, falling back to history");
                self.history_fallback(symbol, timeframe).await
            }
            other => other,
        }
    }

    async fn is_market_open(&self) -> Result<bool, ApiError> {
        let response: ClockResponse = self.get("/markets/clock", &[]).await?;
        Ok(response.clock.state.eq_ignore_ascii_case("open"))
    }
}

/// Sorts, drops repeated timestamps and keeps the newest `count` bars.
fn tail(mut bars: Vec<Bar>, count: usize) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    let skip = bars.len().saturating_sub(count);
    bars.split_off(skip)
}

// --- Response shapes ---

/// Tradier collapses a one-element array into a bare object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TimesalesResponse {
    series: Option<Series>,
}

#[derive(Debug, Deserialize)]
struct Series {
    data: OneOrMany<TradierBar>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    history: Option<History>,
}

#[derive(Debug, Deserialize)]
struct History {
    day: OneOrMany<TradierBar>,
}

impl HistoryResponse {
    fn into_bars(self) -> Result<Vec<Bar>, ApiError> {
        self.history
            .map(|h| h.day.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(TradierBar::into_bar)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ClockResponse {
    clock: MarketClock,
}

#[derive(Debug, Deserialize)]
struct MarketClock {
    state: String,
}

/// A timesales entry or a history day.
#[derive(Debug, Deserialize)]
struct TradierBar {
    /// Unix seconds on timesales entries. Their `time` field is exchange-local
    /// wall time without an offset and is not used.
    timestamp: Option<i64>,
    /// Calendar date on history days.
    date: Option<String>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: u64,
}

impl TradierBar {
    fn into_bar(self) -> Result<Bar, ApiError> {
        let timestamp = self.resolve_timestamp()?;
        Ok(Bar {
            timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        })
    }

    fn resolve_timestamp(&self) -> Result<DateTime<Utc>, ApiError> {
        if let Some(secs) = self.timestamp {
            return DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| ApiError::InvalidData(format!("Invalid timestamp: {}", secs)));
        }
        if let Some(date) = &self.date {
            return NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
                .ok_or_else(|| ApiError::InvalidData(format!("Invalid date: {}", date)));
        }
        Err(ApiError::InvalidData("bar has no time information".to_string()))
    }
}
