use crate::{Batch, BarSource, MarketDataClient};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{Bar, Timeframe};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Polls an upstream client for every timeframe of a cycle concurrently.
///
/// Only closed bars are passed on. The upstream's newest bar is usually still
/// forming, and its close would be frozen into the RSI the first time it is seen.
pub struct LiveBarSource {
    client: Arc<dyn MarketDataClient>,
    symbol: String,
    lookbacks: BTreeMap<Timeframe, usize>,
}

impl LiveBarSource {
    pub fn new(
        client: Arc<dyn MarketDataClient>,
        symbol: impl Into<String>,
        lookbacks: BTreeMap<Timeframe, usize>,
    ) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            lookbacks,
        }
    }

    pub fn from_config(client: Arc<dyn MarketDataClient>, config: &configuration::Config) -> Self {
        let lookbacks = config
            .timeframes
            .iter()
            .map(|tf| (*tf, config.lookback(*tf)))
            .collect();
        Self::new(client, config.symbol.clone(), lookbacks)
    }
}

#[async_trait]
impl BarSource for LiveBarSource {
    async fn next_batch(&mut self) -> Batch {
        let fetches = self.lookbacks.iter().map(|(timeframe, count)| {
            let client = Arc::clone(&self.client);
            let symbol = self.symbol.as_str();
            async move { (*timeframe, client.fetch_bars(symbol, *timeframe, *count).await) }
        });
        let results = join_all(fetches).await;
        let now = Utc::now();
        results
            .into_iter()
            .map(|(timeframe, result)| (timeframe, result.map(|bars| closed_bars(bars, timeframe, now))))
            .collect()
    }

    async fn is_market_open(&self) -> bool {
        match self.client.is_market_open().await {
            Ok(open) => open,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read the market clock, treating the market as closed");
                false
            }
        }
    }
}

/// Drops bars whose interval has not ended by `now`.
pub fn closed_bars(mut bars: Vec<Bar>, timeframe: Timeframe, now: DateTime<Utc>) -> Vec<Bar> {
    let duration = timeframe.duration();
    bars.retain(|bar| bar.timestamp + duration <= now);
    bars
}
