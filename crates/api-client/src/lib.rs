//! # Market Data
//!
//! The seam between the engine and where bars come from.
//!
//! - `MarketDataClient` is a request/response upstream API (`TradierClient`).
//! - `BarSource` is what the engine polls once per cycle. `LiveBarSource`
//!   wraps a client, `HistoricalPlaybackSource` replays recorded files and
//!   `MockBarSource` simulates a random walk.

use async_trait::async_trait;
use core_types::{Bar, Timeframe};
use std::collections::BTreeMap;

pub mod error;
pub mod live;
pub mod mock;
pub mod playback;
pub mod tradier;

pub use error::{ApiError, PlaybackError};
pub use live::{closed_bars, LiveBarSource};
pub use mock::MockBarSource;
pub use playback::{HistoricalPlaybackSource, PlaybackOptions};
pub use tradier::TradierClient;

/// One cycle's worth of bars: every timeframe succeeds or fails on its own.
pub type Batch = BTreeMap<Timeframe, Result<Vec<Bar>, ApiError>>;

/// The generic interface for an upstream market data API.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Fetches up to `count` of the most recent bars, oldest first.
    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, ApiError>;

    async fn is_market_open(&self) -> Result<bool, ApiError>;
}

/// What the engine polls for bars once per cycle.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn next_batch(&mut self) -> Batch;

    async fn is_market_open(&self) -> bool {
        true
    }

    /// A finite source reports `true` once it has nothing new left to serve.
    fn is_exhausted(&self) -> bool {
        false
    }
}
