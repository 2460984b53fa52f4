use crate::error::ConfigError;
use core_types::Timeframe;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// The root configuration structure for the entire application.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The instrument being monitored (e.g., "SPY").
    pub symbol: String,
    /// Seconds between two evaluation cycles.
    pub polling_interval_seconds: u64,
    /// Run cycles even when the data source reports the market closed.
    pub bypass_market_hours: bool,
    /// The active timeframes. Fixed for the lifetime of the process.
    pub timeframes: Vec<Timeframe>,
    /// Default number of bars requested per timeframe.
    pub historical_bars_count: usize,
    /// Per-timeframe overrides of `historical_bars_count`.
    pub lookback_overrides: BTreeMap<Timeframe, usize>,
    /// The timeframe whose bar timestamp and RSI label a signal.
    /// Defaults to the finest active timeframe.
    pub primary_timeframe: Option<Timeframe>,
    pub rsi: RsiConfig,
    pub confirmation: Confirmation,
    pub alerts: AlertConfig,
    pub playback: PlaybackConfig,
    pub mock: MockConfig,
    pub tradier: TradierConfig,
    pub sinks: SinkConfig,
    pub logging: LoggingConfig,
}

/// RSI indicator and zone thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    pub oversold_threshold: f64,
    pub overbought_threshold: f64,
    /// RSI must climb back to this level to reclaim from oversold.
    pub bullish_reclaim_upper: f64,
    /// RSI must fall back to this level to reclaim from overbought.
    pub bearish_reclaim_lower: f64,
}

/// How many timeframes have to agree before a signal qualifies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Confirmation {
    /// Every monitored timeframe must be ready and agree. A timeframe still
    /// warming up, or whose fetch failed, blocks the signal for that cycle.
    All,
    /// At least `count` timeframes must agree on the same kind.
    AtLeast { count: usize },
    /// The designated timeframes must all be ready and agree; the rest are ignored.
    Required { timeframes: Vec<Timeframe> },
}

/// Where the alert manager takes "now" from when evaluating cooldowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum AlertClock {
    /// The system clock.
    #[default]
    Wall,
    /// The timestamp of the bar that produced the signal.
    Bar,
}

/// Alert system configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub cooldown_seconds: u64,
    /// Number of alerts kept in memory for dashboard replay.
    pub history_capacity: usize,
    /// Number of (kind, timestamp) pairs remembered for duplicate suppression.
    pub dedup_capacity: usize,
    pub clock: AlertClock,
}

/// How bars of coarser timeframes are lined up against the playback cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum PlaybackAlignment {
    /// Every timeframe returns the prefix up to the cursor index.
    #[default]
    Index,
    /// Every timeframe returns the bars at or before the longest series' bar at the cursor.
    Timestamp,
}

/// Historical playback configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Use recorded bars instead of the live client.
    pub enabled: bool,
    /// Directory holding one `{SYMBOL}_{timeframe}.json` file per timeframe.
    pub data_dir: PathBuf,
    /// Wrap to the first bar after the last one.
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    /// Start at the first position where every timeframe can produce an RSI.
    pub start_at_warmup: bool,
    pub alignment: PlaybackAlignment,
}

/// Simulated random-walk market, for running without credentials or recordings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    pub enabled: bool,
    /// Starting price of the walk.
    pub base_price: f64,
    /// Fixed seed for a reproducible walk; random when unset.
    pub seed: Option<u64>,
}

/// Tradier API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradierConfig {
    pub api_key: String,
    /// Defaults to the sandbox for safety.
    pub base_url: String,
    pub request_timeout_seconds: u64,
    /// How many calendar days the timesales walk may look back.
    pub max_days_back: u32,
}

/// Outbound notification sinks. A sink without credentials is disabled.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SinkConfig {
    pub discord: DiscordConfig,
    pub telegram: TelegramConfig,
    /// Also write every alert to the log.
    pub log: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// When set, logs are also written to a daily rolling file in this directory.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

// --- Default Implementations ---
// Mirror the product defaults so an empty `config.toml` is a working setup.

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "SPY".to_string(),
            polling_interval_seconds: 20,
            bypass_market_hours: false,
            timeframes: vec![
                Timeframe::OneMinute,
                Timeframe::FiveMinutes,
                Timeframe::ThirtyMinutes,
            ],
            historical_bars_count: 2000,
            lookback_overrides: BTreeMap::new(),
            primary_timeframe: None,
            rsi: RsiConfig::default(),
            confirmation: Confirmation::default(),
            alerts: AlertConfig::default(),
            playback: PlaybackConfig::default(),
            mock: MockConfig::default(),
            tradier: TradierConfig::default(),
            sinks: SinkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: 14,
            oversold_threshold: 30.0,
            overbought_threshold: 70.0,
            bullish_reclaim_upper: 35.0,
            bearish_reclaim_lower: 65.0,
        }
    }
}

impl Default for Confirmation {
    fn default() -> Self {
        Confirmation::All
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            history_capacity: 100,
            dedup_capacity: 1024,
            clock: AlertClock::Wall,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: PathBuf::from("historical_data"),
            loop_playback: true,
            start_at_warmup: false,
            alignment: PlaybackAlignment::Index,
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_price: 500.0,
            seed: None,
        }
    }
}

impl Default for TradierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://sandbox.tradier.com/v1".to_string(),
            request_timeout_seconds: 10,
            max_days_back: 30,
        }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            username: "RSI Alerter".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "rsi-sentinel.log".to_string(),
        }
    }
}

impl Config {
    /// The timeframe labelling signals: the configured one, else the finest active one.
    pub fn primary_timeframe(&self) -> Option<Timeframe> {
        self.primary_timeframe
            .or_else(|| self.timeframes.iter().min().copied())
    }

    /// Number of bars to request for `timeframe`.
    pub fn lookback(&self, timeframe: Timeframe) -> usize {
        self.lookback_overrides
            .get(&timeframe)
            .copied()
            .unwrap_or(self.historical_bars_count)
    }

    /// Checks the cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.symbol.trim().is_empty() {
            return invalid("symbol must not be empty".to_string());
        }
        if self.timeframes.is_empty() {
            return invalid("at least one timeframe must be configured".to_string());
        }
        let mut seen = HashSet::new();
        for tf in &self.timeframes {
            if !seen.insert(*tf) {
                return invalid(format!("timeframe {} is configured twice", tf));
            }
        }
        if self.polling_interval_seconds == 0 {
            return invalid("polling_interval_seconds must be positive".to_string());
        }

        let rsi = &self.rsi;
        if rsi.period < 2 {
            return invalid(format!("RSI period must be at least 2, got {}", rsi.period));
        }
        let ordered = 0.0 <= rsi.oversold_threshold
            && rsi.oversold_threshold < rsi.bullish_reclaim_upper
            && rsi.bullish_reclaim_upper <= rsi.bearish_reclaim_lower
            && rsi.bearish_reclaim_lower < rsi.overbought_threshold
            && rsi.overbought_threshold <= 100.0;
        if !ordered {
            return invalid(format!(
                "RSI thresholds must satisfy 0 <= oversold ({}) < bullish reclaim ({}) <= bearish reclaim ({}) < overbought ({}) <= 100",
                rsi.oversold_threshold,
                rsi.bullish_reclaim_upper,
                rsi.bearish_reclaim_lower,
                rsi.overbought_threshold
            ));
        }

        if self.mock.enabled && !(self.mock.base_price.is_finite() && self.mock.base_price > 0.0) {
            return invalid(format!("mock.base_price must be positive, got {}", self.mock.base_price));
        }

        if let Some(primary) = self.primary_timeframe {
            if !self.timeframes.contains(&primary) {
                return invalid(format!("primary timeframe {} is not an active timeframe", primary));
            }
        }

        match &self.confirmation {
            Confirmation::All => {}
            Confirmation::AtLeast { count } => {
                if *count == 0 || *count > self.timeframes.len() {
                    return invalid(format!(
                        "confirmation count must be between 1 and {}, got {}",
                        self.timeframes.len(),
                        count
                    ));
                }
            }
            Confirmation::Required { timeframes } => {
                if timeframes.is_empty() {
                    return invalid("required confirmation needs at least one timeframe".to_string());
                }
                if let Some(tf) = timeframes.iter().find(|tf| !self.timeframes.contains(tf)) {
                    return invalid(format!("required timeframe {} is not an active timeframe", tf));
                }
            }
        }

        if self.alerts.history_capacity == 0 || self.alerts.dedup_capacity == 0 {
            return invalid("alert history and dedup capacities must be positive".to_string());
        }
        if self.timeframes.iter().any(|tf| self.lookback(*tf) < rsi.period) {
            return invalid(format!(
                "every timeframe needs a lookback of at least the RSI period ({})",
                rsi.period
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_timeframe(), Some(Timeframe::OneMinute));
        assert_eq!(config.lookback(Timeframe::FiveMinutes), 2000);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let mut config = Config::default();
        config.rsi.bullish_reclaim_upper = 25.0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn duplicate_timeframes_are_rejected() {
        let mut config = Config::default();
        config.timeframes.push(Timeframe::OneMinute);
        assert!(config.validate().is_err());
    }

    #[test]
    fn confirmation_must_reference_active_timeframes() {
        let mut config = Config::default();
        config.confirmation = Confirmation::Required {
            timeframes: vec![Timeframe::Daily],
        };
        assert!(config.validate().is_err());

        config.confirmation = Confirmation::AtLeast { count: 4 };
        assert!(config.validate().is_err());

        config.confirmation = Confirmation::AtLeast { count: 2 };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn enabled_mock_needs_a_positive_price() {
        let mut config = Config::default();
        config.mock.base_price = 0.0;
        assert!(config.validate().is_ok());
        config.mock.enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn lookback_override_wins() {
        let mut config = Config::default();
        config.lookback_overrides.insert(Timeframe::ThirtyMinutes, 200);
        assert_eq!(config.lookback(Timeframe::ThirtyMinutes), 200);
        assert_eq!(config.lookback(Timeframe::OneMinute), 2000);
    }
}
