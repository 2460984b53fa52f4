use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bar resolution.
///
/// The declaration order is the natural ordering from the finest to the
/// coarsest resolution, so a `BTreeMap<Timeframe, _>` iterates 1min first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1min")]
    OneMinute,
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "daily")]
    Daily,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::FifteenMinutes,
        Timeframe::ThirtyMinutes,
        Timeframe::OneHour,
        Timeframe::Daily,
    ];

    /// The tag used in configuration, file names and upstream API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMinute => "1min",
            Timeframe::FiveMinutes => "5min",
            Timeframe::FifteenMinutes => "15min",
            Timeframe::ThirtyMinutes => "30min",
            Timeframe::OneHour => "1hour",
            Timeframe::Daily => "daily",
        }
    }

    /// Wall-clock span covered by one bar.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::OneMinute => Duration::minutes(1),
            Timeframe::FiveMinutes => Duration::minutes(5),
            Timeframe::FifteenMinutes => Duration::minutes(15),
            Timeframe::ThirtyMinutes => Duration::minutes(30),
            Timeframe::OneHour => Duration::hours(1),
            Timeframe::Daily => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == tag)
            .ok_or_else(|| CoreError::InvalidInput("timeframe".to_string(), s.to_string()))
    }
}

/// The classification of an RSI reading, and the kind of a qualified signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Oversold,
    Overbought,
    BullishReclaim,
    BearishReclaim,
    None,
}

impl SignalKind {
    pub fn is_none(&self) -> bool {
        matches!(self, SignalKind::None)
    }

    /// Banner used at the top of alert messages.
    pub fn banner(&self) -> &'static str {
        match self {
            SignalKind::Oversold => "🔻 OVERSOLD",
            SignalKind::Overbought => "🔺 OVERBOUGHT",
            SignalKind::BullishReclaim => "📈 BULLISH RECLAIM",
            SignalKind::BearishReclaim => "📉 BEARISH RECLAIM",
            SignalKind::None => "NONE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Oversold => "oversold",
            SignalKind::Overbought => "overbought",
            SignalKind::BullishReclaim => "bullish_reclaim",
            SignalKind::BearishReclaim => "bearish_reclaim",
            SignalKind::None => "none",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
