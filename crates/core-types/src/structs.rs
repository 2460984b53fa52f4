use crate::enums::{SignalKind, Timeframe};
use crate::error::CoreError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single OHLCV bar. Only `close` feeds the RSI; the rest is kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: u64,
}

impl Bar {
    /// A flat bar where every price equals `close`. Handy for synthetic series.
    pub fn from_close(timestamp: DateTime<Utc>, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0,
        }
    }
}

/// A qualified multi-timeframe signal produced by one detector evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// The per-timeframe classification of every timeframe that took part.
    pub timeframe_votes: BTreeMap<Timeframe, SignalKind>,
    pub qualified_kind: SignalKind,
    /// Timestamp of the primary timeframe's newest bar.
    pub timestamp: DateTime<Utc>,
    pub primary_timeframe: Timeframe,
    pub primary_timeframe_rsi: f64,
    pub rsi_by_timeframe: BTreeMap<Timeframe, f64>,
}

/// An alert that passed the cooldown and duplicate filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Derived from (symbol, kind, timestamp), so the same bar always maps to the same id.
    pub id: Uuid,
    /// Monotonic per alert manager.
    pub sequence: u64,
    pub symbol: String,
    pub kind: SignalKind,
    pub timestamp: DateTime<Utc>,
    pub rsi_snapshot: BTreeMap<Timeframe, f64>,
    pub message: String,
}

impl Alert {
    pub fn derive_id(symbol: &str, kind: SignalKind, timestamp: DateTime<Utc>) -> Uuid {
        let name = format!("{}:{}:{}", symbol, kind.as_str(), timestamp.timestamp_millis());
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

/// Parses an ISO-8601 timestamp. Offsets are honoured; naive values are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CoreError::InvalidTimestamp(raw.to_string()))
}

mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
