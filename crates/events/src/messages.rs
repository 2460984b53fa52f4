use crate::error::EventsError;
use chrono::{DateTime, Utc};
use core_types::{Alert, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Enum representing the severity of a log message for structured logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured log message for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// The state of the monitored instrument after one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    /// Latest close of the primary timeframe, if any bar has been seen.
    pub price: Option<f64>,
    /// Only timeframes with a defined RSI are present.
    pub rsi_by_timeframe: BTreeMap<Timeframe, f64>,
}

/// The top-level dashboard message enum.
///
/// Serialized adjacently tagged, e.g.
/// `{"type": "Alert", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    Log(LogMessage),
    /// An alert that passed the cooldown and duplicate filters.
    Alert(Alert),
    /// Current RSI values, published once per cycle.
    MarketSnapshot(MarketSnapshot),
}

impl WsMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WsMessage::Log(_) => "Log",
            WsMessage::Alert(_) => "Alert",
            WsMessage::MarketSnapshot(_) => "MarketSnapshot",
        }
    }

    pub fn to_json(&self) -> Result<String, EventsError> {
        serde_json::to_string(self).map_err(|source| EventsError::Encode {
            kind: self.kind(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_is_adjacently_tagged() {
        let msg = WsMessage::MarketSnapshot(MarketSnapshot {
            symbol: "SPY".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
            price: Some(512.5),
            rsi_by_timeframe: BTreeMap::from([(Timeframe::FiveMinutes, 41.5)]),
        });
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "MarketSnapshot");
        assert_eq!(value["payload"]["rsi_by_timeframe"]["5min"], 41.5);
    }

    #[test]
    fn log_messages_round_trip_through_json() {
        let msg = WsMessage::Log(LogMessage {
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
            level: LogLevel::Warn,
            message: "5min fetch failed: rate limited".to_string(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.starts_with(r#"{"type":"Log","payload":"#));
        assert_eq!(serde_json::from_str::<WsMessage>(&json).unwrap(), msg);
    }
}
