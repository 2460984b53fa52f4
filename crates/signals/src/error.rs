use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SignalError {
    #[error("Signal pipeline received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("RSI cannot ingest a non-finite close: {0}")]
    InvalidClose(f64),

    #[error("Bar at {received} is not newer than the last ingested bar at {previous}")]
    OutOfOrderBar {
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },
}
