//! # Alerter
//!
//! Turns qualified `SignalEvent`s into `Alert`s and hands them to sinks.
//!
//! - `AlertManager` applies the cooldown and duplicate policy.
//! - `AlertHistory` keeps the most recent alerts for dashboard snapshots.
//! - `AlertSink` implementations deliver alerts (webhook, Telegram, log,
//!   dashboard broadcast).

pub mod clock;
pub mod error;
pub mod history;
pub mod manager;
pub mod sinks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AlerterError;
pub use history::AlertHistory;
pub use manager::{format_message, AlertManager};
pub use sinks::{sinks_from_config, AlertSink, BroadcastSink, LogSink, TelegramSink, WebhookSink};
