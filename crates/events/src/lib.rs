//! # Sentinel Events
//!
//! This crate defines the real-time event structures published to dashboard
//! subscribers after every evaluation cycle.
//!
//! As a Layer 0 crate, it depends only on `core-types` and provides the definitive
//! language for all real-time state synchronization.

pub mod error;
pub mod messages;

pub use error::EventsError;
pub use messages::{LogLevel, LogMessage, MarketSnapshot, WsMessage};
