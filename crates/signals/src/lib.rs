//! # Signal Pipeline
//!
//! The pure numeric core of the alerter: an incremental Wilder RSI per
//! timeframe and a detector that turns per-timeframe RSI readings into at most
//! one confirmed `SignalEvent` per cycle.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** no I/O, no clocks, no async. It depends only on `core-types`
//!   and `configuration`.
//! - **State per timeframe:** every timeframe runs the identical algorithm, so
//!   state lives in maps keyed by `Timeframe` rather than behind a trait.
//!
//! ## Public API
//!
//! - `RsiSeries`: `ingest` one close at a time, O(1) per bar.
//! - `SignalDetector`: `evaluate` the current readings once per cycle.

pub mod detector;
pub mod error;
pub mod rsi;

pub use detector::{Direction, SignalDetector, Thresholds, TimeframeReading, ZoneState};
pub use error::SignalError;
pub use rsi::{RsiReading, RsiSeries, RsiState};
