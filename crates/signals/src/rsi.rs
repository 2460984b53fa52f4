use crate::error::SignalError;
use chrono::{DateTime, Utc};
use core_types::Bar;
use serde::Serialize;

/// The outcome of one ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum RsiReading {
    /// Not enough closes yet. This is a normal state, not an error.
    WarmingUp { seen: usize, needed: usize },
    Ready(f64),
}

impl RsiReading {
    pub fn value(&self) -> Option<f64> {
        match self {
            RsiReading::Ready(v) => Some(*v),
            RsiReading::WarmingUp { .. } => None,
        }
    }
}

/// The persistent state of a Wilder RSI.
///
/// While warming up, `avg_up`/`avg_down` hold the running sums of gains and
/// losses; they become averages once `warmup_count` reaches the period.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RsiState {
    pub avg_up: f64,
    pub avg_down: f64,
    pub last_close: Option<f64>,
    pub value: Option<f64>,
    pub warmup_count: usize,
}

/// Incremental Wilder RSI over a single timeframe.
#[derive(Debug, Clone)]
pub struct RsiSeries {
    period: usize,
    state: RsiState,
    last_timestamp: Option<DateTime<Utc>>,
}

impl RsiSeries {
    pub fn new(period: usize) -> Result<Self, SignalError> {
        if period < 2 {
            return Err(SignalError::InvalidParameters(format!(
                "RSI period must be at least 2, got {}",
                period
            )));
        }
        Ok(Self {
            period,
            state: RsiState::default(),
            last_timestamp: None,
        })
    }

    pub fn state(&self) -> &RsiState {
        &self.state
    }

    pub fn value(&self) -> Option<f64> {
        self.state.value
    }

    pub fn is_ready(&self) -> bool {
        self.state.value.is_some()
    }

    /// Timestamp of the newest bar fed through `ingest_bar`.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_timestamp
    }

    /// Clears the timestamp guard but keeps the averages and last close, so a
    /// stream that restarted from older bars continues from the current state.
    pub fn rewind(&mut self) {
        self.last_timestamp = None;
    }

    /// Feeds the next close.
    ///
    /// The value is defined from the `period`-th close on. The seed is the plain
    /// mean of the `period - 1` deltas seen so far; every later close applies
    /// Wilder's smoothing `avg = (avg * (n - 1) + current) / n`.
    pub fn ingest(&mut self, close: f64) -> Result<RsiReading, SignalError> {
        if !close.is_finite() {
            return Err(SignalError::InvalidClose(close));
        }

        let state = &mut self.state;
        let Some(prev) = state.last_close.replace(close) else {
            state.warmup_count = 1;
            return Ok(self.reading());
        };

        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let n = self.period as f64;

        if state.value.is_none() {
            state.warmup_count += 1;
            state.avg_up += gain;
            state.avg_down += loss;
            if state.warmup_count == self.period {
                let deltas = (self.period - 1) as f64;
                state.avg_up /= deltas;
                state.avg_down /= deltas;
                state.value = Some(rsi_from_averages(state.avg_up, state.avg_down));
            }
        } else {
            state.avg_up = (state.avg_up * (n - 1.0) + gain) / n;
            state.avg_down = (state.avg_down * (n - 1.0) + loss) / n;
            state.value = Some(rsi_from_averages(state.avg_up, state.avg_down));
        }

        Ok(self.reading())
    }

    /// Feeds a bar, rejecting any timestamp that is not strictly newer than the last one.
    /// A rejected bar leaves the state untouched.
    pub fn ingest_bar(&mut self, bar: &Bar) -> Result<RsiReading, SignalError> {
        if let Some(previous) = self.last_timestamp {
            if bar.timestamp <= previous {
                return Err(SignalError::OutOfOrderBar {
                    previous,
                    received: bar.timestamp,
                });
            }
        }
        let reading = self.ingest(bar.close)?;
        self.last_timestamp = Some(bar.timestamp);
        Ok(reading)
    }

    /// Feeds every bar newer than the last ingested one and returns how many were consumed.
    ///
    /// `bars` must be ordered; older bars (a prefix already seen) are skipped.
    pub fn ingest_new_bars(&mut self, bars: &[Bar]) -> Result<usize, SignalError> {
        let mut consumed = 0;
        for bar in bars {
            if self.last_timestamp.is_some_and(|last| bar.timestamp <= last) {
                continue;
            }
            self.ingest_bar(bar)?;
            consumed += 1;
        }
        Ok(consumed)
    }

    fn reading(&self) -> RsiReading {
        match self.state.value {
            Some(v) => RsiReading::Ready(v),
            None => RsiReading::WarmingUp {
                seen: self.state.warmup_count,
                needed: self.period,
            },
        }
    }
}

fn rsi_from_averages(avg_up: f64, avg_down: f64) -> f64 {
    if avg_down == 0.0 {
        return 100.0;
    }
    if avg_up == 0.0 {
        return 0.0;
    }
    let rs = avg_up / avg_down;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}
