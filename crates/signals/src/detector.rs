use crate::error::SignalError;
use chrono::{DateTime, Utc};
use configuration::{Config, Confirmation, RsiConfig};
use core_types::{SignalEvent, SignalKind, Timeframe};
use serde::Serialize;
use std::collections::BTreeMap;

/// Kinds in the order they win when several qualify in the same cycle.
const PRIORITY: [SignalKind; 4] = [
    SignalKind::BullishReclaim,
    SignalKind::BearishReclaim,
    SignalKind::Oversold,
    SignalKind::Overbought,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Low,
    High,
}

/// The per-timeframe exhaustion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ZoneState {
    #[default]
    Neutral,
    Exhausted(Direction),
}

/// RSI zone boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub oversold: f64,
    pub overbought: f64,
    pub bullish_reclaim: f64,
    pub bearish_reclaim: f64,
}

impl From<&RsiConfig> for Thresholds {
    fn from(config: &RsiConfig) -> Self {
        Self {
            oversold: config.oversold_threshold,
            overbought: config.overbought_threshold,
            bullish_reclaim: config.bullish_reclaim_upper,
            bearish_reclaim: config.bearish_reclaim_lower,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&RsiConfig::default())
    }
}

impl ZoneState {
    /// Classifies `rsi` against the current state and returns the next state.
    ///
    /// A reclaim is only possible out of the matching exhaustion; between the
    /// exhaustion level and the reclaim level the state is held.
    pub fn step(self, rsi: f64, t: &Thresholds) -> (SignalKind, ZoneState) {
        if rsi <= t.oversold {
            return (SignalKind::Oversold, ZoneState::Exhausted(Direction::Low));
        }
        if rsi >= t.overbought {
            return (SignalKind::Overbought, ZoneState::Exhausted(Direction::High));
        }
        match self {
            ZoneState::Exhausted(Direction::Low) if rsi >= t.bullish_reclaim => {
                (SignalKind::BullishReclaim, ZoneState::Neutral)
            }
            ZoneState::Exhausted(Direction::High) if rsi <= t.bearish_reclaim => {
                (SignalKind::BearishReclaim, ZoneState::Neutral)
            }
            state => (SignalKind::None, state),
        }
    }
}

/// What the detector knows about one timeframe in the current cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeframeReading {
    /// `None` while the timeframe's RSI is still warming up.
    pub rsi: Option<f64>,
    /// Timestamp of the newest bar behind the reading.
    pub as_of: DateTime<Utc>,
}

/// Multi-timeframe confirmation of RSI exhaustion and reclaim.
pub struct SignalDetector {
    thresholds: Thresholds,
    confirmation: Confirmation,
    timeframes: Vec<Timeframe>,
    primary: Timeframe,
    states: BTreeMap<Timeframe, ZoneState>,
}

impl SignalDetector {
    pub fn new(
        thresholds: Thresholds,
        timeframes: &[Timeframe],
        confirmation: Confirmation,
        primary: Timeframe,
    ) -> Result<Self, SignalError> {
        if timeframes.is_empty() {
            return Err(SignalError::InvalidParameters(
                "the detector needs at least one timeframe".to_string(),
            ));
        }
        if !timeframes.contains(&primary) {
            return Err(SignalError::InvalidParameters(format!(
                "primary timeframe {} is not monitored",
                primary
            )));
        }
        if let Confirmation::Required { timeframes: required } = &confirmation {
            if required.is_empty() || required.iter().any(|tf| !timeframes.contains(tf)) {
                return Err(SignalError::InvalidParameters(
                    "required timeframes must be a non-empty subset of the monitored ones".to_string(),
                ));
            }
        }
        if let Confirmation::AtLeast { count } = confirmation {
            if count == 0 {
                return Err(SignalError::InvalidParameters(
                    "confirmation count must be positive".to_string(),
                ));
            }
        }

        let mut timeframes = timeframes.to_vec();
        timeframes.sort();
        Ok(Self {
            thresholds,
            confirmation,
            states: timeframes.iter().map(|tf| (*tf, ZoneState::Neutral)).collect(),
            timeframes,
            primary,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SignalError> {
        let primary = config.primary_timeframe().ok_or_else(|| {
            SignalError::InvalidParameters("no timeframes configured".to_string())
        })?;
        Self::new(
            Thresholds::from(&config.rsi),
            &config.timeframes,
            config.confirmation.clone(),
            primary,
        )
    }

    pub fn state(&self, timeframe: Timeframe) -> Option<ZoneState> {
        self.states.get(&timeframe).copied()
    }

    pub fn states(&self) -> &BTreeMap<Timeframe, ZoneState> {
        &self.states
    }

    /// Evaluates one cycle of readings.
    ///
    /// Every timeframe with a defined RSI advances its state machine, whether or
    /// not a signal qualifies. Timeframes without a reading are left out of the
    /// vote. Returns at most one event.
    pub fn evaluate(&mut self, readings: &BTreeMap<Timeframe, TimeframeReading>) -> Option<SignalEvent> {
        let mut votes = BTreeMap::new();
        let mut rsi_by_timeframe = BTreeMap::new();

        for tf in &self.timeframes {
            let Some(reading) = readings.get(tf) else { continue };
            let Some(rsi) = reading.rsi.filter(|v| v.is_finite()) else { continue };

            let state = self.states.entry(*tf).or_default();
            let (kind, next) = state.step(rsi, &self.thresholds);
            if next != *state {
                tracing::debug!(timeframe = %tf, rsi, from = ?*state, to = ?next, "Zone transition");
            }
            *state = next;
            votes.insert(*tf, kind);
            rsi_by_timeframe.insert(*tf, rsi);
        }

        let qualified = self.qualify(&votes);
        if qualified.is_none() {
            if votes.values().any(|k| !k.is_none()) {
                tracing::debug!(?votes, "Partial confirmation ignored");
            }
            return None;
        }

        // The primary timeframe labels the event; if it is still warming up the
        // finest voting timeframe stands in.
        let labeller = if rsi_by_timeframe.contains_key(&self.primary) {
            self.primary
        } else {
            *rsi_by_timeframe.keys().next()?
        };
        let reading = readings.get(&labeller)?;

        Some(SignalEvent {
            timeframe_votes: votes,
            qualified_kind: qualified,
            timestamp: reading.as_of,
            primary_timeframe: labeller,
            primary_timeframe_rsi: rsi_by_timeframe[&labeller],
            rsi_by_timeframe,
        })
    }

    fn qualify(&self, votes: &BTreeMap<Timeframe, SignalKind>) -> SignalKind {
        let agreeing = |kind: SignalKind| votes.values().filter(|k| **k == kind).count();

        match &self.confirmation {
            Confirmation::All => unanimous(&self.timeframes, votes),
            Confirmation::AtLeast { count } => PRIORITY
                .into_iter()
                .find(|kind| agreeing(*kind) >= *count)
                .unwrap_or(SignalKind::None),
            Confirmation::Required { timeframes } => unanimous(timeframes, votes),
        }
    }
}

/// The common kind when every listed timeframe voted the same way.
///
/// A listed timeframe without a vote (warming up, failed fetch) means `None`.
fn unanimous(timeframes: &[Timeframe], votes: &BTreeMap<Timeframe, SignalKind>) -> SignalKind {
    let mut kinds = timeframes.iter().map(|tf| votes.get(tf).copied());
    match kinds.next().flatten() {
        Some(first) if kinds.all(|k| k == Some(first)) => first,
        _ => SignalKind::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TFS: [Timeframe; 3] = [
        Timeframe::OneMinute,
        Timeframe::FiveMinutes,
        Timeframe::ThirtyMinutes,
    ];

    fn detector(confirmation: Confirmation) -> SignalDetector {
        SignalDetector::new(Thresholds::default(), &TFS, confirmation, Timeframe::OneMinute).unwrap()
    }

    fn readings(values: &[(Timeframe, Option<f64>)]) -> BTreeMap<Timeframe, TimeframeReading> {
        let as_of = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap();
        values
            .iter()
            .map(|(tf, rsi)| (*tf, TimeframeReading { rsi: *rsi, as_of }))
            .collect()
    }

    fn all(rsi: f64) -> BTreeMap<Timeframe, TimeframeReading> {
        readings(&TFS.map(|tf| (tf, Some(rsi))))
    }

    #[test]
    fn zone_state_machine() {
        let t = Thresholds::default();
        assert_eq!(ZoneState::Neutral.step(50.0, &t), (SignalKind::None, ZoneState::Neutral));
        assert_eq!(
            ZoneState::Neutral.step(30.0, &t),
            (SignalKind::Oversold, ZoneState::Exhausted(Direction::Low))
        );
        assert_eq!(
            ZoneState::Exhausted(Direction::Low).step(33.0, &t),
            (SignalKind::None, ZoneState::Exhausted(Direction::Low))
        );
        assert_eq!(
            ZoneState::Exhausted(Direction::Low).step(35.0, &t),
            (SignalKind::BullishReclaim, ZoneState::Neutral)
        );
        assert_eq!(
            ZoneState::Neutral.step(70.0, &t),
            (SignalKind::Overbought, ZoneState::Exhausted(Direction::High))
        );
        assert_eq!(
            ZoneState::Exhausted(Direction::High).step(65.0, &t),
            (SignalKind::BearishReclaim, ZoneState::Neutral)
        );
    }

    #[test]
    fn bullish_reclaim_requires_prior_oversold() {
        let t = Thresholds::default();
        // Neutral and high exhaustion never produce a bullish reclaim.
        assert_eq!(ZoneState::Neutral.step(36.0, &t).0, SignalKind::None);
        assert_eq!(
            ZoneState::Exhausted(Direction::High).step(36.0, &t).0,
            SignalKind::BearishReclaim
        );
    }

    #[test]
    fn partial_agreement_is_noise() {
        let mut d = detector(Confirmation::All);
        let r = readings(&[
            (Timeframe::OneMinute, Some(28.0)),
            (Timeframe::FiveMinutes, Some(28.0)),
            (Timeframe::ThirtyMinutes, Some(45.0)),
        ]);
        assert!(d.evaluate(&r).is_none());
        // The exhausted timeframes still moved.
        assert_eq!(d.state(Timeframe::OneMinute), Some(ZoneState::Exhausted(Direction::Low)));
        assert_eq!(d.state(Timeframe::ThirtyMinutes), Some(ZoneState::Neutral));
    }

    #[test]
    fn full_agreement_qualifies() {
        let mut d = detector(Confirmation::All);
        let event = d.evaluate(&all(25.0)).unwrap();
        assert_eq!(event.qualified_kind, SignalKind::Oversold);
        assert_eq!(event.primary_timeframe, Timeframe::OneMinute);
        assert_eq!(event.primary_timeframe_rsi, 25.0);
        assert_eq!(event.timeframe_votes.len(), 3);
        assert_eq!(event.rsi_by_timeframe[&Timeframe::ThirtyMinutes], 25.0);
    }

    #[test]
    fn reclaim_fires_once_then_returns_to_neutral() {
        let mut d = detector(Confirmation::All);
        d.evaluate(&all(25.0));
        let event = d.evaluate(&all(40.0)).unwrap();
        assert_eq!(event.qualified_kind, SignalKind::BullishReclaim);
        assert!(d.evaluate(&all(40.0)).is_none());
        assert_eq!(d.state(Timeframe::FiveMinutes), Some(ZoneState::Neutral));
    }

    #[test]
    fn all_needs_every_timeframe_ready() {
        let mut d = detector(Confirmation::All);
        let r = readings(&[
            (Timeframe::OneMinute, None),
            (Timeframe::FiveMinutes, Some(75.0)),
            (Timeframe::ThirtyMinutes, Some(72.0)),
        ]);
        assert!(d.evaluate(&r).is_none());
        // The ready timeframes still advanced; the warming one did not.
        assert_eq!(d.state(Timeframe::FiveMinutes), Some(ZoneState::Exhausted(Direction::High)));
        assert_eq!(d.state(Timeframe::OneMinute), Some(ZoneState::Neutral));

        // A single ready timeframe is never enough on its own.
        let r = readings(&[
            (Timeframe::OneMinute, Some(25.0)),
            (Timeframe::FiveMinutes, None),
            (Timeframe::ThirtyMinutes, None),
        ]);
        assert!(d.evaluate(&r).is_none());
    }

    #[test]
    fn warming_timeframes_sit_out_an_at_least_vote() {
        let mut d = detector(Confirmation::AtLeast { count: 2 });
        let r = readings(&[
            (Timeframe::OneMinute, None),
            (Timeframe::FiveMinutes, Some(75.0)),
            (Timeframe::ThirtyMinutes, Some(72.0)),
        ]);
        let event = d.evaluate(&r).unwrap();
        assert_eq!(event.qualified_kind, SignalKind::Overbought);
        assert_eq!(event.primary_timeframe, Timeframe::FiveMinutes);
        assert!(!event.timeframe_votes.contains_key(&Timeframe::OneMinute));
    }

    #[test]
    fn nothing_ready_means_nothing_to_say() {
        let mut d = detector(Confirmation::All);
        let r = readings(&TFS.map(|tf| (tf, None)));
        assert!(d.evaluate(&r).is_none());
    }

    #[test]
    fn at_least_prefers_reclaims() {
        let mut d = detector(Confirmation::AtLeast { count: 1 });
        // Put 1min into low exhaustion first.
        d.evaluate(&readings(&[
            (Timeframe::OneMinute, Some(25.0)),
            (Timeframe::FiveMinutes, Some(50.0)),
            (Timeframe::ThirtyMinutes, Some(50.0)),
        ]));
        // 1min reclaims while 30min enters oversold.
        let event = d
            .evaluate(&readings(&[
                (Timeframe::OneMinute, Some(36.0)),
                (Timeframe::FiveMinutes, Some(50.0)),
                (Timeframe::ThirtyMinutes, Some(29.0)),
            ]))
            .unwrap();
        assert_eq!(event.qualified_kind, SignalKind::BullishReclaim);
    }

    #[test]
    fn at_least_counts_agreeing_timeframes() {
        let mut d = detector(Confirmation::AtLeast { count: 2 });
        let r = readings(&[
            (Timeframe::OneMinute, Some(72.0)),
            (Timeframe::FiveMinutes, Some(71.0)),
            (Timeframe::ThirtyMinutes, Some(50.0)),
        ]);
        assert_eq!(d.evaluate(&r).unwrap().qualified_kind, SignalKind::Overbought);

        let mut d = detector(Confirmation::AtLeast { count: 3 });
        assert!(d.evaluate(&r).is_none());
    }

    #[test]
    fn required_subset_ignores_other_timeframes() {
        let mut d = detector(Confirmation::Required {
            timeframes: vec![Timeframe::OneMinute, Timeframe::FiveMinutes],
        });
        let r = readings(&[
            (Timeframe::OneMinute, Some(28.0)),
            (Timeframe::FiveMinutes, Some(28.0)),
            (Timeframe::ThirtyMinutes, Some(45.0)),
        ]);
        assert_eq!(d.evaluate(&r).unwrap().qualified_kind, SignalKind::Oversold);

        // A required timeframe that is not ready blocks confirmation.
        let r = readings(&[
            (Timeframe::OneMinute, Some(28.0)),
            (Timeframe::FiveMinutes, None),
            (Timeframe::ThirtyMinutes, Some(28.0)),
        ]);
        assert!(d.evaluate(&r).is_none());
    }

    #[test]
    fn primary_must_be_monitored() {
        let err = SignalDetector::new(
            Thresholds::default(),
            &TFS,
            Confirmation::All,
            Timeframe::Daily,
        );
        assert!(err.is_err());
    }
}
