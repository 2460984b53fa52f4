use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use configuration::AlertConfig;
use core_types::{Alert, SignalEvent, SignalKind};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write;
use std::sync::Arc;

/// Decides whether a qualified signal becomes an alert.
///
/// Policy, in order: drop `None` kinds, drop anything inside the per-kind
/// cooldown window, drop a (kind, bar timestamp) pair that was already
/// alerted. Everything else becomes an `Alert` and restarts the cooldown.
/// Expiry is evaluated lazily against the injected clock.
pub struct AlertManager {
    symbol: String,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    /// One manager serves one symbol, so the kind alone keys the cooldown.
    last_fired: HashMap<SignalKind, DateTime<Utc>>,
    dedup: DedupSet,
    next_sequence: u64,
}

impl AlertManager {
    pub fn new(symbol: impl Into<String>, config: &AlertConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbol: symbol.into(),
            cooldown: Duration::seconds(i64::try_from(config.cooldown_seconds).unwrap_or(i64::MAX)),
            clock,
            last_fired: HashMap::new(),
            dedup: DedupSet::new(config.dedup_capacity),
            next_sequence: 1,
        }
    }

    pub fn consider(&mut self, event: &SignalEvent) -> Option<Alert> {
        let kind = event.qualified_kind;
        if kind.is_none() {
            return None;
        }

        let now = self.clock.now();
        if let Some(remaining) = self.remaining_at(kind, now) {
            tracing::debug!(
                symbol = %self.symbol,
                %kind,
                remaining_secs = remaining.num_seconds(),
                "Signal suppressed by cooldown"
            );
            return None;
        }

        if self.dedup.contains(kind, event.timestamp) {
            tracing::debug!(symbol = %self.symbol, %kind, bar = %event.timestamp, "Duplicate signal suppressed");
            return None;
        }

        self.dedup.insert(kind, event.timestamp);
        self.last_fired.insert(kind, now);

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let alert = Alert {
            id: Alert::derive_id(&self.symbol, kind, event.timestamp),
            sequence,
            symbol: self.symbol.clone(),
            kind,
            timestamp: event.timestamp,
            rsi_snapshot: event.rsi_by_timeframe.clone(),
            message: format_message(&self.symbol, event),
        };
        tracing::info!(symbol = %alert.symbol, %kind, sequence, id = %alert.id, "Alert fired");
        Some(alert)
    }

    /// Time left before `kind` may fire again, if it is cooling down.
    pub fn cooldown_remaining(&self, kind: SignalKind) -> Option<Duration> {
        self.remaining_at(kind, self.clock.now())
    }

    /// Every kind still cooling down, with the time left.
    pub fn cooldowns(&self) -> BTreeMap<SignalKind, Duration> {
        let now = self.clock.now();
        self.last_fired
            .keys()
            .filter_map(|kind| Some((*kind, self.remaining_at(*kind, now)?)))
            .collect()
    }

    /// A clock that went backwards (bar time after a playback wrap) leaves
    /// more than the full window remaining.
    fn remaining_at(&self, kind: SignalKind, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_fired.get(&kind)?;
        let remaining = self.cooldown - (now - *last);
        (remaining > Duration::zero()).then_some(remaining)
    }
}

/// Renders the human-readable alert body.
pub fn format_message(symbol: &str, event: &SignalEvent) -> String {
    let mut message = format!(
        "{} - {}\nRSI: {:.2} ({})\n",
        event.qualified_kind.banner(),
        symbol,
        event.primary_timeframe_rsi,
        event.primary_timeframe
    );
    let timeframes = event
        .rsi_by_timeframe
        .iter()
        .map(|(tf, rsi)| format!("{}: {:.2}", tf, rsi))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = write!(
        message,
        "Timeframes: {}\nTime: {}",
        timeframes,
        event.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    message
}

/// Bounded set of (kind, bar timestamp) pairs; the oldest entry is evicted first.
struct DedupSet {
    capacity: usize,
    order: VecDeque<(SignalKind, DateTime<Utc>)>,
    members: HashSet<(SignalKind, DateTime<Utc>)>,
}

impl DedupSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    fn contains(&self, kind: SignalKind, timestamp: DateTime<Utc>) -> bool {
        self.members.contains(&(kind, timestamp))
    }

    fn insert(&mut self, kind: SignalKind, timestamp: DateTime<Utc>) {
        if !self.members.insert((kind, timestamp)) {
            return;
        }
        self.order.push_back((kind, timestamp));
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use core_types::Timeframe;
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn event(kind: SignalKind, timestamp: DateTime<Utc>) -> SignalEvent {
        let rsi_by_timeframe = BTreeMap::from([
            (Timeframe::OneMinute, 28.0),
            (Timeframe::FiveMinutes, 27.5),
            (Timeframe::ThirtyMinutes, 29.1),
        ]);
        SignalEvent {
            timeframe_votes: rsi_by_timeframe.keys().map(|tf| (*tf, kind)).collect(),
            qualified_kind: kind,
            timestamp,
            primary_timeframe: Timeframe::OneMinute,
            primary_timeframe_rsi: 28.0,
            rsi_by_timeframe,
        }
    }

    fn manager(clock: &ManualClock) -> AlertManager {
        AlertManager::new("SPY", &AlertConfig::default(), Arc::new(clock.clone()))
    }

    #[test]
    fn none_kind_never_alerts() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);
        assert!(alerts.consider(&event(SignalKind::None, t0())).is_none());
    }

    #[test]
    fn cooldown_suppresses_then_expires() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);

        let first = alerts.consider(&event(SignalKind::Oversold, t0())).unwrap();
        assert_eq!(first.sequence, 1);

        clock.advance(Duration::seconds(100));
        let ts = t0() + Duration::minutes(1);
        assert!(alerts.consider(&event(SignalKind::Oversold, ts)).is_none());
        assert_eq!(
            alerts.cooldown_remaining(SignalKind::Oversold),
            Some(Duration::seconds(200))
        );

        clock.set(t0() + Duration::seconds(305));
        let ts = t0() + Duration::minutes(5);
        let second = alerts.consider(&event(SignalKind::Oversold, ts)).unwrap();
        assert_eq!(second.sequence, 2);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn cooldown_is_per_kind() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);
        assert!(alerts.consider(&event(SignalKind::Oversold, t0())).is_some());
        assert!(alerts.consider(&event(SignalKind::BullishReclaim, t0())).is_some());
        assert!(alerts.consider(&event(SignalKind::Oversold, t0())).is_none());
    }

    #[test]
    fn cooldowns_lists_kinds_still_cooling() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);
        assert!(alerts.consider(&event(SignalKind::Oversold, t0())).is_some());
        clock.advance(Duration::seconds(200));
        let ts = t0() + Duration::minutes(3);
        assert!(alerts.consider(&event(SignalKind::BullishReclaim, ts)).is_some());
        clock.advance(Duration::seconds(150));

        // Oversold expired at 300 s; the reclaim has 150 s left.
        assert_eq!(
            alerts.cooldowns(),
            BTreeMap::from([(SignalKind::BullishReclaim, Duration::seconds(150))])
        );
    }

    #[test]
    fn clock_going_backwards_keeps_the_cooldown() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);
        assert!(alerts.consider(&event(SignalKind::Oversold, t0())).is_some());

        clock.set(t0() - Duration::hours(1));
        let ts = t0() - Duration::hours(1);
        assert!(alerts.consider(&event(SignalKind::Oversold, ts)).is_none());
        assert!(alerts.cooldown_remaining(SignalKind::Oversold).unwrap() > Duration::seconds(300));
    }

    #[test]
    fn same_bar_is_only_alerted_once() {
        let clock = ManualClock::new(t0());
        let mut alerts = manager(&clock);
        assert!(alerts.consider(&event(SignalKind::Overbought, t0())).is_some());

        // Past the cooldown, the same bar replayed is still a duplicate.
        clock.advance(Duration::seconds(600));
        assert!(alerts.consider(&event(SignalKind::Overbought, t0())).is_none());
        assert!(
            alerts
                .consider(&event(SignalKind::Overbought, t0() + Duration::minutes(1)))
                .is_some()
        );
    }

    #[test]
    fn dedup_set_is_bounded() {
        let mut set = DedupSet::new(2);
        set.insert(SignalKind::Oversold, t0());
        set.insert(SignalKind::Oversold, t0() + Duration::minutes(1));
        set.insert(SignalKind::Oversold, t0() + Duration::minutes(2));
        assert!(!set.contains(SignalKind::Oversold, t0()));
        assert!(set.contains(SignalKind::Oversold, t0() + Duration::minutes(2)));
        assert_eq!(set.order.len(), 2);
    }

    #[test]
    fn message_lists_every_timeframe() {
        let message = format_message("SPY", &event(SignalKind::Oversold, t0()));
        assert_eq!(
            message,
            "🔻 OVERSOLD - SPY\nRSI: 28.00 (1min)\nTimeframes: 1min: 28.00, 5min: 27.50, 30min: 29.10\nTime: 2024-03-01 14:30:00"
        );
    }
}
