use core_types::Alert;
use std::collections::VecDeque;

/// Fixed-capacity ring of the most recent alerts, oldest first.
#[derive(Debug, Clone)]
pub struct AlertHistory {
    capacity: usize,
    alerts: VecDeque<Alert>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            alerts: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, alert: Alert) {
        if self.alerts.len() == self.capacity {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter()
    }

    pub fn to_vec(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use core_types::SignalKind;
    use std::collections::BTreeMap;

    fn alert(sequence: u64) -> Alert {
        let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
        Alert {
            id: Alert::derive_id("SPY", SignalKind::Oversold, timestamp),
            sequence,
            symbol: "SPY".to_string(),
            kind: SignalKind::Oversold,
            timestamp,
            rsi_snapshot: BTreeMap::new(),
            message: String::new(),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut history = AlertHistory::new(2);
        for seq in 1..=3 {
            history.push(alert(seq));
        }
        let kept: Vec<u64> = history.iter().map(|a| a.sequence).collect();
        assert_eq!(kept, vec![2, 3]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn zero_capacity_still_keeps_the_latest() {
        let mut history = AlertHistory::new(0);
        assert!(history.is_empty());
        history.push(alert(1));
        history.push(alert(2));
        let kept: Vec<u64> = history.to_vec().iter().map(|a| a.sequence).collect();
        assert_eq!(kept, vec![2]);
    }
}
