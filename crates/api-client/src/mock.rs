use crate::{Batch, BarSource};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use configuration::Config;
use core_types::{Bar, Timeframe};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// Largest per-bar move of the walk, as a fraction of price.
const MAX_STEP: f64 = 0.002;

/// A simulated market driven by a random walk.
///
/// Every timeframe starts with `lookback` bars of history ending at `start`.
/// Each `next_batch` advances a synthetic clock by the finest timeframe's
/// duration and appends one bar to every timeframe whose next bar is due, so
/// coarser timeframes grow more slowly. Always open.
pub struct MockBarSource {
    rng: StdRng,
    now: DateTime<Utc>,
    step: Duration,
    lookbacks: BTreeMap<Timeframe, usize>,
    series: BTreeMap<Timeframe, Vec<Bar>>,
}

impl MockBarSource {
    pub fn new(
        lookbacks: BTreeMap<Timeframe, usize>,
        base_price: f64,
        start: DateTime<Utc>,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let step = lookbacks
            .keys()
            .min()
            .map(|tf| tf.duration())
            .unwrap_or_else(|| Duration::minutes(1));

        let mut series = BTreeMap::new();
        for (timeframe, count) in &lookbacks {
            let count = (*count).max(1);
            let mut price = base_price;
            let mut bars = Vec::with_capacity(count);
            for i in 0..count {
                let back = i32::try_from(count - 1 - i).unwrap_or(i32::MAX);
                price = walk(&mut rng, price);
                bars.push(simulated_bar(&mut rng, start - timeframe.duration() * back, price));
            }
            series.insert(*timeframe, bars);
        }

        Self {
            rng,
            now: start,
            step,
            lookbacks,
            series,
        }
    }

    /// History ends at the current minute.
    pub fn from_config(config: &Config) -> Self {
        let lookbacks = config
            .timeframes
            .iter()
            .map(|tf| (*tf, config.lookback(*tf)))
            .collect();
        let now = Utc::now();
        let start = now.duration_trunc(Duration::minutes(1)).unwrap_or(now);
        Self::new(lookbacks, config.mock.base_price, start, config.mock.seed)
    }

    pub fn series(&self, timeframe: Timeframe) -> Option<&[Bar]> {
        self.series.get(&timeframe).map(Vec::as_slice)
    }
}

#[async_trait]
impl BarSource for MockBarSource {
    async fn next_batch(&mut self) -> Batch {
        self.now += self.step;
        for (timeframe, bars) in self.series.iter_mut() {
            let Some(last) = bars.last() else { continue };
            let due = last.timestamp + timeframe.duration();
            if due > self.now {
                continue;
            }
            let price = walk(&mut self.rng, last.close);
            bars.push(simulated_bar(&mut self.rng, due, price));

            let keep = self.lookbacks.get(timeframe).copied().unwrap_or(bars.len()).max(1);
            if bars.len() > keep {
                let excess = bars.len() - keep;
                bars.drain(..excess);
            }
        }
        self.series
            .iter()
            .map(|(timeframe, bars)| (*timeframe, Ok(bars.clone())))
            .collect()
    }
}

fn walk(rng: &mut StdRng, price: f64) -> f64 {
    round_cents(price * (1.0 + rng.gen_range(-MAX_STEP..MAX_STEP)))
}

fn simulated_bar(rng: &mut StdRng, timestamp: DateTime<Utc>, close: f64) -> Bar {
    let open = round_cents(close * rng.gen_range(0.9995..1.0005));
    let high = round_cents(close * rng.gen_range(1.0..1.001)).max(open);
    let low = round_cents(close * rng.gen_range(0.999..1.0)).min(open);
    Bar {
        timestamp,
        open,
        high,
        low,
        close,
        volume: rng.gen_range(100_000..10_000_000),
    }
}

fn round_cents(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
