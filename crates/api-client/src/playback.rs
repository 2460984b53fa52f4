use crate::error::PlaybackError;
use crate::{Batch, BarSource};
use async_trait::async_trait;
use configuration::{PlaybackAlignment, PlaybackConfig};
use core_types::{Bar, Timeframe};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// How a playback source walks its recorded series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    pub loop_playback: bool,
    /// Bars each timeframe needs before its RSI is defined.
    pub warmup_bars: usize,
    pub start_at_warmup: bool,
    pub alignment: PlaybackAlignment,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            loop_playback: true,
            warmup_bars: 14,
            start_at_warmup: false,
            alignment: PlaybackAlignment::Index,
        }
    }
}

impl PlaybackOptions {
    pub fn from_config(config: &PlaybackConfig, rsi_period: usize) -> Self {
        Self {
            loop_playback: config.loop_playback,
            warmup_bars: rsi_period,
            start_at_warmup: config.start_at_warmup,
            alignment: config.alignment,
        }
    }
}

/// Replays recorded bars as if they were arriving live.
///
/// Every call to `next_batch` returns, per timeframe, everything known up to
/// the shared cursor and then advances the cursor by one. After the last
/// position of the longest series the cursor wraps back to its start
/// position, 0 unless `start_at_warmup` is set, or the source reports
/// exhaustion when looping is off. A wrap shows up downstream as bars older
/// than the ones already seen.
#[derive(Debug, Clone)]
pub struct HistoricalPlaybackSource {
    series: BTreeMap<Timeframe, Vec<Bar>>,
    /// The longest series; its timestamps drive timestamp alignment.
    master: Timeframe,
    len: usize,
    start: usize,
    cursor: usize,
    exhausted: bool,
    options: PlaybackOptions,
}

impl HistoricalPlaybackSource {
    pub fn from_bars(
        series: BTreeMap<Timeframe, Vec<Bar>>,
        options: PlaybackOptions,
    ) -> Result<Self, PlaybackError> {
        let mut series = series;
        for (timeframe, bars) in series.iter_mut() {
            if bars.is_empty() {
                return Err(PlaybackError::Empty(timeframe.to_string()));
            }
            bars.sort_by_key(|b| b.timestamp);
            if let Some(pair) = bars.windows(2).find(|w| w[0].timestamp == w[1].timestamp) {
                return Err(PlaybackError::DuplicateTimestamp {
                    timeframe: *timeframe,
                    timestamp: pair[0].timestamp,
                });
            }
        }

        // Ties go to the finest timeframe.
        let (master, len) = series
            .iter()
            .map(|(tf, bars)| (*tf, bars.len()))
            .fold(None, |best: Option<(Timeframe, usize)>, (tf, len)| match best {
                Some((_, best_len)) if best_len >= len => best,
                _ => Some((tf, len)),
            })
            .ok_or_else(|| PlaybackError::Empty("every timeframe".to_string()))?;

        let mut source = Self {
            series,
            master,
            len,
            start: 0,
            cursor: 0,
            exhausted: false,
            options,
        };
        if options.start_at_warmup {
            source.start = source.warmup_position();
            source.cursor = source.start;
        }
        Ok(source)
    }

    /// Loads `{SYMBOL}_{timeframe}.json` for every timeframe from `dir`.
    pub fn from_dir(
        dir: &Path,
        symbol: &str,
        timeframes: &[Timeframe],
        options: PlaybackOptions,
    ) -> Result<Self, PlaybackError> {
        let mut series = BTreeMap::new();
        for timeframe in timeframes {
            let path = Self::file_path(dir, symbol, *timeframe);
            let bars = load_bars(&path)?;
            tracing::info!(%timeframe, bars = bars.len(), path = %path.display(), "Loaded playback series");
            series.insert(*timeframe, bars);
        }
        Self::from_bars(series, options)
    }

    pub fn file_path(dir: &Path, symbol: &str, timeframe: Timeframe) -> PathBuf {
        dir.join(format!("{}_{}.json", symbol, timeframe))
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of positions in one pass.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn series(&self, timeframe: Timeframe) -> Option<&[Bar]> {
        self.series.get(&timeframe).map(Vec::as_slice)
    }

    /// Bars of every timeframe visible at `position`.
    fn prefix_at(&self, position: usize) -> BTreeMap<Timeframe, &[Bar]> {
        match self.options.alignment {
            PlaybackAlignment::Index => self
                .series
                .iter()
                .map(|(tf, bars)| (*tf, &bars[..(position + 1).min(bars.len())]))
                .collect(),
            PlaybackAlignment::Timestamp => {
                let Some(as_of) = self.series[&self.master].get(position).map(|b| b.timestamp) else {
                    return BTreeMap::new();
                };
                self.series
                    .iter()
                    .map(|(tf, bars)| {
                        let visible = bars.partition_point(|b| b.timestamp <= as_of);
                        (*tf, &bars[..visible])
                    })
                    .collect()
            }
        }
    }

    /// The first position where every timeframe has a full warm-up.
    fn warmup_position(&self) -> usize {
        let needed = self.options.warmup_bars.max(1);
        let found = (0..self.len).find(|pos| {
            self.prefix_at(*pos)
                .values()
                .all(|bars| bars.len() >= needed)
        });
        match found {
            Some(pos) => pos,
            None => {
                tracing::warn!(needed, "No playback position warms up every timeframe, starting at the first bar");
                0
            }
        }
    }
}

fn load_bars(path: &Path) -> Result<Vec<Bar>, PlaybackError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PlaybackError::MissingFile(path.to_path_buf()));
        }
        Err(source) => {
            return Err(PlaybackError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&raw).map_err(|source| PlaybackError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[async_trait]
impl BarSource for HistoricalPlaybackSource {
    async fn next_batch(&mut self) -> Batch {
        let batch: Batch = self
            .prefix_at(self.cursor)
            .into_iter()
            .map(|(tf, bars)| (tf, Ok(bars.to_vec())))
            .collect();

        if self.exhausted {
            return batch;
        }
        if self.cursor + 1 < self.len {
            self.cursor += 1;
        } else if self.options.loop_playback {
            tracing::info!(positions = self.len, "Reached end of playback data, looping back to start");
            self.cursor = self.start;
        } else {
            tracing::info!(positions = self.len, "Reached end of playback data");
            self.exhausted = true;
        }
        batch
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use std::io::Write;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap()
    }

    fn series(timeframe: Timeframe, n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar::from_close(t0() + timeframe.duration() * i as i32, 100.0 + i as f64))
            .collect()
    }

    fn lens(batch: &Batch) -> Vec<usize> {
        batch.values().map(|r| r.as_ref().map(Vec::len).unwrap_or(0)).collect()
    }

    fn five_bar_source(options: PlaybackOptions) -> HistoricalPlaybackSource {
        let data = BTreeMap::from([
            (Timeframe::OneMinute, series(Timeframe::OneMinute, 5)),
            (Timeframe::FiveMinutes, series(Timeframe::FiveMinutes, 5)),
            (Timeframe::ThirtyMinutes, series(Timeframe::ThirtyMinutes, 5)),
        ]);
        HistoricalPlaybackSource::from_bars(data, options).unwrap()
    }

    #[tokio::test]
    async fn cursor_wraps_after_the_longest_series() {
        let mut source = five_bar_source(PlaybackOptions::default());

        let first = source.next_batch().await;
        assert_eq!(lens(&first), vec![1, 1, 1]);
        for expected in 2..=5 {
            let batch = source.next_batch().await;
            assert_eq!(lens(&batch), vec![expected; 3]);
        }
        assert_eq!(source.cursor(), 0);

        let sixth = source.next_batch().await;
        for (tf, bars) in &sixth {
            assert_eq!(bars.as_ref().unwrap(), first[tf].as_ref().unwrap());
        }
        assert!(!source.is_exhausted());
    }

    #[tokio::test]
    async fn shorter_series_stay_clamped() {
        let data = BTreeMap::from([
            (Timeframe::OneMinute, series(Timeframe::OneMinute, 6)),
            (Timeframe::FiveMinutes, series(Timeframe::FiveMinutes, 2)),
        ]);
        let mut source = HistoricalPlaybackSource::from_bars(data, PlaybackOptions::default()).unwrap();
        let mut last = Batch::new();
        for _ in 0..6 {
            last = source.next_batch().await;
        }
        assert_eq!(lens(&last), vec![6, 2]);
        assert_eq!(source.cursor(), 0);
    }

    #[tokio::test]
    async fn non_looping_playback_reports_exhaustion() {
        let mut source = five_bar_source(PlaybackOptions {
            loop_playback: false,
            ..PlaybackOptions::default()
        });
        for _ in 0..5 {
            assert!(!source.is_exhausted());
            source.next_batch().await;
        }
        assert!(source.is_exhausted());
        assert_eq!(lens(&source.next_batch().await), vec![5, 5, 5]);
    }

    #[tokio::test]
    async fn timestamp_alignment_follows_market_time() {
        let data = BTreeMap::from([
            (Timeframe::OneMinute, series(Timeframe::OneMinute, 12)),
            (Timeframe::FiveMinutes, series(Timeframe::FiveMinutes, 3)),
        ]);
        let options = PlaybackOptions {
            alignment: PlaybackAlignment::Timestamp,
            ..PlaybackOptions::default()
        };
        let mut source = HistoricalPlaybackSource::from_bars(data, options).unwrap();
        let batches: Vec<Vec<usize>> = {
            let mut out = Vec::new();
            for _ in 0..11 {
                out.push(lens(&source.next_batch().await));
            }
            out
        };
        // 14:30 sees the first 5min bar; 14:35 the second; 14:40 the third.
        assert_eq!(batches[0], vec![1, 1]);
        assert_eq!(batches[4], vec![5, 1]);
        assert_eq!(batches[5], vec![6, 2]);
        assert_eq!(batches[10], vec![11, 3]);
    }

    #[tokio::test]
    async fn start_at_warmup_skips_to_the_first_full_warmup() {
        let data = BTreeMap::from([
            (Timeframe::OneMinute, series(Timeframe::OneMinute, 20)),
            (Timeframe::FiveMinutes, series(Timeframe::FiveMinutes, 20)),
        ]);
        let options = PlaybackOptions {
            start_at_warmup: true,
            warmup_bars: 14,
            ..PlaybackOptions::default()
        };
        let mut source = HistoricalPlaybackSource::from_bars(data, options).unwrap();
        assert_eq!(source.cursor(), 13);
        assert_eq!(lens(&source.next_batch().await), vec![14, 14]);
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let mut bars = series(Timeframe::OneMinute, 3);
        bars.push(bars[1].clone());
        let result = HistoricalPlaybackSource::from_bars(
            BTreeMap::from([(Timeframe::OneMinute, bars)]),
            PlaybackOptions::default(),
        );
        assert!(matches!(result, Err(PlaybackError::DuplicateTimestamp { .. })));
    }

    #[test]
    fn unsorted_files_are_sorted_on_load() {
        let mut bars = series(Timeframe::OneMinute, 4);
        bars.reverse();
        let source = HistoricalPlaybackSource::from_bars(
            BTreeMap::from([(Timeframe::OneMinute, bars)]),
            PlaybackOptions::default(),
        )
        .unwrap();
        let closes: Vec<f64> = source
            .series(Timeframe::OneMinute)
            .unwrap()
            .iter()
            .map(|b| b.close)
            .collect();
        assert_eq!(closes, vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn loads_symbol_timeframe_files() {
        let dir = tempfile::tempdir().unwrap();
        for timeframe in [Timeframe::OneMinute, Timeframe::FiveMinutes] {
            let path = HistoricalPlaybackSource::file_path(dir.path(), "SPY", timeframe);
            let json = serde_json::to_string(&series(timeframe, 3)).unwrap();
            std::fs::write(path, json).unwrap();
        }
        let source = HistoricalPlaybackSource::from_dir(
            dir.path(),
            "SPY",
            &[Timeframe::OneMinute, Timeframe::FiveMinutes],
            PlaybackOptions::default(),
        )
        .unwrap();
        assert_eq!(source.len(), 3);
        assert!(dir.path().join("SPY_5min.json").exists());
    }

    #[test]
    fn malformed_file_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SPY_1min.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            r#"[{{"timestamp":"2024-03-01T14:30:00","open":1,"high":1,"low":1,"close":1,"volume":1}},
               {{"timestamp":"2024-03-01T14:31:00","open":1,"high":1,"low":1}}]"#
        )
        .unwrap();

        let result = HistoricalPlaybackSource::from_dir(
            dir.path(),
            "SPY",
            &[Timeframe::OneMinute],
            PlaybackOptions::default(),
        );
        assert!(matches!(result, Err(PlaybackError::Malformed { .. })));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let result = HistoricalPlaybackSource::from_dir(
            dir.path(),
            "SPY",
            &[Timeframe::ThirtyMinutes],
            PlaybackOptions::default(),
        );
        match result {
            Err(PlaybackError::MissingFile(path)) => assert!(path.ends_with("SPY_30min.json")),
            other => panic!("unexpected result: {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn wrap_restarts_at_the_warmup_position() {
        let data = BTreeMap::from([(Timeframe::OneMinute, series(Timeframe::OneMinute, 16))]);
        let options = PlaybackOptions {
            start_at_warmup: true,
            ..PlaybackOptions::default()
        };
        let mut source = HistoricalPlaybackSource::from_bars(data, options).unwrap();
        for _ in 13..16 {
            source.next_batch().await;
        }
        assert_eq!(source.cursor(), 13);
    }
}
