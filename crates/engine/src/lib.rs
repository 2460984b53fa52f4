//! # Engine
//!
//! The polling orchestrator. Once per tick it pulls a batch of bars from a
//! `BarSource`, advances one `RsiSeries` per timeframe, asks the
//! `SignalDetector` for a confirmed event, filters it through the
//! `AlertManager` and fans the resulting alert out to the sinks.
//!
//! A cycle is the only writer of the RSI, detector and cooldown state;
//! everything outside reads `EngineSnapshot` copies.

use alerter::{sinks_from_config, AlertHistory, AlertManager, AlertSink, Clock, ManualClock, SystemClock};
use api_client::BarSource;
use chrono::{DateTime, Utc};
use configuration::{AlertClock, Config};
use core_types::{Alert, SignalEvent, Timeframe};
use events::{LogLevel, LogMessage, MarketSnapshot, WsMessage};
use signals::{RsiSeries, SignalDetector, TimeframeReading};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};

pub mod error;
pub mod snapshot;

pub use error::EngineError;
pub use snapshot::{EngineSnapshot, SnapshotHandle};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What happened in one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// The market was closed and the cycle did nothing.
    pub skipped: bool,
    /// Bars ingested per timeframe.
    pub ingested: BTreeMap<Timeframe, usize>,
    /// Timeframes whose fetch failed and were left out of confirmation.
    pub failed: Vec<Timeframe>,
    pub event: Option<SignalEvent>,
    pub alert: Option<Alert>,
}

pub struct Engine {
    config: Config,
    source: Box<dyn BarSource>,
    series: BTreeMap<Timeframe, RsiSeries>,
    detector: SignalDetector,
    alerts: AlertManager,
    /// Set when alert cooldowns follow bar time instead of the wall clock.
    bar_clock: Option<ManualClock>,
    history: AlertHistory,
    sinks: Vec<Arc<dyn AlertSink>>,
    events: broadcast::Sender<WsMessage>,
    snapshot: SnapshotHandle,
    latest_close: BTreeMap<Timeframe, (DateTime<Utc>, f64)>,
    cycles: u64,
}

impl Engine {
    /// Builds an engine with the sinks configured in `config.sinks`, plus a
    /// dashboard broadcast sink.
    pub fn new(config: Config, source: Box<dyn BarSource>) -> Result<Self, EngineError> {
        config.validate()?;

        let mut series = BTreeMap::new();
        for timeframe in &config.timeframes {
            series.insert(*timeframe, RsiSeries::new(config.rsi.period)?);
        }
        let detector = SignalDetector::from_config(&config)?;

        let (bar_clock, clock): (Option<ManualClock>, Arc<dyn Clock>) = match config.alerts.clock {
            AlertClock::Wall => (None, Arc::new(SystemClock)),
            AlertClock::Bar => {
                let manual = ManualClock::new(Utc::now());
                (Some(manual.clone()), Arc::new(manual))
            }
        };
        let alerts = AlertManager::new(config.symbol.clone(), &config.alerts, clock);

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let sinks = sinks_from_config(&config.sinks, Some(events.clone()));
        tracing::info!(
            symbol = %config.symbol,
            timeframes = ?config.timeframes,
            sinks = ?sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "Engine initialized"
        );

        Ok(Self {
            history: AlertHistory::new(config.alerts.history_capacity),
            snapshot: SnapshotHandle::default(),
            config,
            source,
            series,
            detector,
            alerts,
            bar_clock,
            sinks,
            events,
            latest_close: BTreeMap::new(),
            cycles: 0,
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.events.subscribe()
    }

    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.get().await
    }

    pub fn history(&self) -> &AlertHistory {
        &self.history
    }

    pub fn rsi(&self, timeframe: Timeframe) -> Option<&RsiSeries> {
        self.series.get(&timeframe)
    }

    pub fn is_source_exhausted(&self) -> bool {
        self.source.is_exhausted()
    }

    /// Runs one evaluation cycle: fetch, ingest, detect, alert, publish.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport::default();

        if !self.config.bypass_market_hours && !self.source.is_market_open().await {
            tracing::debug!(symbol = %self.config.symbol, "Market closed, skipping cycle");
            report.skipped = true;
            return Ok(report);
        }

        let mut batch = self.source.next_batch().await;
        let mut readings = BTreeMap::new();

        for (timeframe, rsi) in self.series.iter_mut() {
            let bars = match batch.remove(timeframe) {
                Some(Ok(bars)) => bars,
                Some(Err(e)) => {
                    tracing::warn!(%timeframe, error = %e, retryable = e.is_retryable(), "Fetch failed, timeframe excluded this cycle");
                    let _ = self.events.send(WsMessage::Log(LogMessage {
                        timestamp: Utc::now(),
                        level: LogLevel::Warn,
                        message: format!("{} fetch failed: {}", timeframe, e),
                    }));
                    report.failed.push(*timeframe);
                    continue;
                }
                None => {
                    report.failed.push(*timeframe);
                    continue;
                }
            };
            let Some(newest) = bars.last() else { continue };

            if rsi.last_timestamp().is_some_and(|last| newest.timestamp < last) {
                tracing::warn!(%timeframe, "Bar stream rewound, continuing from the current RSI state");
                rsi.rewind();
            }
            match rsi.ingest_new_bars(&bars) {
                Ok(count) => {
                    report.ingested.insert(*timeframe, count);
                }
                Err(e) => {
                    tracing::warn!(%timeframe, error = %e, "Rejected bars, timeframe excluded this cycle");
                    report.failed.push(*timeframe);
                    continue;
                }
            }

            self.latest_close.insert(*timeframe, (newest.timestamp, newest.close));
            readings.insert(
                *timeframe,
                TimeframeReading {
                    rsi: rsi.value(),
                    as_of: newest.timestamp,
                },
            );
        }

        if let Some(event) = self.detector.evaluate(&readings) {
            tracing::debug!(kind = %event.qualified_kind, primary = %event.primary_timeframe, "Signal confirmed");
            if let Some(clock) = &self.bar_clock {
                clock.set(event.timestamp);
            }
            if let Some(alert) = self.alerts.consider(&event) {
                self.history.push(alert.clone());
                self.dispatch(&alert);
                report.alert = Some(alert);
            }
            report.event = Some(event);
        }

        self.cycles += 1;
        self.publish_snapshot().await;
        Ok(report)
    }

    /// Polls until `shutdown` resolves or a finite source runs dry.
    /// A cycle in flight when shutdown is requested runs to completion.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), EngineError>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(Duration::from_secs(self.config.polling_interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            symbol = %self.config.symbol,
            interval_secs = self.config.polling_interval_seconds,
            "Engine is running"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping engine");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.run_cycle().await {
                Ok(report) => {
                    if let Some(alert) = &report.alert {
                        tracing::info!(kind = %alert.kind, sequence = alert.sequence, "Cycle produced an alert");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Cycle failed"),
            }

            if self.source.is_exhausted() {
                tracing::info!(cycles = self.cycles, "Bar source exhausted, stopping engine");
                break;
            }
        }
        Ok(())
    }

    /// Fire-and-forget delivery; a failing sink never blocks the next cycle.
    fn dispatch(&self, alert: &Alert) {
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let alert = alert.clone();
            tokio::spawn(async move {
                if let Err(e) = sink.deliver(&alert).await {
                    tracing::error!(sink = sink.name(), sequence = alert.sequence, error = %e, "Alert delivery failed");
                }
            });
        }
    }

    async fn publish_snapshot(&self) {
        let rsi_by_timeframe: BTreeMap<Timeframe, f64> = self
            .series
            .iter()
            .filter_map(|(tf, rsi)| rsi.value().map(|v| (*tf, v)))
            .collect();
        let primary = self
            .config
            .primary_timeframe()
            .and_then(|tf| self.latest_close.get(&tf))
            .or_else(|| self.latest_close.values().next());
        let price = primary.map(|(_, close)| *close);
        let as_of = primary.map(|(ts, _)| *ts);

        let _ = self.events.send(WsMessage::MarketSnapshot(MarketSnapshot {
            symbol: self.config.symbol.clone(),
            timestamp: as_of.unwrap_or_else(Utc::now),
            price,
            rsi_by_timeframe: rsi_by_timeframe.clone(),
        }));

        self.snapshot
            .publish(EngineSnapshot {
                symbol: self.config.symbol.clone(),
                cycles: self.cycles,
                updated_at: as_of,
                price,
                rsi_by_timeframe,
                zones: self.detector.states().clone(),
                cooldown_secs: self
                    .alerts
                    .cooldowns()
                    .into_iter()
                    .map(|(kind, left)| (kind, left.num_seconds()))
                    .collect(),
                recent_alerts: self.history.to_vec(),
            })
            .await;
    }
}
