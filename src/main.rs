use anyhow::Context;
use api_client::{
    closed_bars, BarSource, HistoricalPlaybackSource, LiveBarSource, MarketDataClient, MockBarSource,
    PlaybackOptions, TradierClient,
};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use configuration::{init_tracing, load_config, AlertClock, Config, PlaybackAlignment};
use core_types::{Alert, Timeframe};
use engine::Engine;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;

/// The main entry point for the RSI sentinel.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets usually live in .env; a missing file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config.logging)?;

    match cli.command {
        Commands::Run(args) => handle_run(config, args).await,
        Commands::Replay(args) => handle_replay(config, args).await,
        Commands::Export(args) => handle_export(config, args).await,
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Multi-timeframe RSI exhaustion and reclaim alerts.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file (defaults to ./config.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll market data and send alerts until interrupted.
    Run(RunArgs),
    /// Run recorded bars through the pipeline once and print the alerts.
    Replay(ReplayArgs),
    /// Download recent bars into playback files.
    Export(ExportArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Replay recorded files instead of polling the live API.
    #[arg(long, conflicts_with = "mock")]
    playback: bool,

    /// Simulate a random-walk market instead of polling the live API.
    #[arg(long)]
    mock: bool,

    /// Run cycles even when the market is closed.
    #[arg(long)]
    bypass_market_hours: bool,
}

#[derive(Parser)]
struct ReplayArgs {
    /// Directory with `{SYMBOL}_{timeframe}.json` files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// How coarser timeframes line up with the cursor.
    #[arg(long, value_enum)]
    alignment: Option<PlaybackAlignment>,

    /// Start where every timeframe has a full RSI warm-up.
    #[arg(long)]
    start_at_warmup: bool,

    /// Cooldown clock; replays default to bar time.
    #[arg(long, value_enum)]
    clock: Option<AlertClock>,
}

#[derive(Parser)]
struct ExportArgs {
    /// Symbol to export (defaults to the configured one).
    #[arg(long)]
    symbol: Option<String>,

    /// Timeframes to export (defaults to the configured ones).
    #[arg(long, num_args = 1..)]
    timeframes: Vec<Timeframe>,

    /// Bars per timeframe (defaults to `historical_bars_count`).
    #[arg(long)]
    count: Option<usize>,

    /// Output directory (defaults to `playback.data_dir`).
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    config.playback.enabled |= args.playback;
    config.mock.enabled |= args.mock;
    config.bypass_market_hours |= args.bypass_market_hours;

    let source: Box<dyn BarSource> = if config.mock.enabled {
        tracing::info!(base_price = config.mock.base_price, seed = ?config.mock.seed, "Using simulated market data");
        Box::new(MockBarSource::from_config(&config))
    } else if config.playback.enabled {
        tracing::info!(dir = %config.playback.data_dir.display(), "Using historical playback");
        Box::new(playback_source(&config)?)
    } else {
        let client: Arc<dyn MarketDataClient> = Arc::new(TradierClient::new(&config.tradier)?);
        Box::new(LiveBarSource::from_config(client, &config))
    };

    let mut engine = Engine::new(config, source)?;
    engine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    let snapshot = engine.snapshot().await;
    tracing::info!(cycles = snapshot.cycles, alerts = snapshot.recent_alerts.len(), "Engine stopped");
    Ok(())
}

async fn handle_replay(mut config: Config, args: ReplayArgs) -> anyhow::Result<()> {
    config.playback.loop_playback = false;
    config.playback.start_at_warmup |= args.start_at_warmup;
    config.bypass_market_hours = true;
    if let Some(dir) = args.data_dir {
        config.playback.data_dir = dir;
    }
    if let Some(alignment) = args.alignment {
        config.playback.alignment = alignment;
    }
    config.alerts.clock = args.clock.unwrap_or(AlertClock::Bar);
    // Every alert is printed below; do not also spam the remote sinks.
    config.sinks = Default::default();

    let timeframes = config.timeframes.clone();
    let source = playback_source(&config)?;
    let positions = source.len();
    let mut engine = Engine::new(config, Box::new(source))?;

    let mut fired = Vec::new();
    let mut cycles = 0;
    while !engine.is_source_exhausted() {
        let report = engine.run_cycle().await?;
        cycles += 1;
        fired.extend(report.alert);
    }

    println!("{}", alert_table(&fired, &timeframes));
    println!("{} alerts over {} cycles ({} playback positions)", fired.len(), cycles, positions);
    Ok(())
}

async fn handle_export(config: Config, args: ExportArgs) -> anyhow::Result<()> {
    let symbol = args.symbol.unwrap_or_else(|| config.symbol.clone());
    let timeframes = if args.timeframes.is_empty() {
        config.timeframes.clone()
    } else {
        args.timeframes
    };
    let output_dir = args.output_dir.unwrap_or_else(|| config.playback.data_dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let client = TradierClient::new(&config.tradier)?;

    let progress_bar = ProgressBar::new(timeframes.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut summary = Table::new();
    summary.load_preset(UTF8_FULL);
    summary.set_header(vec!["Timeframe", "Bars", "From", "To", "File"]);

    for timeframe in timeframes {
        let count = args.count.unwrap_or_else(|| config.lookback(timeframe));
        progress_bar.set_message(format!("Fetching {} {} bars...", count, timeframe));

        let bars = match client.fetch_bars(&symbol, timeframe, count).await {
            Ok(bars) => closed_bars(bars, timeframe, chrono::Utc::now()),
            Err(e) => {
                progress_bar.println(format!("{}: export failed: {}", timeframe, e));
                progress_bar.inc(1);
                continue;
            }
        };

        let path = HistoricalPlaybackSource::file_path(&output_dir, &symbol, timeframe);
        std::fs::write(&path, serde_json::to_string_pretty(&bars)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let span = |i: Option<&core_types::Bar>| {
            i.map(|b| b.timestamp.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default()
        };
        summary.add_row(vec![
            timeframe.to_string(),
            bars.len().to_string(),
            span(bars.first()),
            span(bars.last()),
            path.display().to_string(),
        ]);
        progress_bar.inc(1);
    }

    progress_bar.finish_with_message("Export complete!");
    println!("{}", summary);
    Ok(())
}

fn playback_source(config: &Config) -> anyhow::Result<HistoricalPlaybackSource> {
    let options = PlaybackOptions::from_config(&config.playback, config.rsi.period);
    let source = HistoricalPlaybackSource::from_dir(
        &config.playback.data_dir,
        &config.symbol,
        &config.timeframes,
        options,
    )?;
    Ok(source)
}

fn alert_table(alerts: &[Alert], timeframes: &[Timeframe]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);

    let mut header = vec!["#".to_string(), "Bar time".to_string(), "Kind".to_string()];
    header.extend(timeframes.iter().map(|tf| format!("RSI {}", tf)));
    table.set_header(header);

    for alert in alerts {
        let mut row = vec![
            alert.sequence.to_string(),
            alert.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            alert.kind.banner().to_string(),
        ];
        row.extend(timeframes.iter().map(|tf| {
            alert
                .rsi_snapshot
                .get(tf)
                .map(|rsi| format!("{:.2}", rsi))
                .unwrap_or_else(|| "N/A".to_string())
        }));
        table.add_row(row);
    }
    table
}
