#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the case data ingestion tool.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use case_tracker_ingest::config::IngestConfig;
use case_tracker_ingest::{Pipeline, RunSummary, build_sink, change_detector, http_executor};
use case_tracker_points::sink::{LineProtocolFileSink, TimeSeriesSink};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "case_tracker_ingest", about = "Case data ingestion tool")]
struct Cli {
    /// Config file (defaults to the embedded configuration)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, correlate and write points once
    Run {
        /// Write line protocol to this file instead of the configured sink
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Check whether the remote data changed since a known `Last-Modified`
    /// value
    Check {
        /// Previously observed `Last-Modified` value
        #[arg(long)]
        since: Option<String>,
    },
    /// Poll for changes and run whenever the data changes
    Watch {
        /// Seconds between checks (overrides `[watch] interval_secs`)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Print the embedded default configuration
    DefaultConfig,
}

fn sink_for(
    config: &IngestConfig,
    output: Option<PathBuf>,
) -> Result<Box<dyn TimeSeriesSink>, Box<dyn std::error::Error>> {
    let sink: Box<dyn TimeSeriesSink> = match output {
        Some(path) => Box::new(LineProtocolFileSink::new(path)),
        None => build_sink(&config.sink, &config.retry)?,
    };
    Ok(sink)
}

fn report(summary: &RunSummary, elapsed: Duration) {
    log::info!(
        "Ingested {} case records and {} facility observations in {:.1}s",
        summary.case_records,
        summary.observation_records,
        elapsed.as_secs_f64()
    );
    println!("points written:       {}", summary.points_written);
    println!("case points:          {}", summary.summary.case_points);
    println!("hospital points:      {}", summary.summary.hospital_points);
    println!("areas with hospitals: {}", summary.summary.matched_areas);
    for (kind, keys) in summary.summary.skipped_by_kind() {
        println!("skipped ({kind}): {}", keys.len());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::DefaultConfig) {
        print!("{}", case_tracker_ingest::config::DEFAULT_CONFIG);
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => IngestConfig::load(path)?,
        None => IngestConfig::embedded()?,
    };

    match cli.command {
        Commands::Run { output } => {
            let sink = sink_for(&config, output)?;
            let pipeline = Pipeline::from_config(&config)?;

            let start = Instant::now();
            match pipeline.run(sink.as_ref()).await {
                Ok(summary) => report(&summary, start.elapsed()),
                Err(e) => {
                    match e.points_written() {
                        0 => log::error!("Run failed, nothing written: {e}"),
                        n => log::error!("Run failed after {n} points were written: {e}"),
                    }
                    return Err(e.into());
                }
            }
        }
        Commands::Check { since } => {
            let executor = http_executor(&config.retry)?;
            let mut detector = change_detector(executor, &config.api);
            if let Some(token) = since {
                detector = detector.with_token(token);
            }

            let changed = detector.has_changed().await?;
            println!(
                "{}\t{}",
                if changed { "changed" } else { "unchanged" },
                detector.token().unwrap_or_default()
            );
        }
        Commands::Watch { interval } => {
            let sink = sink_for(&config, None)?;
            let pipeline = Pipeline::from_config(&config)?;
            let detector = change_detector(pipeline.executor(), &config.api);
            let interval = interval.map_or_else(|| config.watch.interval(), Duration::from_secs);

            log::info!("Watching for updates every {}s", interval.as_secs());
            pipeline.watch(detector, sink.as_ref(), interval).await;
        }
        Commands::DefaultConfig => {}
    }

    Ok(())
}
