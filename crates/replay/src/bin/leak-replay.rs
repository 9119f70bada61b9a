//! Replay historical readings through the detection pipeline.
//!
//! Reads a JSONL feed of meter readings, scores one property per day over
//! the requested range, and prints each observation as a JSON line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use leakwatch_core::{DetectionConfig, PropertyId, Reading};
use leakwatch_patterns::{
    FilePatternStore, MemoryPatternStore, PatternMatcher, PatternStore,
};
use leakwatch_replay::ReplaySimulator;

#[derive(Parser, Debug)]
#[command(name = "leak-replay", about = "Replay meter history through the leak detector")]
struct Args {
    /// JSONL file of readings, sorted ascending by timestamp.
    #[arg(long)]
    readings: PathBuf,

    /// Detection config YAML. Defaults are used when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// False-alarm pattern store (JSONL). In-memory when omitted.
    #[arg(long)]
    patterns: Option<PathBuf>,

    /// Property to replay.
    #[arg(long)]
    property: String,

    /// First day to evaluate (inclusive), e.g. 2024-05-06.
    #[arg(long)]
    from: NaiveDate,

    /// Last day to evaluate (inclusive).
    #[arg(long)]
    to: NaiveDate,
}

fn load_readings(path: &PathBuf) -> anyhow::Result<Vec<Reading>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut readings = Vec::new();
    let mut skipped = 0usize;
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Reading>(&line) {
            Ok(r) => match r.validate() {
                Ok(()) => readings.push(r),
                Err(e) => {
                    skipped += 1;
                    warn!(line = line_no + 1, error = %e, "skipping malformed reading");
                }
            },
            Err(e) => {
                skipped += 1;
                warn!(line = line_no + 1, error = %e, "skipping malformed reading");
            }
        }
    }
    if readings.is_empty() {
        bail!("no readings parsed from {}", path.display());
    }
    if skipped > 0 {
        warn!(skipped, "malformed readings skipped");
    }
    Ok(readings)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DetectionConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DetectionConfig::default(),
    };

    let store: Box<dyn PatternStore> = match &args.patterns {
        Some(path) => Box::new(
            FilePatternStore::open(path)
                .with_context(|| format!("opening pattern store {}", path.display()))?,
        ),
        None => Box::new(MemoryPatternStore::new()),
    };
    let matcher = PatternMatcher::new(store, config.pattern_discount, config.profile_tolerance);

    let readings = load_readings(&args.readings)?;
    info!(
        readings = readings.len(),
        property = args.property,
        "replaying"
    );

    let start = args.from.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = args.to.and_time(chrono::NaiveTime::MIN).and_utc();
    let simulator = ReplaySimulator::new(
        readings,
        PropertyId::new(args.property.clone()),
        start,
        end,
        config.clone(),
        matcher,
    )?;

    let mut alerting = 0usize;
    for result in simulator {
        let observation = result?;
        if observation.exceeds(config.alert_threshold) {
            alerting += 1;
        }
        println!("{}", serde_json::to_string(&observation)?);
    }
    info!(alerting, "replay complete");
    Ok(())
}
