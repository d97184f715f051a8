//! analyze - measure ball speed in a local video file
//!
//! Prints the AnalysisResult JSON on stdout; stage progress goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use ball_speed::{analyzer_from_config, AnalyzerConfig, CancelFlag};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to analyze (.mp4, .mov, .avi).
    video: PathBuf,
    /// TOML config file (defaults to BALLSPEED_CONFIG).
    #[arg(long, env = "BALLSPEED_CONFIG")]
    config: Option<PathBuf>,
    /// Fixed slow-motion factor instead of inferring it.
    #[arg(long)]
    slowmo: Option<f64>,
    /// Physical mitt height in meters.
    #[arg(long)]
    mitt_size_m: Option<f64>,
    /// Detection worker threads.
    #[arg(long)]
    workers: Option<usize>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::new(args.ui, is_tty, !stdout_is_tty);

    let mut config = match &args.config {
        Some(path) => AnalyzerConfig::from_file(path)?,
        None => AnalyzerConfig::default(),
    };
    config.apply_env()?;
    if let Some(slowmo) = args.slowmo {
        config.sequence.slowmo_factor = Some(slowmo);
    }
    if let Some(size) = args.mitt_size_m {
        config.calibration.mitt_size_m = size;
    }
    if let Some(workers) = args.workers {
        config.detector.workers = workers;
    }
    config.validate()?;

    if !ball_speed::ingest::decodes_containers() {
        log::warn!("built without the ingest-file-ffmpeg feature: video containers cannot be decoded");
    }

    let analyzer = {
        let _stage = ui.stage("Load detector");
        analyzer_from_config(&config)?
    };
    let bytes = {
        let _stage = ui.stage("Read video");
        std::fs::read(&args.video)
            .with_context(|| format!("failed to read {}", args.video.display()))?
    };

    let cancel = CancelFlag::new();
    let result = analyzer.analyze_observed(&bytes, &cancel, &ui);
    if !result.success {
        ui.abandon_stage();
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
