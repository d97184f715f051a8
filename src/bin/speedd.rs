//! speedd - ball speed analysis server
//!
//! Serves `POST /api/analyze` for multipart video uploads and answers with the
//! AnalysisResult JSON. Configuration comes from `BALLSPEED_CONFIG` and the
//! `BALLSPEED_*` environment variables.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::{mpsc, Arc};

use ball_speed::{analyzer_from_config, api::ApiServer, AnalyzerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Listen address, overriding the config file.
    #[arg(long)]
    addr: Option<String>,
    /// Detector backend (cpu, tract), overriding the config file.
    #[arg(long)]
    backend: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = AnalyzerConfig::load()?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(backend) = args.backend {
        config.detector.backend = backend;
    }
    config.validate()?;

    if !ball_speed::ingest::decodes_containers() {
        log::warn!(
            "built without the ingest-file-ffmpeg feature: .mp4/.mov/.avi uploads will fail as unreadable"
        );
    }

    let analyzer = Arc::new(analyzer_from_config(&config)?);
    let api_handle = ApiServer::new(config.server.clone(), analyzer).spawn()?;
    log::info!("speedd listening on {}", api_handle.addr);
    log::info!(
        "allowed origins: {}",
        config.server.allowed_origins.join(", ")
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("speedd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping server...");
    api_handle.stop()?;

    Ok(())
}
