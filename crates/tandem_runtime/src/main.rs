//! Tandem Runtime
//!
//! Boots the hybrid renderer in a window, or against the software backend
//! with `--headless <frames>`.

mod app;
mod args;
mod headless;

use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use std::process::ExitCode;
use tandem_services::{SceneDescriptor, Settings};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {err}");
            eprintln!("error: {err}");
            for cause in err.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    tracing::info!("Tandem v{}", tandem_core::VERSION);

    let settings = match &args.settings {
        Some(path) => Settings::load_or_default(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    settings.validate().context("invalid settings")?;

    let scene = match args.scene.as_ref().or(settings.paths.scene.as_ref()) {
        Some(path) => SceneDescriptor::load(path)
            .with_context(|| format!("failed to load scene from {}", path.display()))?,
        None => {
            tracing::info!("no scene file given, using the built-in showcase");
            SceneDescriptor::showcase()
        }
    };

    match args.headless {
        Some(frames) => {
            let report = headless::run(&settings, &scene, frames)?;
            println!("{report}");
            Ok(())
        }
        None => app::run(settings, scene),
    }
}
