//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

/// Hybrid raster and ray-traced renderer
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "tandem", version, long_about = None)]
pub struct Args {
    /// JSON settings (defaults when the file is missing)
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,
    /// JSON scene descriptor (built-in showcase otherwise)
    #[arg(long, value_name = "FILE")]
    pub scene: Option<PathBuf>,
    /// Run this many frames on the software backend and print the profiler report
    #[arg(long, value_name = "FRAMES")]
    pub headless: Option<u64>,
}
