//! Ladder CLI - Rendition ladder tooling
//!
//! Features:
//! - Rendition selection preview for a bandwidth and surface
//! - Simulated streaming sessions against an in-process network

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod output;
mod simulate;

/// Ladder CLI - Adaptive streaming toolkit
#[derive(Parser)]
#[command(name = "ladder")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Rendition selection and streaming simulation toolkit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json, table)
    #[arg(short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which rendition a ladder yields
    Select {
        /// Path to a ladder JSON file
        ladder: PathBuf,

        /// Bandwidth estimate in bits per second
        #[arg(short, long)]
        bandwidth: f64,

        /// Playback surface as WIDTHxHEIGHT
        #[arg(short, long)]
        surface: Option<String>,

        /// Bitrate safety margin
        #[arg(long, default_value = "1.2")]
        variance: f64,
    },

    /// Stream a ladder over a simulated network
    Simulate {
        /// Path to a ladder JSON file
        ladder: PathBuf,

        /// Network throughput in bits per second
        #[arg(short, long, default_value = "5000000")]
        throughput: f64,

        /// Chunks per rendition
        #[arg(short = 'n', long, default_value = "10")]
        chunks: usize,

        /// Chunk duration in seconds
        #[arg(short = 'd', long, default_value = "6")]
        chunk_duration: f64,

        /// Rendition whose chunks answer 503 (repeatable)
        #[arg(long)]
        fail: Vec<String>,

        /// Simulate a growing (live) program
        #[arg(long)]
        live: bool,

        /// Simulated seconds per wall-clock second
        #[arg(short, long, default_value = "50")]
        rate: f64,

        /// Engine configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up after this many wall-clock seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_writer(std::io::stderr)
        .init();
    ladder_core::init();

    match cli.command {
        Commands::Select { ladder, bandwidth, surface, variance } => {
            commands::select(&ladder, bandwidth, surface.as_deref(), variance, &cli.format)?;
        }
        Commands::Simulate {
            ladder,
            throughput,
            chunks,
            chunk_duration,
            fail,
            live,
            rate,
            config,
            timeout,
        } => {
            let options = simulate::SimulationOptions {
                throughput,
                chunks,
                chunk_duration,
                failing: fail.into_iter().collect(),
                live,
                rate,
                timeout: std::time::Duration::from_secs(timeout),
            };
            commands::simulate(&ladder, config.as_deref(), options, &cli.format).await?;
        }
    }

    Ok(())
}
