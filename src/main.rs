// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "soundroom")]
#[command(about = "Perception-and-dispatch engine for the Sound Room floor installation")]
#[command(version = env!("GIT_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine (the default when no subcommand is given)
    Run {
        /// Depth source: "synthetic", or "v4l2:/dev/videoN"
        /// (default: configured device, else first Y16-capable device)
        #[arg(long)]
        source: Option<String>,

        /// Configuration document path (default: platform config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print an ASCII floor grid on every active-cell change
        #[arg(long)]
        show_grid: bool,

        /// Run without opening an audio device
        #[arg(long)]
        no_audio: bool,

        /// Discard DMX output instead of talking to OLA
        #[arg(long)]
        null_dmx: bool,
    },

    /// List V4L2 depth-capable devices
    List,

    /// Validate room dimensions against a requested grid
    Validate {
        /// Room width in metres
        width: f32,
        /// Room depth in metres
        depth: f32,
        /// Requested columns
        cols: usize,
        /// Requested rows
        rows: usize,
    },

    /// Force one cell active for a few seconds (bypasses the filter)
    TestCell {
        row: usize,
        col: usize,

        /// How long to hold the cell, in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        no_audio: bool,

        #[arg(long)]
        null_dmx: bool,
    },

    /// Zero the DMX universe and exit
    Blackout,

    /// Run the engine with calibration scheduled immediately
    Calibrate {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        no_audio: bool,

        #[arg(long)]
        null_dmx: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=soundroom=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => cli::run(cli::RunOptions::default()),
        Some(Commands::Run {
            source,
            config,
            show_grid,
            no_audio,
            null_dmx,
        }) => cli::run(cli::RunOptions {
            source,
            config,
            show_grid,
            no_audio,
            null_dmx,
            calibrate: false,
        }),
        Some(Commands::List) => cli::list_devices(),
        Some(Commands::Validate {
            width,
            depth,
            cols,
            rows,
        }) => cli::validate(width, depth, cols, rows),
        Some(Commands::TestCell {
            row,
            col,
            duration,
            config,
            no_audio,
            null_dmx,
        }) => cli::test_cell(row, col, duration, config, no_audio, null_dmx),
        Some(Commands::Blackout) => cli::blackout(),
        Some(Commands::Calibrate {
            source,
            config,
            no_audio,
            null_dmx,
        }) => cli::run(cli::RunOptions {
            source,
            config,
            show_grid: false,
            no_audio,
            null_dmx,
            calibrate: true,
        }),
    }
}
