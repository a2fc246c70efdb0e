//! vcap - video capture command line tool
//!
//! Inspect, decode and play back video files and streams with the
//! `video-capture` library.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::decode::DecodeCommand;
use commands::info::InfoCommand;
use commands::play::PlayCommand;

#[derive(Parser)]
#[command(
    name = "vcap",
    version,
    about = "Decode video files and streams to BGR24 frames",
    after_help = "EXAMPLES:\n  \
                  # Stream metadata\n  \
                  vcap info video.mp4\n  \
                  vcap info --json rtsp://camera.local/stream\n\n  \
                  # Decode every frame, dumping every 30th as PNG\n  \
                  vcap decode --hw --dump ./frames --every 30 video.mp4\n\n  \
                  # Paced playback through a frame queue at double speed\n  \
                  vcap play --queue 8 --speed 2.0 video.mp4"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print metadata of the selected video stream
    Info(InfoCommand),

    /// Decode every frame as fast as possible
    Decode(DecodeCommand),

    /// Decode on a worker thread and display at the stream's frame rate (headless)
    Play(PlayCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Info(cmd) => cmd.execute(),
        Commands::Decode(cmd) => cmd.execute(),
        Commands::Play(cmd) => cmd.execute(),
    }
}
