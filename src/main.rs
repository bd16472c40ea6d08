// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "photo-capture")]
#[command(about = "Still-photo capture pipeline tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take photos on the simulated hardware pipeline
    Photo {
        /// Camera slot to initialize
        #[arg(short, long, default_value = "0")]
        camera: u32,

        /// Number of photos to take
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,

        /// Pipeline parameters (JSON); defaults are used otherwise
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory (default: ~/Pictures/photo-capture)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Deliver photos without compositing a thumbnail
        #[arg(long)]
        no_thumbnail: bool,
    },

    /// Extract the embedded Exif thumbnail of a JPEG file
    Thumbnail {
        /// JPEG file to inspect
        input: PathBuf,

        /// Where to write the thumbnail (default: print its size only)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the default pipeline parameters as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=photo_capture=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Photo {
            camera,
            count,
            config,
            output,
            no_thumbnail,
        } => cli::take_photos(camera, count, config, output, no_thumbnail),
        Commands::Thumbnail { input, output } => cli::extract_thumbnail(&input, output),
        Commands::Config => cli::print_config(),
    }
}
