//! CLI surface. Declarative `clap` derive style
//! (`display_order`, doc comments doubling as `--help` text).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "dockhand", about = "Push a local file set to a fleet of remote targets")]
pub struct Cli {
    /// Raise logging to debug and write it to <state_dir>/logs/debug.log
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push the source directory to every configured target
    #[command(display_order = 1)]
    Push {
        /// Path to the JSON targets file
        #[arg(long)]
        targets: PathBuf,
        /// Local directory to upload
        #[arg(long)]
        source: PathBuf,
        /// Delete remote-only files to match the local set exactly
        #[arg(long)]
        mirror: bool,
        /// Skip the review server and upload immediately
        #[arg(long)]
        yes: bool,
        /// Dispatch targets concurrently instead of in declaration order
        #[arg(long)]
        parallel: bool,
        /// Abort a target's pipeline on its first failure
        #[arg(long)]
        strict: bool,
        /// Per-target connect retry count
        #[arg(long, default_value_t = 3)]
        retry: usize,
        /// Loopback port for the review server (only used without --yes)
        #[arg(long, default_value_t = 4621)]
        port: u16,
        /// Print a single-line JSON summary instead of the human-readable one
        #[arg(long)]
        json: bool,
    },
    /// Start only the review server, without uploading
    #[command(display_order = 2)]
    Review {
        /// Path to the JSON targets file
        #[arg(long)]
        targets: PathBuf,
        /// Local directory to compare against the remote targets
        #[arg(long)]
        source: PathBuf,
        /// Loopback port for the review server
        #[arg(long, default_value_t = 4621)]
        port: u16,
    },
}
