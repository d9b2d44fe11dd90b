use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "clipscribe",
    about = "ClipScribe - transcribe short videos from a share link",
    version,
    long_about = "Paste a short-video share link (or the whole share text) and get a markdown report with the video's details and a corrected transcript. Progress is shown live while the video is downloaded, transcribed and cleaned up."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe the video behind a share link
    Run {
        /// Share text, share URL, or bare video id
        #[arg(value_name = "SHARE_TEXT")]
        share_text: String,

        /// Output file path (prints to console if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Save the report as `<title>.md` in the current directory
        #[arg(long, conflicts_with = "output")]
        save: bool,

        /// Print every pipeline event as a JSON line instead of a progress bar
        #[arg(long)]
        json: bool,

        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", env = "CLIPSCRIBE_TIMEOUT")]
        timeout: Option<u64>,
    },

    /// Create or show the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List the pipeline steps
    Steps,
}
