//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Engagement engine tooling.
///
/// Replays recorded browser signal traces through the engagement engine and
/// inspects the visitor identity it keeps between page loads.
#[derive(Debug, Parser)]
#[command(name = "eg", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a JSONL trace of browser signals as one page load.
    Replay(ReplayArgs),

    /// Show the stored visitor identity.
    Status {
        /// Client to inspect (defaults to the configured client ID).
        #[arg(long)]
        client_id: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Trace file, one JSON object per line.
    pub trace: PathBuf,

    /// Page load time as RFC 3339 (defaults to now).
    #[arg(long)]
    pub start: Option<String>,

    /// Start a new browsing session by clearing session-scoped identity.
    #[arg(long)]
    pub new_session: bool,

    /// Append a `page_hide` signal after the last trace entry.
    #[arg(long)]
    pub finish: bool,
}
