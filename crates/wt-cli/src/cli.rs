//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Work-time tracker.
///
/// Starts, pauses, resumes and stops work sessions, and reports how much
/// time was tracked today.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Track time for this owner instead of the configured one.
    #[arg(long, global = true)]
    pub owner: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a new work session.
    Start,

    /// Pause the running session.
    Pause,

    /// Resume the paused session.
    Resume,

    /// Stop the active session.
    Stop,

    /// Show the current session and today's total.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List today's sessions.
    Today {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Redraw the status every tick until interrupted.
    Watch,
}
