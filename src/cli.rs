//! Command-line interface definition

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::sync::SyncDirection;

/// Editor Configuration Synchronization Tool
///
/// Sync an editor's user-configuration folder with a shared folder on a
/// cloud mount, in either or both directions
#[derive(Parser, Debug)]
#[command(name = "pkgsync")]
#[command(long_about = None, version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use specific settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the local folder from settings
    #[arg(long, global = true, value_name = "PATH")]
    pub local: Option<PathBuf>,

    /// Override the sync folder from settings
    #[arg(long, global = true, value_name = "PATH")]
    pub remote: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Copy changes from the sync folder into the local folder
    Pull {
        /// Copy everything from the source, ignoring versions and
        /// remembered deletions
        #[arg(long = "override")]
        override_all: bool,
    },

    /// Copy changes from the local folder into the sync folder
    Push {
        /// Copy everything from the source, ignoring versions and
        /// remembered deletions
        #[arg(long = "override")]
        override_all: bool,
    },

    /// Pull, then push
    Sync {
        /// Copy everything from the source, ignoring versions and
        /// remembered deletions
        #[arg(long = "override")]
        override_all: bool,
    },

    /// Sync a single file by its path relative to the folder roots
    Item {
        /// Relative path of the file, using `/` separators
        key: String,

        /// Direction to sync the item in
        #[arg(long, value_enum, default_value = "pull")]
        direction: Direction,
    },

    /// Watch both folders and keep them in sync until interrupted
    Watch,
}

/// Direction of a single-item sync.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Direction {
    /// Sync folder to local folder
    Pull,
    /// Local folder to sync folder
    Push,
}

impl From<Direction> for SyncDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Pull => Self::Pull,
            Direction::Push => Self::Push,
        }
    }
}
