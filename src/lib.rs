//! Bidirectional sync engine for editor configuration folders
//!
//! Keeps an editor's user-configuration folder and a shared folder on a
//! cloud mount in sync, using file modification times as the only
//! change signal and a persisted last-run snapshot to distinguish
//! deletions from files that were never synced.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod queue;
pub mod scanner;
pub mod service;
pub mod state;
pub mod sync;
pub mod watcher;
