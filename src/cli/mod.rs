//! CLI module for the VPN gateway orchestrator.
//!
//! This module provides the command-line interface and the text/JSON
//! formatting of run results.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
